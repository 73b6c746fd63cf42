// Lobby chat capability, embedded by composition in both roles.
//
// Formats chat lines and keeps a bounded scrollback. The server formats a
// participant's raw text before broadcasting it as a chatted line; clients
// record the already-formatted lines they receive.

use std::collections::VecDeque;

/// Scrollback depth. Old lines fall off the front.
const SCROLLBACK: usize = 200;

#[derive(Default)]
pub struct ChatLog {
    lines: VecDeque<String>,
}

impl ChatLog {
    pub fn new() -> Self {
        ChatLog::default()
    }

    /// Canonical "nick: text" chat line.
    pub fn format_line(nickname: &str, text: &str) -> String {
        format!("{nickname}: {text}")
    }

    pub fn record(&mut self, line: String) {
        if self.lines.len() == SCROLLBACK {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let mut chat = ChatLog::new();
        chat.record(ChatLog::format_line("alice", "hello"));
        chat.record("bob has joined".to_string());
        let lines: Vec<&str> = chat.lines().collect();
        assert_eq!(lines, vec!["alice: hello", "bob has joined"]);
        assert_eq!(chat.latest(), Some("bob has joined"));
    }

    #[test]
    fn scrollback_is_bounded() {
        let mut chat = ChatLog::new();
        for i in 0..SCROLLBACK + 10 {
            chat.record(format!("line {i}"));
        }
        assert_eq!(chat.lines().count(), SCROLLBACK);
        assert_eq!(chat.lines().next(), Some("line 10"));
    }
}
