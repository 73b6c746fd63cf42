// Integration smoke test for the authoritative server.
//
// Starts a server on localhost and drives it with plain TCP sockets using
// the protocol crate's framing, no GameClient involved. Because every
// participant's frames ride one FIFO queue, the per-connection frame order
// is deterministic and can be asserted exactly: handshake, map push,
// nickname correction, seat manifest, sit broadcasts, turn dispatch and
// gating, round bounds, disconnect cleanup.

use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crownfall_protocol::framing::{read_frame, write_frame};
use crownfall_protocol::message::{JoinRequest, LobbyUpdate, MessageType};
use crownfall_protocol::types::{LobbyAction, PlayerId, PlayerType, ProfileId};
use crownfall_protocol::unit::{self, NetworkAction};
use crownfall_session::observer::NullObserver;
use crownfall_session::roster::standard_roster;
use crownfall_session::server::{ServerConfig, ServerHandle, start_server};

struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RawClient {
    fn send(&mut self, msg_type: MessageType, payload: &[u8]) {
        write_frame(&mut self.writer, msg_type.as_wire(), payload).unwrap();
        self.writer.flush().unwrap();
    }

    fn recv(&mut self) -> (MessageType, Vec<u8>) {
        let (msg_type, payload) = read_frame(&mut self.reader).unwrap();
        (
            MessageType::from_wire(msg_type).expect("server sent an unknown type"),
            payload,
        )
    }

    /// Skip frames until one of the given type arrives. Panics after 50
    /// frames, so a missing message fails the test instead of hanging.
    fn recv_until(&mut self, wanted: MessageType) -> Vec<u8> {
        for _ in 0..50 {
            let (msg_type, payload) = self.recv();
            if msg_type == wanted {
                return payload;
            }
        }
        panic!("did not receive {wanted:?} within 50 frames");
    }
}

/// Connect and run the ping/pong handshake plus the join announcement.
fn join(addr: SocketAddr, name: &str) -> RawClient {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let reader_stream = stream.try_clone().unwrap();
    let mut client = RawClient {
        reader: BufReader::new(reader_stream),
        writer: BufWriter::new(stream),
    };

    client.send(MessageType::Ping, b"");
    let (msg_type, _) = client.recv();
    assert_eq!(msg_type, MessageType::Pong);

    let request = JoinRequest {
        nickname: name.into(),
        profile_id: ProfileId(1),
    };
    client.send(MessageType::ParticipantConnect, &request.to_payload().unwrap());
    client
}

fn start_test_server(players: u32, map: Option<&std::path::Path>) -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        map_path: map.map(Into::into).unwrap_or_default(),
        nickname: "host".into(),
        profile_id: ProfileId(0),
        autostart: false,
    };
    let (handle, addr) =
        start_server(config, standard_roster(players), Box::new(NullObserver)).unwrap();
    // Give the listener thread a moment to start.
    std::thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

fn end_turn_payload(player: PlayerId) -> Vec<u8> {
    unit::encode_actions(&[NetworkAction::end_turn(player)]).unwrap()
}

#[test]
fn full_session_lifecycle() {
    let map = tempfile::NamedTempFile::new().unwrap();
    let map_bytes: Vec<u8> = (0..10_000u32).map(|i| (i % 241) as u8).collect();
    std::fs::write(map.path(), &map_bytes).unwrap();

    let (handle, addr) = start_test_server(2, Some(map.path()));

    // 1. Alice joins: map push first, then the join notifications.
    let mut alice = join(addr, "alice");
    let payload = alice.recv_until(MessageType::SendingMap);
    assert_eq!(payload, map_bytes, "the whole save is pushed on join");
    let chatted = alice.recv_until(MessageType::Chatted);
    assert_eq!(chatted, b"alice has joined the game");
    alice.recv_until(MessageType::ParticipantConnected);

    // 2. Bob joins; Alice hears about it too.
    let mut bob = join(addr, "bob");
    bob.recv_until(MessageType::SendingMap);
    bob.recv_until(MessageType::ParticipantConnected);
    alice.recv_until(MessageType::ParticipantConnected);

    // 3. Alice sits on player 0; everyone gets the reported sit.
    alice.send(
        MessageType::LobbyActivity,
        &LobbyUpdate::request(PlayerId(0), LobbyAction::Sit, "alice").encode(),
    );
    let line = LobbyUpdate::parse(&alice.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(
        line,
        LobbyUpdate::report(PlayerId(0), LobbyAction::Sit, "alice")
    );
    let line = LobbyUpdate::parse(&bob.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(line.player, PlayerId(0));
    assert_eq!(line.remainder, "alice");

    // 4. Bob asks for the seat manifest and sees Alice's claimed seat.
    bob.send(MessageType::RequestSeatManifest, b"");
    let line = LobbyUpdate::parse(&bob.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(
        line,
        LobbyUpdate::report(PlayerId(0), LobbyAction::Sit, "alice")
    );

    // 5. Bob sits on player 1; all seats claimed, so the game may begin.
    bob.send(
        MessageType::LobbyActivity,
        &LobbyUpdate::request(PlayerId(1), LobbyAction::Sit, "bob").encode(),
    );
    bob.recv_until(MessageType::GameMayBegin);
    alice.recv_until(MessageType::GameMayBegin);

    // The server's roster marks both slots connected but still networked.
    {
        let roster = handle.roster();
        let roster = roster.lock().unwrap();
        assert!(roster.is_connected(PlayerId(0)));
        assert!(roster.is_connected(PlayerId(1)));
        assert_eq!(roster.player_type(PlayerId(0)), Some(PlayerType::Networked));
    }

    // 6. Start the round: turn order, round start, then the first turn is
    // dispatched to Alice only.
    handle.next_turn();
    assert_eq!(alice.recv_until(MessageType::TurnOrder), b"0 1 2");
    alice.recv_until(MessageType::RoundStart);
    assert_eq!(alice.recv_until(MessageType::NextPlayer), b"0");
    bob.recv_until(MessageType::RoundStart);

    // 7. Alice ends her turn. Bob must see the relayed end-turn action
    // strictly before his own turn dispatch (FIFO on one connection).
    alice.send(MessageType::SendingActions, &end_turn_payload(PlayerId(0)));
    let (msg_type, payload) = bob.recv();
    assert_eq!(msg_type, MessageType::SendingActions);
    let relayed = unit::decode_actions(&payload).unwrap();
    assert_eq!(relayed, vec![NetworkAction::end_turn(PlayerId(0))]);
    let (msg_type, payload) = bob.recv();
    assert_eq!(msg_type, MessageType::NextPlayer);
    assert_eq!(payload, b"1");

    // No echo: Alice's next frame is not her own action batch.
    // 8. Bob ends his turn; the neutral AI turn runs synchronously, the
    // round closes and a fresh one starts with Alice again.
    bob.send(MessageType::SendingActions, &end_turn_payload(PlayerId(1)));
    let (msg_type, payload) = alice.recv();
    assert_eq!(msg_type, MessageType::SendingActions);
    assert_eq!(
        unit::decode_actions(&payload).unwrap(),
        vec![NetworkAction::end_turn(PlayerId(1))]
    );
    alice.recv_until(MessageType::RoundOver);
    assert_eq!(alice.recv_until(MessageType::TurnOrder), b"0 1 2");
    alice.recv_until(MessageType::RoundStart);
    assert_eq!(alice.recv_until(MessageType::NextPlayer), b"0");
    bob.recv_until(MessageType::RoundOver);

    // 9. The session log recorded both turns in order.
    {
        let log = handle.session_log();
        let log = log.lock().unwrap();
        assert_eq!(log.turns().len(), 2);
        assert_eq!(log.turns()[0].owner, PlayerId(0));
        assert_eq!(log.turns()[1].owner, PlayerId(1));
    }

    // 10. Shutdown: queued ServerDisconnect frames drain before close.
    handle.stop();
    alice.recv_until(MessageType::ServerDisconnect);
    bob.recv_until(MessageType::ServerDisconnect);
}

#[test]
fn nickname_collisions_resolve_with_suffixes() {
    let (handle, addr) = start_test_server(3, None);

    // First alice keeps her name: no ChangeNickname, straight to the chat
    // notice.
    let mut alice1 = join(addr, "alice");
    let (msg_type, payload) = alice1.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"alice has joined the game");

    // Second and third alice get corrected before anything else.
    let mut alice2 = join(addr, "alice");
    let (msg_type, payload) = alice2.recv();
    assert_eq!(msg_type, MessageType::ChangeNickname);
    assert_eq!(payload, b"alice-2");

    let mut alice3 = join(addr, "alice");
    let (msg_type, payload) = alice3.recv();
    assert_eq!(msg_type, MessageType::ChangeNickname);
    assert_eq!(payload, b"alice-3");

    // The local identity is part of the collision search too.
    let mut impostor = join(addr, "host");
    let (msg_type, payload) = impostor.recv();
    assert_eq!(msg_type, MessageType::ChangeNickname);
    assert_eq!(payload, b"host-2");

    handle.stop();
}

#[test]
fn sit_refusal_reports_truth_to_requester_only() {
    let (handle, addr) = start_test_server(2, None);

    let mut alice = join(addr, "alice");
    alice.recv_until(MessageType::ParticipantConnected);
    let mut bob = join(addr, "bob");
    bob.recv_until(MessageType::ParticipantConnected);

    alice.send(
        MessageType::LobbyActivity,
        &LobbyUpdate::request(PlayerId(0), LobbyAction::Sit, "alice").encode(),
    );
    alice.recv_until(MessageType::LobbyActivity);
    let (msg_type, payload) = alice.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"alice takes control of Player 1");
    bob.recv_until(MessageType::LobbyActivity);

    // Bob contests the seat: he alone gets a report of the actual state.
    bob.send(
        MessageType::LobbyActivity,
        &LobbyUpdate::request(PlayerId(0), LobbyAction::Sit, "bob").encode(),
    );
    let line = LobbyUpdate::parse(&bob.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(
        line,
        LobbyUpdate::report(PlayerId(0), LobbyAction::Sit, "alice"),
        "a refused sit re-reports the standing seat"
    );

    // The seat never moved.
    {
        let roster = handle.roster();
        let roster = roster.lock().unwrap();
        assert!(roster.is_connected(PlayerId(0)));
    }

    // Alice sees no second sit for player 0: her next lobby line (after
    // Bob eventually stands someone up) would be something else. Nudge the
    // server with a chat and confirm it is the next thing Alice receives.
    bob.send(MessageType::Chat, b"fine, keep it");
    let (msg_type, payload) = alice.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"bob: fine, keep it");

    handle.stop();
}

#[test]
fn disconnect_reverts_every_held_seat() {
    let (handle, addr) = start_test_server(6, None);

    let mut carol = join(addr, "carol");
    carol.recv_until(MessageType::ParticipantConnected);
    let mut dave = join(addr, "dave");
    dave.recv_until(MessageType::ParticipantConnected);

    for player in [PlayerId(3), PlayerId(5)] {
        carol.send(
            MessageType::LobbyActivity,
            &LobbyUpdate::request(player, LobbyAction::Sit, "carol").encode(),
        );
        let line = LobbyUpdate::parse(&dave.recv_until(MessageType::LobbyActivity)).unwrap();
        assert_eq!(line.player, player);
        assert_eq!(line.action, LobbyAction::Sit);
    }

    // Carol's transport drops. Both seats revert and a stand is broadcast
    // for each, in seat order.
    drop(carol);
    let line = LobbyUpdate::parse(&dave.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(
        line,
        LobbyUpdate::report(PlayerId(3), LobbyAction::Stand, "carol")
    );
    let line = LobbyUpdate::parse(&dave.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(
        line,
        LobbyUpdate::report(PlayerId(5), LobbyAction::Stand, "carol")
    );

    {
        let roster = handle.roster();
        let roster = roster.lock().unwrap();
        for player in [PlayerId(3), PlayerId(5)] {
            assert!(!roster.is_connected(player));
            assert_eq!(roster.player_type(player), Some(PlayerType::Networked));
        }
    }

    handle.stop();
}

#[test]
fn depart_flags_intent_but_keeps_the_seat() {
    let (handle, addr) = start_test_server(2, None);

    let mut alice = join(addr, "alice");
    alice.recv_until(MessageType::ParticipantConnected);
    let mut bob = join(addr, "bob");
    bob.recv_until(MessageType::ParticipantConnected);

    alice.send(
        MessageType::LobbyActivity,
        &LobbyUpdate::request(PlayerId(0), LobbyAction::Sit, "alice").encode(),
    );
    bob.recv_until(MessageType::LobbyActivity);

    // A logical depart is announced, but the seat stays claimed until the
    // transport actually drops.
    alice.send(MessageType::ParticipantDisconnect, b"");
    bob.recv_until(MessageType::ParticipantDisconnected);
    {
        let roster = handle.roster();
        let roster = roster.lock().unwrap();
        assert!(roster.is_connected(PlayerId(0)));
    }

    drop(alice);
    let line = LobbyUpdate::parse(&bob.recv_until(MessageType::LobbyActivity)).unwrap();
    assert_eq!(line.action, LobbyAction::Stand);
    {
        let roster = handle.roster();
        let roster = roster.lock().unwrap();
        assert!(!roster.is_connected(PlayerId(0)));
    }

    handle.stop();
}

#[test]
fn chat_is_formatted_and_broadcast_to_everyone() {
    let (handle, addr) = start_test_server(2, None);

    let mut alice = join(addr, "alice");
    alice.recv_until(MessageType::ParticipantConnected);
    let mut bob = join(addr, "bob");
    bob.recv_until(MessageType::ParticipantConnected);
    alice.recv_until(MessageType::ParticipantConnected);

    bob.send(MessageType::Chat, "hello everyone!".as_bytes());
    let (msg_type, payload) = alice.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"bob: hello everyone!");
    // The sender hears the formatted line back too.
    let (msg_type, payload) = bob.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"bob: hello everyone!");

    handle.stop();
}

#[test]
fn malformed_batches_are_dropped_without_killing_the_connection() {
    let (handle, addr) = start_test_server(2, None);

    let mut alice = join(addr, "alice");
    alice.recv_until(MessageType::ParticipantConnected);

    // Garbage action batch, garbage lobby line, unknown type byte: all
    // dropped, connection intact.
    alice.send(MessageType::SendingActions, b"{definitely not json");
    alice.send(MessageType::LobbyActivity, b"gibberish here");
    write_frame(&mut alice.writer, 200, b"mystery").unwrap();
    alice.writer.flush().unwrap();

    // The connection still works: a chat round-trips.
    alice.send(MessageType::Chat, b"still here");
    let (msg_type, payload) = alice.recv();
    assert_eq!(msg_type, MessageType::Chatted);
    assert_eq!(payload, b"alice: still here");

    handle.stop();
}
