// CLI entry point for a dedicated Crownfall host.
//
// Starts a standalone authoritative server that game clients connect to.
// The host pushes the map to joiners, brokers seats and chat, and drives
// the turn walk once every seat is claimed. See `server.rs` for the
// architecture and `roster.rs` for the player table.
//
// Usage:
//   host [OPTIONS]
//     --port <PORT>        Listen port (default: 7878)
//     --map <FILE>         Save file pushed to joining participants
//     --name <NICK>        Host nickname (default: host)
//     --profile <N>        Host profile id (default: 0)
//     --players <N>        Networked player slots (default: 2)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crownfall_protocol::types::ProfileId;
use crownfall_session::observer::NullObserver;
use crownfall_session::roster::standard_roster;
use crownfall_session::server::{ServerConfig, start_server};

fn main() {
    env_logger::init();

    let (config, players) = parse_args();
    let roster = standard_roster(players);

    let (handle, addr) = match start_server(config, roster, Box::new(NullObserver)) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Failed to start host: {err}");
            std::process::exit(1);
        }
    };

    println!("Host listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM by default, which is fine for a
    // dedicated host; connection threads die with it. A graceful-shutdown
    // path would flip this flag from a signal handler (the `ctrlc` crate)
    // and fall through to handle.stop().
    let running = Arc::new(AtomicBool::new(true));
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(500));
    }

    println!("\nShutting down...");
    handle.stop();
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching,
/// no clap dependency.
fn parse_args() -> (ServerConfig, u32) {
    let mut config = ServerConfig {
        autostart: true,
        ..ServerConfig::default()
    };
    let mut players = 2u32;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--map" => {
                i += 1;
                config.map_path = args.get(i).map(Into::into).unwrap_or_else(|| {
                    eprintln!("--map requires a file path");
                    std::process::exit(1);
                });
            }
            "--name" => {
                i += 1;
                config.nickname = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--name requires a value");
                    std::process::exit(1);
                });
            }
            "--profile" => {
                i += 1;
                config.profile_id = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .map(ProfileId)
                    .unwrap_or_else(|| {
                        eprintln!("--profile requires a valid number");
                        std::process::exit(1);
                    });
            }
            "--players" => {
                i += 1;
                players = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--players requires a valid number");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    (config, players)
}

fn print_usage() {
    println!("Usage: host [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>        Listen port (default: 7878)");
    println!("  --map <FILE>         Save file pushed to joining participants");
    println!("  --name <NICK>        Host nickname (default: host)");
    println!("  --profile <N>        Host profile id (default: 0)");
    println!("  --players <N>        Networked player slots (default: 2)");
    println!("  --help, -h           Show this help");
}
