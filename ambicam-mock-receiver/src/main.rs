//! Mock LED controller for testing the ambicam transports
//!
//! Usage: cargo run -p ambicam-mock-receiver -- --protocol prismatik
//! Then point the `server` config section at 127.0.0.1:5000

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};

use ambicam_wire_format::{parse_setcolor, FrameError, FrameIter, HandshakeCommand, RGB8};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Protocol {
    /// Binary Adalight frames (bridge transport)
    Adalight,
    /// `setcolor:` lines (Prismatik transport)
    Prismatik,
}

#[derive(Parser, Debug)]
#[command(name = "ambicam-mock-receiver")]
#[command(about = "Accept LED frames over TCP and print what arrives")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    listen: String,

    /// Wire protocol the clients speak
    #[arg(short, long, value_enum, default_value = "adalight")]
    protocol: Protocol,

    /// Number of leading LEDs to print per frame
    #[arg(short, long, default_value = "4")]
    show: usize,
}

fn main() {
    let args = Args::parse();
    println!("Mock receiver ({:?}) starting on {}...", args.protocol, args.listen);
    let listener = TcpListener::bind(&args.listen).expect("Failed to bind");
    println!("Mock receiver ready - waiting for connections...");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                println!("Client connected: {:?}", stream.peer_addr());
                let (protocol, show) = (args.protocol, args.show);
                std::thread::spawn(move || match protocol {
                    Protocol::Adalight => handle_adalight(stream, show),
                    Protocol::Prismatik => handle_prismatik(stream, show),
                });
            }
            Err(e) => eprintln!("Connection error: {e}"),
        }
    }
}

fn describe(colors: impl Iterator<Item = RGB8>, show: usize) -> String {
    colors
        .take(show)
        .map(|c| format!("({},{},{})", c.r, c.g, c.b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn handle_adalight(stream: TcpStream, show: usize) {
    let mut frames = FrameIter::new(BufReader::new(stream));
    let mut count = 0u64;
    while let Some(frame) = frames.next() {
        match frame {
            Ok(colors) => {
                count += 1;
                println!(
                    "Frame {count}: {} LEDs {}",
                    colors.len(),
                    describe(colors.iter().copied(), show)
                );
            }
            // The iterator resynchronizes on the next magic
            Err(e @ FrameError::Checksum { .. }) => eprintln!("Skipping: {e}"),
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                eprintln!("Truncated frame at offset {}", frames.offset());
                break;
            }
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        }
    }
    println!("Client disconnected after {count} frames");
}

fn handle_prismatik(stream: TcpStream, show: usize) {
    let mut count = 0u64;
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("Read error: {e}");
                break;
            }
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        let handshake = [
            HandshakeCommand::Lock,
            HandshakeCommand::Unlock,
            HandshakeCommand::Exit,
        ]
        .into_iter()
        .find(|h| h.as_bytes().strip_suffix(b"\n") == Some(command.as_bytes()));
        match handshake {
            Some(HandshakeCommand::Exit) => {
                println!("RX: exit");
                break;
            }
            Some(h) => println!("RX: {h:?}"),
            None => match parse_setcolor(command) {
                Ok(entries) => {
                    count += 1;
                    println!(
                        "Command {count}: {} LEDs {}",
                        entries.len(),
                        describe(entries.iter().map(|&(_, c)| c), show)
                    );
                }
                Err(e) => eprintln!("Bad command {command:?}: {e}"),
            },
        }
    }
    println!("Client disconnected after {count} commands");
}
