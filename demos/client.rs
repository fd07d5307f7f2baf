//! Interactive client.
//!
//! This example demonstrates:
//! - Subscribing to status and message events
//! - Issuing validated commands
//!
//! Each input line is `command [args]`; a line starting with `>` is sent as
//! a plain text message instead.
//!
//! # Running
//!
//! ```text
//! cargo run --example client -- --host 127.0.0.1 --port 5000
//! ```

use clap::Parser;
use clipswire::{ClientBuilder, ClientEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Connect to a bridge server and issue commands from stdin.
#[derive(Debug, Parser)]
struct Args {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = 5000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client = ClientBuilder::new()
        .host(args.host)
        .port(args.port)
        .on_event(|event| match event {
            ClientEvent::Message(text) => print!("<< {text}"),
            ClientEvent::StatusChanged(status) => println!("status {status}"),
            other => println!("{other:?}"),
        })
        .connect()
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(text) = line.strip_prefix('>') {
            client.send_text(text.trim_start()).await?;
            continue;
        }

        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        let reply = if command == "query" {
            client.query(args).await
        } else {
            client.execute(command, args.trim()).await
        };
        match reply {
            Ok(reply) => println!("{} {}", if reply.success { "ok" } else { "failed" }, reply.result),
            Err(e) => println!("error: {e}"),
        }

        if !client.is_connected() {
            break;
        }
    }

    client.disconnect();
    Ok(())
}
