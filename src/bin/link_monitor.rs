//! Link Monitor
//!
//! Bench tool for the microcontroller link: prints every status line with
//! its parse result, and can write a single command first (e.g. `S1`).

use clap::Parser;
use gate_fusion::domain::types::{Channel, LinkSchema};
use gate_fusion::io::command_link::encode;
use gate_fusion::io::link_frame;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::SerialPortBuilderExt;

#[derive(Parser, Debug)]
#[command(name = "link-monitor", about = "Microcontroller link monitor")]
struct Args {
    #[arg(long, default_value = "/dev/ttyACM0")]
    port: String,

    #[arg(long, default_value = "9600")]
    baud: u32,

    /// Firmware schema: session or legacy
    #[arg(long, default_value = "session")]
    schema: String,

    /// Command to send after the port settles, e.g. O1, S0 (legacy: 1, 0)
    #[arg(long)]
    send: Option<String>,

    /// Wait after opening; the board resets when the port opens
    #[arg(long, default_value = "2000")]
    settle_ms: u64,
}

fn clock() -> String {
    let format = format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
    OffsetDateTime::now_utc().format(&format).unwrap_or_else(|_| "--:--:--".to_string())
}

fn parse_schema(name: &str) -> Option<LinkSchema> {
    match name {
        "session" => Some(LinkSchema::Session),
        "legacy" => Some(LinkSchema::Legacy),
        _ => None,
    }
}

/// Accept only byte sequences the firmware understands
fn parse_command(schema: LinkSchema, text: &str) -> Option<&'static [u8]> {
    Channel::ALL
        .iter()
        .flat_map(|&channel| [encode(schema, channel, true), encode(schema, channel, false)])
        .flatten()
        .find(|cmd| *cmd == text.as_bytes())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let schema = parse_schema(&args.schema)
        .ok_or_else(|| anyhow::anyhow!("unknown schema {:?}", args.schema))?;

    println!("Opening {} @ {}baud ({} schema)...", args.port, args.baud, schema.as_str());
    let port = tokio_serial::new(&args.port, args.baud)
        .timeout(Duration::from_millis(100))
        .open_native_async()?;
    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    println!("Link opened ✓");

    let (reader, mut writer) = tokio::io::split(port);

    if let Some(ref text) = args.send {
        let cmd = parse_command(schema, text)
            .ok_or_else(|| anyhow::anyhow!("{text:?} is not a {} command", schema.as_str()))?;
        writer.write_all(cmd).await?;
        writer.flush().await?;
        println!("[{}] SENT {}", clock(), text);
    }

    let mut lines = BufReader::new(reader).lines();
    let mut parsed = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("[{}] link closed", clock());
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match link_frame::parse(line, schema) {
                    Ok(frame) => {
                        parsed += 1;
                        println!(
                            "[{}] dist={:>4}cm pir={} gate={} mcu_session={:?} mcu_owner={:?}",
                            clock(),
                            frame.distance_cm,
                            frame.motion_detected as u8,
                            frame.gate_open as u8,
                            frame.session_echo,
                            frame.owner_echo,
                        );
                    }
                    Err(e) => {
                        rejected += 1;
                        println!("[{}] REJECTED {:?}: {}", clock(), line, e);
                    }
                }
            }
        }
    }

    println!("\n{parsed} frames parsed, {rejected} rejected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(LinkSchema::Session, "S1"), Some(&b"S1"[..]));
        assert_eq!(parse_command(LinkSchema::Session, "1"), None);
        assert_eq!(parse_command(LinkSchema::Legacy, "0"), Some(&b"0"[..]));
        assert_eq!(parse_command(LinkSchema::Legacy, "O1"), None);
    }
}
