// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ground-side console for a Pepper-2 droid.
//!
//! Usage: peer_console <ADDRESS> [CHANNEL] [PHOTO_DIR]
//!
//! Prints telemetry, saves streamed photos and sends commands typed on stdin:
//! `start N`, `stop`, `text`, `add NUMBER`, `quit`.

use anyhow::{anyhow, Result};
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::Address;
use std::env;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pepper2_droid::bluetooth::{
    encode, FrameDecoder, Message, PhotoAssembler, MAX_PHONE_NUMBER_LEN,
};
use pepper2_droid::photo::thumbnail_path;

fn parse_command(line: &str) -> Result<Option<Message>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };

    let message = match verb {
        "start" => {
            let index = parts
                .next()
                .ok_or_else(|| anyhow!("usage: start N"))?
                .parse()?;
            Message::StartPhotoData { index }
        }
        "stop" => Message::StopPhotoData,
        "text" => Message::SendText,
        "add" => {
            let number = parts.next().ok_or_else(|| anyhow!("usage: add NUMBER"))?;
            if number.len() > MAX_PHONE_NUMBER_LEN {
                return Err(anyhow!(
                    "phone number longer than {} bytes",
                    MAX_PHONE_NUMBER_LEN
                ));
            }
            Message::AddPhoneNumber(number.to_string())
        }
        other => return Err(anyhow!("unknown command: {}", other)),
    };
    Ok(Some(message))
}

/// Print a message from the droid. Returns the photo index of a chunk.
fn show(message: Message, assembler: &mut PhotoAssembler, photo_dir: &Path) -> Result<Option<u8>> {
    let mut photo = None;
    match message {
        Message::DroidTelemetry(t) => {
            println!(
                "battery {}% radio {} photos {} {} for {}s at {:.6},{:.6}",
                t.battery,
                t.radio,
                t.photo_count,
                t.accel_state.as_str(),
                t.accel_duration,
                t.latitude,
                t.longitude
            );
        }
        Message::PhotoData(chunk) => {
            println!(
                "photo {} chunk {}/{} ({} bytes)",
                chunk.index,
                chunk.chunk + 1,
                chunk.chunk_count,
                chunk.data.len()
            );
            photo = Some(chunk.index);
            if let Some(bytes) = assembler.process_chunk(&chunk) {
                let path = thumbnail_path(photo_dir, chunk.index);
                std::fs::write(&path, bytes)?;
                println!("saved {}", path.display());
            }
        }
        other => println!("unexpected {} from droid", other.message_type()),
    }
    Ok(photo)
}

/// Give up on the photo being streamed, returning the chunks never received.
fn abandon_photo(assembler: &mut PhotoAssembler, streaming: Option<u8>) -> Vec<u8> {
    let missing = streaming
        .map(|index| assembler.missing(index))
        .unwrap_or_default();
    assembler.reset();
    missing
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("peer_console=info".parse()?))
        .init();

    let args: Vec<String> = env::args().collect();
    let address: Address = args
        .get(1)
        .ok_or_else(|| anyhow!("Usage: peer_console <ADDRESS> [CHANNEL] [PHOTO_DIR]"))?
        .parse()?;
    let channel: u8 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(1);
    let photo_dir = PathBuf::from(args.get(3).map(String::as_str).unwrap_or("."));
    std::fs::create_dir_all(&photo_dir)?;

    println!("Connecting to {} channel {}...", address, channel);
    let stream = Stream::connect(SocketAddr::new(address, channel)).await?;
    println!("Connected. Commands: start N, stop, text, add NUMBER, quit");

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut decoder = FrameDecoder::new();
    let mut assembler = PhotoAssembler::new();
    let mut streaming = None;
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    println!(
                        "Droid closed the connection ({} bytes discarded, {} unparsed)",
                        decoder.discarded(),
                        decoder.buffered()
                    );
                    break;
                }
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.decode() {
                        Ok(Some(message)) => {
                            if let Some(index) = show(message, &mut assembler, &photo_dir)? {
                                streaming = Some(index);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => warn!("Dropped frame: {}", e),
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim() == "quit" {
                    break;
                }
                let frame = match parse_command(&line) {
                    Ok(Some(message)) => {
                        if message == Message::StopPhotoData {
                            let missing = abandon_photo(&mut assembler, streaming.take());
                            if !missing.is_empty() {
                                println!("photo incomplete, missing chunks {:?}", missing);
                            }
                        }
                        info!("Sending {}", message.message_type());
                        encode(&message).map_err(anyhow::Error::from)
                    }
                    Ok(None) => continue,
                    Err(e) => Err(e),
                };
                match frame {
                    Ok(frame) => {
                        writer.write_all(&frame).await?;
                        writer.flush().await?;
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    Ok(())
}
