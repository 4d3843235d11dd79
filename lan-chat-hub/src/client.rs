//! Terminal client for the TCP line protocol.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    cli::ClientArgs,
    message::{self, MAX_RELAYED_LINE_BYTES},
    recipient::frame_line,
};

const LEAVE_COMMANDS: [&str; 2] = ["exit", "/quit"];

/// Why the interactive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Requested,
    InputClosed,
    Interrupted,
    ServerClosed,
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("could not reach hub at {}", args.server))?;
    info!(server = %args.server, username = %args.username, "connected");

    let (reader, writer) = stream.into_split();
    let mut session = Session {
        writer,
        relay: tokio::spawn(print_hub_lines(BufReader::new(reader))),
    };
    session.send(&args.username).await?;

    let exit = session.drive(BufReader::new(tokio::io::stdin()).lines()).await?;
    debug!(?exit, "client loop finished");
    session.close().await;
    Ok(())
}

/// Echoes hub lines to stdout until the hub hangs up.
async fn print_hub_lines(mut reader: BufReader<OwnedReadHalf>) -> Result<()> {
    while let Some(line) = message::read_line(&mut reader, MAX_RELAYED_LINE_BYTES)
        .await
        .context("lost connection to the hub")?
    {
        println!("{line}");
    }
    println!("*** server closed the connection");
    Ok(())
}

struct Session {
    writer: OwnedWriteHalf,
    relay: JoinHandle<Result<()>>,
}

impl Session {
    async fn drive(&mut self, mut input: Lines<BufReader<Stdin>>) -> Result<Exit> {
        println!("*** type a message and press enter; 'exit' leaves the chat");
        loop {
            tokio::select! {
                relayed = &mut self.relay => {
                    relayed.context("hub relay task panicked")??;
                    return Ok(Exit::ServerClosed);
                }
                line = input.next_line() => {
                    let Some(line) = line.context("failed to read stdin")? else {
                        return Ok(Exit::InputClosed);
                    };
                    let text = line.trim_end();
                    if is_leave_command(text) {
                        println!("*** leaving chat");
                        return Ok(Exit::Requested);
                    }
                    if !text.is_empty() {
                        send_line(&mut self.writer, text).await?;
                    }
                }
                _ = tokio::signal::ctrl_c() => return Ok(Exit::Interrupted),
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        send_line(&mut self.writer, text).await
    }

    async fn close(mut self) {
        self.relay.abort();
        if let Err(err) = self.writer.shutdown().await {
            debug!(?err, "hub connection already closed");
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, text: &str) -> Result<()> {
    writer
        .write_all(frame_line(text).as_bytes())
        .await
        .context("failed to send line to the hub")?;
    writer.flush().await.context("failed to flush line to the hub")
}

fn is_leave_command(text: &str) -> bool {
    LEAVE_COMMANDS
        .iter()
        .any(|command| text.eq_ignore_ascii_case(command))
}
