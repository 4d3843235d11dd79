use std::io;

use chrono::{Local, NaiveTime};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::registry::ClientRecord;

/// Longest inbound line accepted, line ending excluded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Longest line a client should accept from the hub. A relayed chat line
/// carries a username and a text, each up to [`MAX_LINE_BYTES`], plus the
/// timestamp and separators.
pub const MAX_RELAYED_LINE_BYTES: usize = 2 * MAX_LINE_BYTES + 64;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Speaker used for membership events.
pub const SERVER: &str = "Server";
/// Speaker used for enrichment reports.
pub const SYSTEM: &str = "System";

#[derive(Debug, Error)]
pub enum LineError {
    #[error("line exceeds {limit} bytes without a newline")]
    TooLong { limit: usize },
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("username line is blank")]
    EmptyUsername,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one newline-terminated line of at most `limit` bytes, not
/// counting a trailing `\n` or `\r\n`.
///
/// Returns `Ok(None)` once the stream ends, including when it ends in the
/// middle of an unterminated line.
pub async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let cap = limit + 2;
    let mut buffer = Vec::new();
    let bytes = (&mut *reader)
        .take(cap as u64)
        .read_until(b'\n', &mut buffer)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }

    if buffer.last() != Some(&b'\n') {
        if buffer.len() == cap {
            return Err(LineError::TooLong { limit });
        }
        return Ok(None);
    }

    let line = String::from_utf8(buffer).map_err(|_| LineError::InvalidUtf8)?;
    let line = line.trim_end_matches(LINE_ENDINGS);
    if line.len() > limit {
        return Err(LineError::TooLong { limit });
    }
    Ok(Some(line.to_string()))
}

pub fn chat_line(username: &str, text: &str) -> String {
    stamp(now(), username, text)
}

pub fn join_announcement(username: &str) -> String {
    stamp(now(), SERVER, &format!("{username} joined the chat."))
}

pub fn departure_announcement(username: &str) -> String {
    stamp(now(), SERVER, &format!("{username} left the chat."))
}

pub fn device_report(record: &ClientRecord) -> String {
    stamp(
        now(),
        SYSTEM,
        &format!(
            "device info for {} -> IP: {}, MAC: {}, Hostname: {}",
            record.username, record.ip, record.device.mac, record.device.hostname
        ),
    )
}

/// `[HH:MM] speaker: body`
pub fn stamp(at: NaiveTime, speaker: &str, body: &str) -> String {
    format!("[{}] {speaker}: {body}", at.format("%H:%M"))
}

fn now() -> NaiveTime {
    Local::now().time()
}
