//! Incremental decoders for the streamed response bodies.
//!
//! OpenAI sends server-sent events and Ollama sends one JSON object per line;
//! both go through [`LineDecoder`]. Bedrock frames its stream in the AWS
//! event-stream binary format, handled by [`EventStreamDecoder`].

use crate::{Error, Result};

/// Splits a byte stream into `\n`-terminated lines, tolerating chunk boundaries anywhere.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Remaining bytes after the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() { return None; }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Payload of an SSE `data:` line, if the line is one.
pub fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

const PRELUDE_LEN: usize = 12;
const MESSAGE_CRC_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    String(String),
    /// Integer, timestamp, uuid or byte-array values; their contents are not needed.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl EventMessage {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| match v {
            HeaderValue::String(s) if k == name => Some(s.as_str()),
            _ => None,
        })
    }
}

/// Decoder for `application/vnd.amazon.eventstream` frames.
///
/// Frame layout: total length (u32 BE), headers length (u32 BE), prelude CRC,
/// headers, payload, message CRC. Both CRC32 checksums are verified.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<EventMessage>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(message) = self.next_frame()? {
            out.push(message);
        }
        Ok(out)
    }

    pub fn has_partial_frame(&self) -> bool { !self.buf.is_empty() }

    fn next_frame(&mut self) -> Result<Option<EventMessage>> {
        if self.buf.len() < PRELUDE_LEN { return Ok(None); }
        let prelude_crc = read_u32(&self.buf[8..12]);
        if crc32fast::hash(&self.buf[..8]) != prelude_crc {
            return Err(Error::Stream("event-stream prelude checksum mismatch".to_string()));
        }
        let total = read_u32(&self.buf[0..4]) as usize;
        let headers_len = read_u32(&self.buf[4..8]) as usize;
        if total < PRELUDE_LEN + MESSAGE_CRC_LEN || total > MAX_FRAME_LEN || headers_len > total - PRELUDE_LEN - MESSAGE_CRC_LEN {
            return Err(Error::Stream(format!("invalid event-stream frame (total={total}, headers={headers_len})")));
        }
        if self.buf.len() < total { return Ok(None); }

        let frame: Vec<u8> = self.buf.drain(..total).collect();
        let message_crc = read_u32(&frame[total - MESSAGE_CRC_LEN..]);
        if crc32fast::hash(&frame[..total - MESSAGE_CRC_LEN]) != message_crc {
            return Err(Error::Stream("event-stream message checksum mismatch".to_string()));
        }
        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total - MESSAGE_CRC_LEN].to_vec();
        Ok(Some(EventMessage { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let slice = bytes.get(*pos..*pos + n).ok_or_else(|| Error::Stream("truncated event-stream header".to_string()))?;
    *pos += n;
    Ok(slice)
}

fn parse_headers(bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>> {
    let mut headers = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let name_len = take(bytes, &mut pos, 1)?[0] as usize;
        let name = String::from_utf8_lossy(take(bytes, &mut pos, name_len)?).into_owned();
        let kind = take(bytes, &mut pos, 1)?[0];
        let value = match kind {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 | 3 | 4 | 5 | 8 | 9 => {
                let width = match kind { 2 => 1, 3 => 2, 4 => 4, 9 => 16, _ => 8 };
                take(bytes, &mut pos, width)?;
                HeaderValue::Other
            }
            6 | 7 => {
                let len = take(bytes, &mut pos, 2)?;
                let len = u16::from_be_bytes([len[0], len[1]]) as usize;
                let raw = take(bytes, &mut pos, len)?;
                if kind == 7 { HeaderValue::String(String::from_utf8_lossy(raw).into_owned()) } else { HeaderValue::Other }
            }
            other => return Err(Error::Stream(format!("unknown event-stream header type {other}"))),
        };
        headers.push((name, value));
    }
    Ok(headers)
}
