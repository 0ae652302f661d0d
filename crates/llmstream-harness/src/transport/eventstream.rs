//! Decoder for the `application/vnd.amazon.eventstream` binary framing used by
//! Bedrock streaming responses.
//!
//! Message layout: `total_len:u32 | headers_len:u32 | prelude_crc:u32 |
//! headers | payload | message_crc:u32`, all big-endian. Checksums are not
//! verified; TLS already guards the transport.

use bytes::{Buf, Bytes, BytesMut};

use super::WireDecoder;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EventStreamFrame {
    pub message_type: Option<String>,
    pub event_type: Option<String>,
    pub exception_type: Option<String>,
    pub payload: Bytes,
}

impl EventStreamFrame {
    pub fn is_exception(&self) -> bool {
        matches!(self.message_type.as_deref(), Some("exception" | "error"))
    }
}

#[derive(Default)]
pub(crate) struct EventStreamDecoder {
    buf: BytesMut,
}

impl EventStreamDecoder {
    fn next_frame(&mut self) -> Result<Option<EventStreamFrame>, String> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        let headers_len =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if total_len < PRELUDE_LEN + TRAILER_LEN + headers_len || total_len > MAX_MESSAGE_LEN {
            return Err(format!(
                "invalid event-stream prelude (total {total_len}, headers {headers_len})"
            ));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let mut message = self.buf.split_to(total_len).freeze();
        message.advance(PRELUDE_LEN);
        let headers = message.split_to(headers_len);
        let payload = message.split_to(total_len - PRELUDE_LEN - TRAILER_LEN - headers_len);

        let mut frame = EventStreamFrame {
            message_type: None,
            event_type: None,
            exception_type: None,
            payload,
        };
        for (name, value) in parse_headers(headers)? {
            match name.as_str() {
                ":message-type" => frame.message_type = value,
                ":event-type" => frame.event_type = value,
                ":exception-type" => frame.exception_type = value,
                _ => {}
            }
        }
        Ok(Some(frame))
    }
}

impl WireDecoder for EventStreamDecoder {
    type Frame = EventStreamFrame;

    fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<EventStreamFrame>, String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn finish(&mut self) -> Result<Vec<EventStreamFrame>, String> {
        if self.buf.is_empty() {
            Ok(Vec::new())
        } else {
            Err(format!(
                "event-stream ended with {} bytes of a partial message",
                self.buf.len()
            ))
        }
    }
}

/// Returns `(name, string value)` pairs. Non-string values are skipped.
fn parse_headers(mut headers: Bytes) -> Result<Vec<(String, Option<String>)>, String> {
    fn need(buf: &Bytes, n: usize) -> Result<(), String> {
        if buf.remaining() < n {
            Err("truncated event-stream header".to_string())
        } else {
            Ok(())
        }
    }

    let mut out = Vec::new();
    while headers.has_remaining() {
        need(&headers, 1)?;
        let name_len = headers.get_u8() as usize;
        need(&headers, name_len + 1)?;
        let name = String::from_utf8_lossy(&headers.split_to(name_len)).into_owned();
        let value_type = headers.get_u8();
        let value = match value_type {
            0 | 1 => None,
            2 => {
                need(&headers, 1)?;
                headers.advance(1);
                None
            }
            3 => {
                need(&headers, 2)?;
                headers.advance(2);
                None
            }
            4 => {
                need(&headers, 4)?;
                headers.advance(4);
                None
            }
            5 | 8 => {
                need(&headers, 8)?;
                headers.advance(8);
                None
            }
            6 | 7 => {
                need(&headers, 2)?;
                let len = headers.get_u16() as usize;
                need(&headers, len)?;
                let raw = headers.split_to(len);
                (value_type == 7).then(|| String::from_utf8_lossy(&raw).into_owned())
            }
            9 => {
                need(&headers, 16)?;
                headers.advance(16);
                None
            }
            other => return Err(format!("unknown event-stream header type {other}")),
        };
        out.push((name, value));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + header_bytes.len() + payload.len() + TRAILER_LEN;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0; 4]);
    out
}
