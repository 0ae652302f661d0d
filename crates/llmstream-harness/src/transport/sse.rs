//! Server-sent events framing shared by the Anthropic and OpenAI streams.

use super::WireDecoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// True for the OpenAI-style `[DONE]` sentinel.
    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// Parses one frame body. Frames without a `data` field (comments,
    /// event-only keep-alives) yield `None`.
    fn parse(body: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(body);
        let mut event = None;
        let mut data: Option<String> = None;
        for line in text.lines() {
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => event = Some(value.to_string()),
                "data" => match data.as_mut() {
                    Some(joined) => {
                        joined.push('\n');
                        joined.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                _ => {}
            }
        }
        data.map(|data| SseFrame { event, data })
    }
}

/// Splits a byte stream into frames at blank lines (`\n\n` or `\r\n\r\n`).
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    /// Every newline before this index has already been examined.
    scanned: usize,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;
        while let Some((body_end, next)) = find_blank_line(&self.buf, cursor) {
            frames.extend(SseFrame::parse(&self.buf[start..body_end.max(start)]));
            start = next;
            cursor = next;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        frames
    }

    /// Parses a trailing frame that was not followed by a blank line.
    pub fn flush(&mut self) -> Vec<SseFrame> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        SseFrame::parse(&rest).into_iter().collect()
    }
}

impl WireDecoder for SseDecoder {
    type Frame = SseFrame;

    fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, String> {
        Ok(SseDecoder::push_chunk(self, chunk))
    }

    fn finish(&mut self) -> Result<Vec<SseFrame>, String> {
        Ok(self.flush())
    }
}

/// Finds the first newline at or after `from` that terminates an empty line.
/// Returns the end of the frame body before it and the index just past it.
fn find_blank_line(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut at = from;
    while let Some(offset) = buf.get(at..)?.iter().position(|&b| b == b'\n') {
        let newline = at + offset;
        let previous = match &buf[..newline] {
            [.., b'\n'] => Some(newline - 1),
            [.., b'\n', b'\r'] => Some(newline - 2),
            _ => None,
        };
        if let Some(previous) = previous {
            let body_end = match &buf[..previous] {
                [.., b'\r'] => previous - 1,
                _ => previous,
            };
            return Some((body_end, newline + 1));
        }
        at = newline + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":\"hel";
        let part2 = b"lo\"}\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert!(frames[0].data.ends_with("hello\"}"));
    }

    #[test]
    fn comments_and_event_only_frames_are_skipped() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push_chunk(b": keep-alive\n\nevent: ping\n\ndata: [DONE]\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_done_sentinel());
    }

    #[test]
    fn long_frame_split_into_small_chunks() {
        let payload = "x".repeat(10_000);
        let wire = format!("event: delta\r\ndata: {payload}\r\ndata: tail\r\n\r\ndata: next\n\n");
        let mut decoder = SseDecoder::default();
        let mut frames = Vec::new();
        for chunk in wire.as_bytes().chunks(7) {
            frames.extend(decoder.push_chunk(chunk));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("delta"));
        assert_eq!(frames[0].data, format!("{payload}\ntail"));
        assert_eq!(frames[1].data, "next");
        assert!(decoder.flush().is_empty());
    }

    #[test]
    fn delimiter_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_chunk(b"data: a\r\n").is_empty());
        assert!(decoder.push_chunk(b"\r").is_empty());
        let frames = decoder.push_chunk(b"\ndata:b\n\n\n");
        let data: Vec<_> = frames.iter().map(|frame| frame.data.as_str()).collect();
        assert_eq!(data, vec!["a", "b"]);
    }

    #[test]
    fn flush_parses_unterminated_trailing_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"a\":1}").is_empty());
        let frames = decoder.flush();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(decoder.flush().is_empty());
    }
}
