//! Byte-level framing shared by the vendor adapters.
//!
//! A vendor stream is a [`WireDecoder`] (bytes → frames) feeding a
//! [`WireTranslator`] (frames → [`StreamEvent`] batches). Every wire chunk yields
//! exactly one batch, so the pump's stall watchdog is reset per chunk even
//! when a chunk produces no events.

pub(crate) mod eventstream;
pub(crate) mod sse;

use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::EventBatchStream;
use crate::stream::StreamEvent;

pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, String>> + Send + 'static>>;

/// Splits raw bytes into vendor frames, buffering partial frames across chunks.
pub(crate) trait WireDecoder: Send + 'static {
    type Frame: Send;

    fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Self::Frame>, String>;

    /// Flushes whatever is buffered once the byte stream ends.
    fn finish(&mut self) -> Result<Vec<Self::Frame>, String> {
        Ok(Vec::new())
    }
}

/// Maps vendor frames onto the shared event protocol.
pub(crate) trait WireTranslator: Send + 'static {
    type Frame;

    fn translate(&mut self, frame: Self::Frame) -> Result<Vec<StreamEvent>, ProviderError>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError>;
}

/// Wraps a `reqwest` body into the crate's byte stream type.
pub(crate) fn response_bytes(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| e.to_string())),
    )
}

pub(crate) fn translate_byte_stream<D, T>(
    provider: ProviderId,
    bytes: ByteStream,
    decoder: D,
    translator: T,
) -> EventBatchStream
where
    D: WireDecoder,
    T: WireTranslator<Frame = D::Frame>,
{
    struct State<D, T> {
        provider: ProviderId,
        bytes: ByteStream,
        decoder: D,
        translator: T,
        done: bool,
    }

    fn translate_frames<D, T>(
        state: &mut State<D, T>,
        frames: Result<Vec<D::Frame>, String>,
    ) -> Result<Vec<StreamEvent>, ProviderError>
    where
        D: WireDecoder,
        T: WireTranslator<Frame = D::Frame>,
    {
        let frames = frames.map_err(|message| {
            ProviderError::accumulation(state.provider.clone(), format!("malformed frame: {message}"))
        })?;
        let mut events = Vec::new();
        for frame in frames {
            events.extend(state.translator.translate(frame)?);
        }
        Ok(events)
    }

    Box::pin(stream::unfold(
        State {
            provider,
            bytes,
            decoder,
            translator,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            let batch = match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push_chunk(&chunk);
                    translate_frames(&mut state, frames)
                }
                Some(Err(message)) => Err(ProviderError::transport(
                    state.provider.clone(),
                    format!("streaming read failed: {message}"),
                )),
                None => {
                    debug!(provider = %state.provider, "wire stream exhausted");
                    state.done = true;
                    let frames = state.decoder.finish();
                    translate_frames(&mut state, frames).and_then(|mut events| {
                        events.extend(state.translator.finish()?);
                        Ok(events)
                    })
                }
            };
            if batch.is_err() {
                state.done = true;
            }
            Some((batch, state))
        },
    ))
}
