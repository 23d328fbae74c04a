//! SSE frame decoding for upstream response bodies.
//!
//! Frames are separated by a blank line. Carriage returns are dropped as
//! bytes arrive, so `\r\n` framing decodes the same as `\n` even when a
//! separator straddles two chunks.

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};

use aigw_core::{GenerationError, ProviderEvent, ProviderStream};

struct FrameState<E> {
    stream: BoxStream<'static, Result<Bytes, E>>,
    buf: BytesMut,
    /// Bytes of `buf` already searched for a separator.
    scanned: usize,
    done: bool,
}

/// Position of the first `\n\n` at or after `from`.
fn frame_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| pos + from)
}

/// Split a byte stream into raw SSE frames.
///
/// A trailing frame without a terminating blank line is still yielded when
/// the stream ends. A read error ends the stream after being yielded.
pub fn sse_frames<S, E>(bytes: S) -> impl Stream<Item = Result<String, E>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = FrameState {
        stream: bytes.boxed(),
        buf: BytesMut::new(),
        scanned: 0,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = frame_end(&st.buf, st.scanned) {
                let frame = st.buf.split_to(pos + 2);
                st.scanned = 0;
                let text = String::from_utf8_lossy(&frame[..pos]).into_owned();
                return Some((Ok(text), st));
            }
            // The last byte may be the first half of a separator.
            st.scanned = st.buf.len().saturating_sub(1);

            if st.done {
                if st.buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                let rest = st.buf.split();
                let text = String::from_utf8_lossy(&rest).into_owned();
                return Some((Ok(text), st));
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r')),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e), st));
                }
                None => st.done = true,
            }
        }
    })
}

/// Decode an upstream SSE body into provider events.
///
/// Frames that do not parse into an event (comments, `[DONE]`, invalid
/// JSON) are skipped.
pub fn provider_events<S, E>(bytes: S) -> ProviderStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    sse_frames(bytes)
        .filter_map(|frame| async move {
            match frame {
                Ok(text) => ProviderEvent::from_sse_chunk(&text).map(Ok),
                Err(e) => Some(Err(GenerationError::Transport(e.to_string()))),
            }
        })
        .boxed()
}
