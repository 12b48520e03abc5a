//! Fragment-to-frame transcoding for the outbound SSE stream.
//!
//! An SSE `data:` payload cannot carry a literal line break, so each fragment
//! is split on `'\n'` and every interior break is transmitted as a
//! single-space placeholder frame. A client that concatenates successive
//! payloads without separators still renders visually distinct lines.
//! Whether the space is equivalent to a newline on reconstruction is a known
//! ambiguity of the scheme; the frames reproduce the original wire format
//! byte for byte.
//!
//! Frames are emitted strictly in order, fragment by fragment, as the
//! upstream produces them, with no whole-response buffering. Backpressure comes
//! from the transport write suspending until the client is ready.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::upstream::FragmentStream;

/// Split one fragment into frame payloads.
///
/// Every segment except the last is followed by a single-space placeholder;
/// the last gets no trailing placeholder. A fragment with no line break
/// passes through as exactly one frame, unchanged.
pub fn split_frames(fragment: &str) -> Vec<&str> {
    let mut frames = Vec::new();
    let mut segments = fragment.split('\n').peekable();

    while let Some(segment) = segments.next() {
        frames.push(segment);
        if segments.peek().is_some() {
            frames.push(" ");
        }
    }

    frames
}

/// Adapt a fragment stream into the outbound SSE event stream.
///
/// Clean completion is marked with one final `done` event. An upstream error
/// ends the stream with no completion marker, so the client can tell
/// truncated output from a finished response. Client disconnect drops this
/// stream, which drops the upstream connection with it.
pub fn sse_stream(fragments: FragmentStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        let mut fragments = fragments;
        let mut frames = 0usize;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    for payload in split_frames(&text) {
                        frames += 1;
                        yield Ok(Event::default().data(payload));
                    }
                }
                Err(e) => {
                    warn!(error = %e, frames, "Upstream stream aborted");
                    return;
                }
            }
        }

        debug!(frames, "Completion stream finished");
        yield Ok(Event::default().event("done").data(""));
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Error;

    #[test]
    fn fragment_without_line_break_is_one_frame() {
        assert_eq!(split_frames("Hello world"), vec!["Hello world"]);
    }

    #[test]
    fn interior_breaks_become_placeholder_frames() {
        assert_eq!(split_frames("A\nB\nC"), vec!["A", " ", "B", " ", "C"]);
    }

    #[test]
    fn trailing_break_yields_empty_last_segment() {
        assert_eq!(split_frames("line\n"), vec!["line", " ", ""]);
    }

    #[test]
    fn consecutive_breaks_yield_empty_segments() {
        assert_eq!(split_frames("\n\n"), vec!["", " ", "", " ", ""]);
    }

    #[test]
    fn empty_fragment_is_one_empty_frame() {
        assert_eq!(split_frames(""), vec![""]);
    }

    #[test]
    fn frame_concatenation_is_lossless_modulo_breaks() {
        let fragment = "first line\nsecond\nthird";
        let joined: String = split_frames(fragment).concat();
        assert_eq!(joined, fragment.replace('\n', " "));
    }

    #[tokio::test]
    async fn clean_stream_ends_with_done_marker() {
        let fragments: FragmentStream = Box::pin(stream::iter(vec![
            Ok("Hello".to_string()),
            Ok("A\nB".to_string()),
        ]));

        // 1 frame + 3 frames + the done event.
        let events: Vec<_> = sse_stream(fragments).collect().await;
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn aborted_stream_stops_without_done_marker() {
        let fragments: FragmentStream = Box::pin(stream::iter(vec![
            Ok("one".to_string()),
            Ok("two".to_string()),
            Err(Error::UpstreamAborted),
        ]));

        // Two frames, then the stream ends with no completion marker.
        let events: Vec<_> = sse_stream(fragments).collect().await;
        assert_eq!(events.len(), 2);
    }
}
