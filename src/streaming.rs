//! Streaming adapter
//!
//! Newline-delimited JSON framing plus the two halves of response streaming:
//! [`pump`] drains a backing response stream into an append-only sequence,
//! and [`follow`] turns that sequence into an NDJSON body that first replays
//! what is already stored and then tails new items until the producer is
//! finished.

use crate::backend::ResponseStream;
use crate::error::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::watch;
use tonic::Status;

/// Content type of streamed bodies
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// NDJSON body: one encoded line per item
pub type NdjsonStream = BoxStream<'static, Result<String>>;

/// Parse a newline-delimited JSON body
///
/// Blank lines are skipped. The first malformed line fails the whole body.
pub fn parse_ndjson(body: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::InvalidRequest(format!("stream body is not UTF-8: {e}")))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::InvalidRequest(format!("invalid JSON on line {}: {}", idx + 1, e))
            })
        })
        .collect()
}

/// Encode one value as a single NDJSON line, newline included
pub fn encode_ndjson_line(value: &Value) -> Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Drain a backing response stream, handing each message to `on_item`
///
/// Stops at the first error; items already handed over stay where they are.
pub async fn pump<F>(mut responses: ResponseStream, mut on_item: F) -> std::result::Result<usize, Status>
where
    F: FnMut(Value) + Send,
{
    let mut count = 0;
    while let Some(item) = responses.next().await {
        on_item(item?);
        count += 1;
    }
    Ok(count)
}

/// Read side of an append-only output sequence
pub trait OutputSource: Send + Sync + 'static {
    /// Items from `offset` onwards, and whether the producer has finished
    ///
    /// The finished flag must be read before the items, so a `true` flag
    /// always comes with every item ever produced.
    fn snapshot(&self, offset: usize) -> Result<(Vec<Value>, bool)>;
}

struct FollowState<S> {
    source: S,
    progress: watch::Receiver<u64>,
    offset: usize,
    pending: VecDeque<Value>,
    finished: bool,
}

/// Tail an output sequence as NDJSON lines
///
/// `progress` must be bumped by the producer after every append and after
/// the sequence finishes.
pub fn follow<S: OutputSource>(source: S, progress: watch::Receiver<u64>) -> NdjsonStream {
    let state = FollowState {
        source,
        progress,
        offset: 0,
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                let line = encode_ndjson_line(&item);
                return Some((line, state));
            }
            if state.finished {
                return None;
            }

            state.progress.borrow_and_update();
            let (items, done) = match state.source.snapshot(state.offset) {
                Ok(snapshot) => snapshot,
                // the instance went away, nothing more will arrive
                Err(Error::InstanceNotFound(_)) => return None,
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            };
            state.offset += items.len();
            state.finished = done;

            if items.is_empty() && !done && state.progress.changed().await.is_err() {
                // producer dropped without finishing; drain whatever is left
                state.finished = true;
                if let Ok((rest, _)) = state.source.snapshot(state.offset) {
                    state.offset += rest.len();
                    state.pending.extend(rest);
                }
                continue;
            }
            state.pending.extend(items);
        }
    })
    .boxed()
}
