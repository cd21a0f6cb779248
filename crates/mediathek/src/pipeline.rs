//! Plumbing that turns a pipeline worker into a progress event stream.
//!
//! The pipelines themselves are ordinary async functions that report
//! progress through an event channel and return their final value; this
//! keeps `?`-based error handling inside the pipeline. [`drive`]
//! interleaves the worker with its event channel and appends the final
//! value (or the error) as the stream's last item.

use crate::error::Result;
use async_stream::stream;
use futures::Stream;
use std::future::Future;
use tokio::sync::mpsc::UnboundedReceiver;

/// Run `worker` to completion, yielding its progress events as they
/// arrive, then a final item built from its result by `complete`.
///
/// The worker owns the sending half of `events`; the stream ends once
/// the worker has returned and all buffered events are drained. Dropping
/// the stream drops the worker mid-flight, which is the cancellation
/// path for consumers that stop listening.
pub(crate) fn drive<'a, T, E, W, C>(worker: W, mut events: UnboundedReceiver<E>, complete: C) -> impl Stream<Item = Result<E>> + 'a
where
    W: Future<Output = Result<T>> + 'a,
    C: FnOnce(T) -> E + 'a,
    T: 'a,
    E: 'a,
{
    stream!({
        tokio::pin!(worker);
        let mut finished: Option<Result<T>> = None;
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => yield Ok(event),
                    // The worker dropped its sender: it has returned.
                    None => break,
                },
                result = &mut worker, if finished.is_none() => finished = Some(result),
            }
        }
        match finished {
            Some(Ok(value)) => yield Ok(complete(value)),
            Some(Err(e)) => yield Err(e),
            None => {},
        }
    })
}
