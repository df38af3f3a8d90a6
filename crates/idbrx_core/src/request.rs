//! Bridges engine completions into futures.

use crate::error::{Error, Result};
use futures::channel::oneshot;
use idbrx_engine::{Completion, EngineResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A request the engine has accepted and will answer later.
///
/// The request is issued when the `Request` is created, so it runs even if
/// the future is never polled; dropping the future only discards the
/// answer.
#[must_use = "a request does nothing observable unless its answer is awaited"]
pub struct Request<T> {
    answer: oneshot::Receiver<EngineResult<T>>,
}

impl<T: 'static> Request<T> {
    /// Creates a request together with the completion that answers it.
    pub(crate) fn pending() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        let done: Completion<T> = Box::new(move |result| {
            // A dropped receiver means nobody is waiting for the answer.
            let _ = tx.send(result);
        });
        (Self { answer: rx }, done)
    }

    /// Issues a request through `issue`, handing it the completion that
    /// feeds this future.
    pub(crate) fn issue(
        issue: impl FnOnce(Completion<T>) -> EngineResult<()>,
    ) -> Result<Self> {
        let (request, done) = Self::pending();
        issue(done)?;
        Ok(request)
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.answer).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.map_err(Error::from)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}
