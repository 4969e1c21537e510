// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-shot engine requests.
//
// An engine signals the end of a request with exactly one terminal event,
// success or error. `Responder` is the engine's side and is consumed when it
// fires, so a second event cannot be expressed. `PendingRequest` is the
// caller's side: a future that resolves to whichever event arrived. If the
// engine drops the responder without firing, the request resolves to an
// `Aborted` error instead of hanging.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::EngineError;

/// The terminal event of an engine request.
#[derive(Debug)]
pub enum RequestEvent<T> {
    Success(T),
    Error(EngineError),
}

/// Engine-side handle that fires a request's terminal event.
#[derive(Debug)]
pub struct Responder<T> {
    tx: oneshot::Sender<RequestEvent<T>>,
}

impl<T> Responder<T> {
    /// Fire the success event.
    pub fn succeed(self, value: T) {
        // The caller may have stopped listening; the event is simply dropped.
        let _ = self.tx.send(RequestEvent::Success(value));
    }

    /// Fire the error event.
    pub fn fail(self, err: EngineError) {
        let _ = self.tx.send(RequestEvent::Error(err));
    }

    /// Fire whichever event `result` describes.
    pub fn settle(self, result: Result<T, EngineError>) {
        match result {
            Ok(value) => self.succeed(value),
            Err(err) => self.fail(err),
        }
    }
}

/// Caller-side future for one in-flight engine request.
///
/// Resolves exactly once and cannot be restarted; it holds no copy of the
/// result after yielding it.
#[derive(Debug)]
#[must_use = "a pending request does nothing unless awaited"]
pub struct PendingRequest<T> {
    rx: oneshot::Receiver<RequestEvent<T>>,
}

impl<T> PendingRequest<T> {
    /// Create a connected responder/request pair.
    pub fn channel() -> (Responder<T>, PendingRequest<T>) {
        let (tx, rx) = oneshot::channel();
        (Responder { tx }, PendingRequest { rx })
    }

    /// A request that has already settled with `result`.
    pub fn settled(result: Result<T, EngineError>) -> Self {
        let (responder, pending) = Self::channel();
        responder.settle(result);
        pending
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T, EngineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(RequestEvent::Success(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(RequestEvent::Error(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(EngineError::aborted(
                "request was dropped by the engine before it completed",
            ))),
        }
    }
}
