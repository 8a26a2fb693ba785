//! Blocking and awaitable handle to a callback-style request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::cancellation::CancellationToken;
use super::Callback;
use crate::error::{ApiError, ApiResponse};

/// Result handle paired with the request's cancel token.
///
/// Resolve it either by blocking with [`wait`](Self::wait) from a plain
/// thread or by `.await`ing it. A request whose callback is dropped without
/// firing resolves to `Cancelled`.
pub struct CancellableFuture<T> {
    receiver: oneshot::Receiver<ApiResponse<T>>,
    token: CancellationToken,
}

impl<T: Send + 'static> CancellableFuture<T> {
    pub fn new(receiver: oneshot::Receiver<ApiResponse<T>>, token: CancellationToken) -> Self {
        Self { receiver, token }
    }

    /// Starts a callback-style request and captures its result.
    pub fn from_callback<F>(start: F) -> Self
    where
        F: FnOnce(Callback<T>) -> CancellationToken,
    {
        let (sender, receiver) = oneshot::channel();
        let token = start(Box::new(move |result| {
            let _ = sender.send(result);
        }));
        Self { receiver, token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Blocks the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime; `.await` instead.
    pub fn wait(self) -> ApiResponse<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(ApiError::cancelled()))
    }
}

impl<T> Future for CancellableFuture<T> {
    type Output = ApiResponse<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(ApiError::cancelled())))
    }
}

impl<T> std::fmt::Debug for CancellableFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableFuture").finish_non_exhaustive()
    }
}
