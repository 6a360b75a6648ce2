use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

/// A cloneable, single-resolution readiness signal.
///
/// Operators hand these out when they can't make progress. Whoever owns the
/// blocking condition resolves the token once it clears, waking every task
/// that registered interest. A resolved token stays resolved.
#[derive(Debug, Clone)]
pub struct ReadinessToken {
    inner: Arc<Mutex<TokenInner>>,
}

#[derive(Debug, Default)]
struct TokenInner {
    ready: bool,
    wakers: Vec<Waker>,
}

impl ReadinessToken {
    /// A token that is already resolved.
    pub fn ready() -> Self {
        ReadinessToken {
            inner: Arc::new(Mutex::new(TokenInner {
                ready: true,
                wakers: Vec::new(),
            })),
        }
    }

    /// A token that resolves once `resolve` is called.
    pub fn pending() -> Self {
        ReadinessToken {
            inner: Arc::new(Mutex::new(TokenInner::default())),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Resolve the token, waking everything waiting on it.
    ///
    /// Resolving an already resolved token does nothing.
    pub fn resolve(&self) {
        let wakers = {
            let mut inner = self.inner.lock();
            if inner.ready {
                return;
            }
            inner.ready = true;
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Register a waker to be woken on resolution.
    ///
    /// Returns true if the token is already resolved, in which case the waker
    /// isn't stored.
    pub fn register(&self, waker: &Waker) -> bool {
        let mut inner = self.inner.lock();
        if inner.ready {
            return true;
        }
        if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
        false
    }

    /// If both tokens refer to the same signal.
    pub fn same_as(&self, other: &ReadinessToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Future for ReadinessToken {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.register(cx.waker()) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
