//! Pending results
//!
//! A [`Pending`] is a shareable future: every clone observes the same
//! outcome, and the underlying work runs once.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::Value;
use crate::ProxyError;

#[derive(Clone)]
pub struct Pending {
    inner: Shared<BoxFuture<'static, Result<Value, ProxyError>>>,
}

impl Pending {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, ProxyError>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Self::new(async move { Ok(value) })
    }

    pub fn rejected(error: ProxyError) -> Self {
        Self::new(async move { Err(error) })
    }

    /// The outcome, if already settled
    pub fn peek(&self) -> Option<Result<Value, ProxyError>> {
        self.inner.peek().cloned()
    }

    pub fn ptr_eq(&self, other: &Pending) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Future for Pending {
    type Output = Result<Value, ProxyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_outcome() {
        let pending = Pending::new(async { Ok(Value::from(7)) });
        let other = pending.clone();
        assert!(pending.ptr_eq(&other));
        assert_eq!(pending.await.unwrap(), Value::from(7));
        assert_eq!(other.peek().map(|r| r.is_ok()), Some(true));
    }

    #[tokio::test]
    async fn rejections_propagate_to_every_clone() {
        let pending = Pending::rejected(ProxyError::type_error("nope"));
        let other = pending.clone();
        assert!(pending.await.is_err());
        assert!(other.await.is_err());
    }
}
