//! Boxed future returned by the object-safe platform and strategy traits

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub enum AsyncTask<T> {
    FutureVariant(Pin<Box<dyn Future<Output = T> + Send + 'static>>),
}

impl<T> AsyncTask<T> {
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        AsyncTask::FutureVariant(Box::pin(fut))
    }

    /// Already-resolved task, for mocks and trivial implementations
    pub fn ready(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::from_future(async move { value })
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let AsyncTask::FutureVariant(fut) = &mut *self;
        fut.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_and_boxed_futures_resolve() {
        assert!(AsyncTask::ready(true).await);
        let task = AsyncTask::from_future(async { 2u8 * 10 });
        assert_eq!(task.await, 20);
    }
}
