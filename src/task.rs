use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};

/// A spawned task that is aborted when its handle is dropped.
///
/// Work started for a request must not outlive the request: dropping the guard on timeout,
/// disconnect or completion releases whatever the task still holds.
#[derive(Debug)]
pub struct ScopedTask<T>(JoinHandle<T>);

impl<T: Send + 'static> ScopedTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl<T> Future for ScopedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for ScopedTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_guard_aborts_the_task() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(released.clone());

        let task = ScopedTask::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        tokio::task::yield_now().await;
        drop(task);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn awaiting_the_guard_yields_the_output() {
        let output = ScopedTask::spawn(async { 21 * 2 }).await.expect("task completes");
        assert_eq!(output, 42);
    }
}
