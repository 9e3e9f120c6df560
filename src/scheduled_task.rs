use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A task scheduled for a specific point in the future.
/// It will automatically execute at that point, or can be cancelled or
/// triggered early.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    early: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `fire_at`.
    /// If `fire_at` is in the past, the task will execute immediately.
    pub fn new<Fut>(task: Fut, fire_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let early = Arc::new(Notify::new());
        let wakeup = early.clone();
        let delay = delay_until(fire_at);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wakeup.notified() => {}
            }
            task.await
        });

        Self { handle, early }
    }

    /// Cancel the task. Returns true iff it had already completed before we
    /// could cancel it.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }

    /// Run the task now instead of waiting till the original time.
    pub fn trigger_now(&self) {
        self.early.notify_one();
    }
}

/// Allow a `ScheduledTask` to be directly `await`ed.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// How long from the current instant until `fire_at`.
/// An instant in the past produces a duration of zero.
fn delay_until(fire_at: DateTime<Utc>) -> Duration {
    (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Duration as ChronoDuration;
    use rocket::tokio::time::sleep;

    #[rocket::async_test]
    async fn executes_at_the_scheduled_time() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let fire_at = Utc::now() + ChronoDuration::milliseconds(30);
        let task = ScheduledTask::new(async move { flag.store(true, Ordering::SeqCst) }, fire_at);

        assert!(!ran.load(Ordering::SeqCst));
        task.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[rocket::async_test]
    async fn cancel_prevents_execution() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let fire_at = Utc::now() + ChronoDuration::seconds(60);
        let task = ScheduledTask::new(async move { flag.store(true, Ordering::SeqCst) }, fire_at);

        let already_completed = task.cancel().await;
        assert!(!already_completed);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[rocket::async_test]
    async fn trigger_now_runs_early() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let fire_at = Utc::now() + ChronoDuration::seconds(60);
        let task = ScheduledTask::new(async move { flag.store(true, Ordering::SeqCst) }, fire_at);

        task.trigger_now();
        task.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[rocket::async_test]
    async fn past_instant_executes_immediately() {
        let fire_at = Utc::now() - ChronoDuration::seconds(5);
        let task = ScheduledTask::new(async { 42 }, fire_at);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(task.await.unwrap(), 42);
    }
}
