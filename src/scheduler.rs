//! One-shot silent refresh timer.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::session::now_millis;

/// Lead time before expiry at which the refresh fires
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Time to wait before refreshing: `max(0, expires_at - now - threshold)`
pub fn refresh_delay(expires_at_ms: i64, now_ms: i64, threshold: Duration) -> Duration {
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
    let delay_ms = expires_at_ms
        .saturating_sub(now_ms)
        .saturating_sub(threshold_ms);
    Duration::from_millis(delay_ms.max(0) as u64)
}

/// Wall-clock time `delay` after `now`, saturating at the latest representable instant
fn due_time(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    i64::try_from(delay.as_millis())
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct ScheduledRefresh {
    id: u64,
    due: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Holds at most one pending refresh timer.
///
/// `schedule` is a no-op while a timer is pending. When the timer fires it
/// releases that guard before running the callback, so the callback may
/// schedule the next refresh.
pub struct RefreshScheduler {
    threshold: Duration,
    pending: Arc<Mutex<Option<ScheduledRefresh>>>,
    next_id: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Schedule `on_fire` ahead of `expires_at_ms`, measured from now.
    ///
    /// Returns when the timer is due, or `None` if one was already pending.
    pub async fn schedule<F, Fut>(&self, expires_at_ms: i64, on_fire: F) -> Option<DateTime<Utc>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_from(expires_at_ms, now_millis(), on_fire).await
    }

    /// Schedule against an explicit current time
    pub async fn schedule_from<F, Fut>(
        &self,
        expires_at_ms: i64,
        now_ms: i64,
        on_fire: F,
    ) -> Option<DateTime<Utc>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_ahead(expires_at_ms, now_ms, self.threshold, on_fire)
            .await
    }

    /// Schedule `on_fire` at `expires_at_ms - lead`, sharing the same guard
    pub async fn schedule_ahead<F, Fut>(
        &self,
        expires_at_ms: i64,
        now_ms: i64,
        lead: Duration,
        on_fire: F,
    ) -> Option<DateTime<Utc>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // held across the spawn so a zero-delay task cannot fire before its
        // entry is recorded
        let mut slot = self.pending.lock().await;
        if let Some(existing) = slot.as_ref() {
            trace!(due = %existing.due, "Refresh already scheduled");
            return None;
        }

        let delay = refresh_delay(expires_at_ms, now_ms, lead);
        let due = due_time(Utc::now(), delay);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            {
                let mut slot = pending.lock().await;
                if slot.as_ref().is_some_and(|s| s.id == id) {
                    slot.take();
                }
            }

            debug!(id, "Scheduled refresh firing");
            on_fire().await;
        });

        debug!(id, delay_ms = delay.as_millis() as u64, due = %due, "Refresh scheduled");
        *slot = Some(ScheduledRefresh { id, due, handle });
        Some(due)
    }

    /// Cancel the pending timer, returning whether there was one
    pub async fn cancel(&self) -> bool {
        match self.pending.lock().await.take() {
            Some(scheduled) => {
                scheduled.handle.abort();
                debug!(id = scheduled.id, "Scheduled refresh cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    /// When the pending timer is due
    pub async fn due_at(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().await.as_ref().map(|s| s.due)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.pending.try_lock() {
            if let Some(scheduled) = slot.take() {
                scheduled.handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const MINUTE_MS: i64 = 60_000;
    const NOW: i64 = 1_700_000_000_000;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() -> futures::future::Ready<()> + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        })
    }

    #[test]
    fn test_refresh_delay() {
        let threshold = DEFAULT_REFRESH_THRESHOLD;
        assert_eq!(
            refresh_delay(NOW + 10 * MINUTE_MS, NOW, threshold),
            Duration::from_secs(5 * 60)
        );
        assert_eq!(refresh_delay(NOW + MINUTE_MS, NOW, threshold), Duration::ZERO);
        assert_eq!(refresh_delay(NOW - MINUTE_MS, NOW, threshold), Duration::ZERO);
        assert!(!refresh_delay(i64::MAX, i64::MIN, threshold).is_zero());
    }

    #[test]
    fn test_due_time_saturates() {
        let now = Utc::now();
        assert_eq!(due_time(now, Duration::from_secs(60)), now + TimeDelta::seconds(60));
        assert_eq!(due_time(now, Duration::from_millis(u64::MAX)), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test(start_paused = true)]
    async fn test_far_future_expiry_schedules_without_firing() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (count, on_fire) = counter();

        let due = scheduler.schedule_from(i64::MAX, NOW, on_fire).await;
        assert_eq!(due, Some(DateTime::<Utc>::MAX_UTC));

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_scheduled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_ahead_uses_its_own_lead() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (count, on_fire) = counter();

        scheduler
            .schedule_ahead(NOW + MINUTE_MS, NOW, Duration::ZERO, on_fire)
            .await;
        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_threshold_not_immediately() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (count, on_fire) = counter();

        let due = scheduler.schedule_from(NOW + 10 * MINUTE_MS, NOW, on_fire).await;
        assert!(due.is_some());
        assert!(scheduler.is_scheduled().await);

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(5 * 60 - 1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_immediately_inside_threshold() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (count, on_fire) = counter();
        let start = tokio::time::Instant::now();

        scheduler.schedule_from(NOW + MINUTE_MS, NOW, on_fire).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (count, on_fire) = counter();

        scheduler.schedule_from(NOW + 10 * MINUTE_MS, NOW, on_fire).await;
        assert!(scheduler.cancel().await);
        assert!(!scheduler.cancel().await);

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_blocks_double_schedule_until_fired() {
        let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
        let (first, on_first) = counter();
        let (second, on_second) = counter();

        assert!(scheduler.schedule_from(NOW + 10 * MINUTE_MS, NOW, on_first).await.is_some());
        assert!(scheduler.schedule_from(NOW + 6 * MINUTE_MS, NOW, on_second).await.is_none());

        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        // guard released after firing
        let (third, on_third) = counter();
        assert!(scheduler.schedule_from(NOW, NOW, on_third).await.is_some());
        settle().await;
        assert_eq!(third.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_reschedule() {
        let scheduler = Arc::new(RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD));
        let (count, on_fire) = counter();
        let inner = Arc::clone(&scheduler);

        scheduler
            .schedule_from(NOW, NOW, move || async move {
                inner.schedule_from(NOW + 10 * MINUTE_MS, NOW, on_fire).await;
            })
            .await;
        settle().await;

        assert!(scheduler.is_scheduled().await);
        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_timer() {
        let (count, on_fire) = counter();
        {
            let scheduler = RefreshScheduler::new(DEFAULT_REFRESH_THRESHOLD);
            scheduler.schedule_from(NOW + 10 * MINUTE_MS, NOW, on_fire).await;
        }

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
