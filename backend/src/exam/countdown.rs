// src/exam/countdown.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};

/// Source of wall-clock time. Injected so countdown behaviour can be tested.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Seconds left before `started_at + duration_seconds`, rounded up.
///
/// Always recomputed from the clock, so it cannot drift however late the
/// caller wakes up. Never exceeds `duration_seconds`.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration_seconds: u32, now: DateTime<Utc>) -> u64 {
    let duration_ms = i64::from(duration_seconds) * 1000;
    let left_ms = started_at.timestamp_millis() + duration_ms - now.timestamp_millis();
    if left_ms <= 0 {
        return 0;
    }
    let left_ms = left_ms.min(duration_ms);
    ((left_ms + 999) / 1000) as u64
}

/// Whole seconds since `started_at`, in `[0, duration_seconds]`.
pub fn elapsed_seconds(started_at: DateTime<Utc>, duration_seconds: u32, now: DateTime<Utc>) -> u64 {
    let elapsed_ms = (now - started_at).num_milliseconds().max(0);
    ((elapsed_ms / 1000) as u64).min(u64::from(duration_seconds))
}

/// Delay until the next whole-second boundary measured from `started_at`.
/// The displayed remaining value only changes on those boundaries.
pub fn delay_until_next_tick(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let elapsed_ms = (now - started_at).num_milliseconds();
    if elapsed_ms < 0 {
        return Duration::from_millis(elapsed_ms.unsigned_abs());
    }
    Duration::from_millis((1000 - elapsed_ms.rem_euclid(1000)) as u64)
}

/// What readers of a countdown see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownStatus {
    pub remaining_seconds: u64,
    pub finished: bool,
    /// Finished because time ran out, not because of `finish`.
    pub expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownPhase {
    Idle,
    Running,
    Finished,
}

/// Wall-clock anchored countdown for one session.
///
/// `idle -> running -> finished`. `stop` only cancels the scheduled wake-up
/// and returns to `idle`; `finished` is terminal. The expiry hook runs at most
/// once, and never after `finish` has been called.
pub struct Countdown {
    started_at: DateTime<Utc>,
    duration_seconds: u32,
    clock: Arc<dyn Clock>,
    status: Arc<watch::Sender<CountdownStatus>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    pub fn new(started_at: DateTime<Utc>, duration_seconds: u32, clock: Arc<dyn Clock>) -> Self {
        let initial = CountdownStatus {
            remaining_seconds: remaining_seconds(started_at, duration_seconds, clock.now()),
            finished: false,
            expired: false,
        };
        let (status, _) = watch::channel(initial);
        Self {
            started_at,
            duration_seconds,
            clock,
            status: Arc::new(status),
            stop: None,
            task: None,
        }
    }

    pub fn phase(&self) -> CountdownPhase {
        if self.status.borrow().finished {
            return CountdownPhase::Finished;
        }
        match &self.task {
            Some(task) if self.stop.is_some() && !task.is_finished() => CountdownPhase::Running,
            _ => CountdownPhase::Idle,
        }
    }

    pub fn status(&self) -> CountdownStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CountdownStatus> {
        self.status.subscribe()
    }

    /// Arms the countdown. No-op unless idle.
    pub fn start<F, Fut>(&mut self, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.phase() != CountdownPhase::Idle {
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            self.started_at,
            self.duration_seconds,
            self.clock.clone(),
            self.status.clone(),
            stop_rx,
            on_expire,
        ));

        self.stop = Some(stop_tx);
        self.task = Some(task);
    }

    /// Cancels the scheduled wake-up. The session itself is untouched.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stops the countdown for good, suppressing the expiry hook.
    /// Returns false if the countdown had already finished.
    pub fn finish(&mut self) -> bool {
        self.stop();
        self.status.send_if_modified(|status| {
            if status.finished {
                return false;
            }
            status.finished = true;
            true
        })
    }
}

async fn run<F, Fut>(
    started_at: DateTime<Utc>,
    duration_seconds: u32,
    clock: Arc<dyn Clock>,
    status: Arc<watch::Sender<CountdownStatus>>,
    mut stop: oneshot::Receiver<()>,
    on_expire: F,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let now = clock.now();
        let remaining = remaining_seconds(started_at, duration_seconds, now);

        // Published value only ever goes down.
        status.send_if_modified(|s| {
            if remaining < s.remaining_seconds {
                s.remaining_seconds = remaining;
                true
            } else {
                false
            }
        });

        if remaining == 0 {
            break;
        }

        // A dropped sender also lands here, so dropping the Countdown stops the task.
        tokio::select! {
            _ = tokio::time::sleep(delay_until_next_tick(started_at, now)) => {}
            _ = &mut stop => return,
        }
    }

    let first = status.send_if_modified(|s| {
        if s.finished {
            return false;
        }
        s.finished = true;
        s.expired = true;
        true
    });

    if first {
        on_expire().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wall clock that follows tokio's (pausable) clock.
    struct TokioClock {
        origin: DateTime<Utc>,
        instant: tokio::time::Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                origin: Utc::now(),
                instant: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = tokio::time::Instant::now() - self.instant;
            self.origin + ChronoDuration::from_std(elapsed).unwrap()
        }
    }

    #[test]
    fn test_remaining_equals_duration_at_start() {
        let start = Utc::now();
        assert_eq!(remaining_seconds(start, 1800, start), 1800);
        assert_eq!(remaining_seconds(start, 1800, start + ChronoDuration::milliseconds(1)), 1800);
        assert_eq!(remaining_seconds(start, 1800, start + ChronoDuration::milliseconds(1000)), 1799);
    }

    #[test]
    fn test_remaining_is_zero_after_deadline() {
        let now = Utc::now();
        let start = now - ChronoDuration::milliseconds(1_800_000);
        assert_eq!(remaining_seconds(start, 1800, now), 0);
        assert_eq!(remaining_seconds(start, 1800, now + ChronoDuration::seconds(60)), 0);
    }

    #[test]
    fn test_remaining_never_exceeds_duration() {
        let now = Utc::now();
        let start = now + ChronoDuration::seconds(10);
        assert_eq!(remaining_seconds(start, 30, now), 30);
    }

    #[test]
    fn test_delay_aligns_to_second_boundary() {
        let start = Utc::now();
        assert_eq!(delay_until_next_tick(start, start), Duration::from_millis(1000));
        assert_eq!(
            delay_until_next_tick(start, start + ChronoDuration::milliseconds(2300)),
            Duration::from_millis(700)
        );
        assert_eq!(
            delay_until_next_tick(start, start + ChronoDuration::milliseconds(4999)),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_elapsed_is_capped() {
        let start = Utc::now();
        assert_eq!(elapsed_seconds(start, 60, start + ChronoDuration::milliseconds(1999)), 1);
        assert_eq!(elapsed_seconds(start, 60, start + ChronoDuration::seconds(600)), 60);
        assert_eq!(elapsed_seconds(start, 60, start - ChronoDuration::seconds(5)), 0);
    }

    #[tokio::test]
    async fn test_expired_session_fires_once_immediately() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let start = Utc::now() - ChronoDuration::milliseconds(1_800_000);
        let fired = Arc::new(AtomicUsize::new(0));

        let mut countdown = Countdown::new(start, 1800, clock);
        assert_eq!(countdown.status().remaining_seconds, 0);

        let (done_tx, done_rx) = oneshot::channel();
        let counter = fired.clone();
        countdown.start(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("expiry hook not called")
            .unwrap();

        assert!(countdown.status().expired);

        // Neither a late manual finish nor a restart fires the hook again.
        assert!(!countdown.finish());
        let counter = fired.clone();
        countdown.start(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        assert_eq!(countdown.phase(), CountdownPhase::Finished);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_wall_clock_boundaries() {
        let clock = Arc::new(TokioClock::new());
        // Started 300ms ago, so boundaries are not aligned with this test's start.
        let start = clock.now() - ChronoDuration::milliseconds(300);
        let mut countdown = Countdown::new(start, 5, clock.clone());
        let mut rx = countdown.subscribe();

        let (done_tx, done_rx) = oneshot::channel();
        countdown.start(move || async move {
            let _ = done_tx.send(());
        });
        assert_eq!(countdown.phase(), CountdownPhase::Running);

        let mut seen = vec![rx.borrow().remaining_seconds];
        while rx.changed().await.is_ok() {
            let status = *rx.borrow();
            if status.remaining_seconds != *seen.last().unwrap() {
                seen.push(status.remaining_seconds);
            }
            if status.finished {
                break;
            }
        }
        done_rx.await.unwrap();

        assert_eq!(seen, vec![5, 4, 3, 2, 1, 0]);
        // Expired exactly five seconds after the recorded start.
        let overshoot = clock.now() - (start + ChronoDuration::seconds(5));
        assert!(overshoot >= ChronoDuration::zero());
        assert!(overshoot < ChronoDuration::milliseconds(5));
        assert_eq!(countdown.phase(), CountdownPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_suppresses_expiry() {
        let clock = Arc::new(TokioClock::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let mut countdown = Countdown::new(clock.now(), 3, clock.clone());

        let counter = fired.clone();
        countdown.start(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(countdown.finish());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(countdown.status().finished);
        assert!(!countdown.status().expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_to_idle_and_can_resume() {
        let clock = Arc::new(TokioClock::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let start = clock.now();
        let mut countdown = Countdown::new(start, 4, clock.clone());

        let counter = fired.clone();
        countdown.start(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(1200)).await;
        countdown.stop();
        tokio::task::yield_now().await;
        assert_eq!(countdown.phase(), CountdownPhase::Idle);

        // Time keeps passing while nobody is watching.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Resuming recomputes from the start timestamp and expires at once.
        let counter = fired.clone();
        countdown.start(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(countdown.phase(), CountdownPhase::Finished);
    }
}
