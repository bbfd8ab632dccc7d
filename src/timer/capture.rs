use std::{
    future::Future,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Armed,
    Fired,
    Cancelled,
}

/// One-shot, cancellable delay.
///
/// The callback runs at most once. Cancel and fire race on a single
/// compare-and-swap: a cancel that lands before the callback starts always
/// wins, a cancel that lands after it has started is a no-op.
pub struct CaptureTimer {
    phase: Arc<AtomicU8>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CaptureTimer {
    pub fn arm<F, Fut>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let phase = Arc::new(AtomicU8::new(ARMED));
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn({
            let phase = phase.clone();
            let token = cancel_token.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = time::sleep(delay) => {}
                }

                if phase
                    .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                on_fire().await;
            }
        });

        Self {
            phase,
            cancel_token,
            handle,
        }
    }

    /// Returns `true` when this call prevented the callback from running.
    pub fn cancel(&self) -> bool {
        let won = self
            .phase
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.cancel_token.cancel();
        won
    }

    pub fn phase(&self) -> TimerPhase {
        match self.phase.load(Ordering::Acquire) {
            ARMED => TimerPhase::Armed,
            FIRED => TimerPhase::Fired,
            _ => TimerPhase::Cancelled,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.phase() == TimerPhase::Fired
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase() == TimerPhase::Cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CaptureTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timer(delay: Duration) -> (CaptureTimer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = CaptureTimer::arm(delay, {
            let count = count.clone();
            move || async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        (timer, count)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (timer, count) = counting_timer(Duration::from_secs(3));

        time::sleep(Duration::from_millis(2_999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(timer.phase(), TimerPhase::Armed);

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(timer.has_fired());

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_wins() {
        let (timer, count) = counting_timer(Duration::from_secs(3));

        time::sleep(Duration::from_millis(500)).await;
        assert!(timer.cancel());
        assert!(!timer.cancel());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(timer.is_cancelled());
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_noop() {
        let (timer, count) = counting_timer(Duration::from_millis(10));

        time::sleep(Duration::from_millis(20)).await;
        assert!(!timer.cancel());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.phase(), TimerPhase::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_timer_cancels_it() {
        let (timer, count) = counting_timer(Duration::from_millis(10));
        drop(timer);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
