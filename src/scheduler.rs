//! Named recurring tasks.
//!
//! A session runs its frame loop, countdown and spawner as independent tokio
//! tasks. Each task owns a tick closure that checks whether its session is still
//! live before doing anything else and returns `Tick::Stop` when it is not. That
//! check is what cancels the task; nothing else does.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// What a recurring task wants after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// Runs `tick` every `period`, first one period from now, until it returns `Tick::Stop`.
pub fn spawn_recurring<F>(name: &'static str, period: Duration, missed: MissedTickBehavior, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Tick + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(missed);
        let mut ticks: u64 = 0;

        loop {
            interval.tick().await;
            ticks += 1;
            if tick() == Tick::Stop {
                break;
            }
        }
        debug!(task = name, ticks = ticks, "recurring task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let started = Instant::now();

        let handle = spawn_recurring("test", Duration::from_secs(1), MissedTickBehavior::Burst, move || {
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 { Tick::Stop } else { Tick::Continue }
        });
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _handle = spawn_recurring("test", Duration::from_millis(100), MissedTickBehavior::Skip, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Tick::Continue
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
