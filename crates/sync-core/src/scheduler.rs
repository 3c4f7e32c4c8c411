//! Event sources that drive sync cycles: debounced data-change events,
//! throttled app-lifecycle events, and fire-now manual/immediate triggers.
//!
//! The debounce/throttle windows are caller-supplied rather than fixed
//! constants, generalizing the fixed foreground/jitter/snapshot intervals a
//! wall-clock polling scheduler would hardcode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCycleTrigger {
    Startup,
    Foreground,
    LocalMutation,
    Periodic,
    Manual,
}

struct SchedulerState {
    last_app_lifecycle_fire: Option<Instant>,
    debounce_generation: u64,
}

pub struct Scheduler {
    tx: mpsc::Sender<SyncCycleTrigger>,
    state: Mutex<SchedulerState>,
    debounce_window: Duration,
    throttle_window: Duration,
    enabled: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        debounce_window: Duration,
        throttle_window: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<SyncCycleTrigger>) {
        let (tx, rx) = mpsc::channel(32);
        let scheduler = Arc::new(Self {
            tx,
            state: Mutex::new(SchedulerState {
                last_app_lifecycle_fire: None,
                debounce_generation: 0,
            }),
            debounce_window,
            throttle_window,
            enabled: Arc::new(AtomicBool::new(true)),
        });
        (scheduler, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn cancel_sync(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn resume_sync(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Fires immediately, bypassing debounce/throttle. Used by signup,
    /// login, and other callers that need a sync cycle right now.
    pub async fn immediate(self: &Arc<Self>, trigger: SyncCycleTrigger) {
        if !self.is_enabled() {
            return;
        }
        let _ = self.tx.send(trigger).await;
    }

    /// N calls within the debounce window collapse into exactly one
    /// `LocalMutation` trigger fired after the window elapses from the
    /// last call.
    pub async fn data_changed(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }
        let generation = {
            let mut state = self.state.lock().await;
            state.debounce_generation += 1;
            state.debounce_generation
        };
        let this = Arc::clone(self);
        let window = self.debounce_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut state = this.state.lock().await;
            if state.debounce_generation == generation && this.is_enabled() {
                let _ = this.tx.send(SyncCycleTrigger::LocalMutation).await;
            }
            drop(state);
        });
    }

    /// At most one `Foreground` trigger per throttle window.
    pub async fn app_lifecycle(self: &Arc<Self>) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let should_fire = match state.last_app_lifecycle_fire {
            Some(last) => now.duration_since(last) >= self.throttle_window,
            None => true,
        };
        if should_fire {
            state.last_app_lifecycle_fire = Some(now);
            drop(state);
            let _ = self.tx.send(SyncCycleTrigger::Foreground).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rapid_data_changed_events_coalesce_into_one_trigger() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_millis(50), Duration::from_secs(600));
        for _ in 0..5 {
            scheduler.data_changed().await;
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger, SyncCycleTrigger::LocalMutation);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn app_lifecycle_is_throttled() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_millis(50), Duration::from_secs(10));
        scheduler.app_lifecycle().await;
        scheduler.app_lifecycle().await;
        assert_eq!(rx.recv().await.unwrap(), SyncCycleTrigger::Foreground);
        assert!(rx.try_recv().is_err());
        tokio::time::advance(Duration::from_secs(11)).await;
        scheduler.app_lifecycle().await;
        assert_eq!(rx.recv().await.unwrap(), SyncCycleTrigger::Foreground);
    }

    #[tokio::test]
    async fn cancel_suspends_all_sources() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_millis(10), Duration::from_secs(10));
        scheduler.cancel_sync();
        scheduler.immediate(SyncCycleTrigger::Manual).await;
        scheduler.app_lifecycle().await;
        assert!(rx.try_recv().is_err());
        scheduler.resume_sync();
        scheduler.immediate(SyncCycleTrigger::Manual).await;
        assert_eq!(rx.recv().await.unwrap(), SyncCycleTrigger::Manual);
    }
}
