//! Timer Service (spec §3 Timer, §9 "Timer implementation").
//!
//! A single monotonic min-heap keyed by deadline, running on its own task.
//! Cancellation never touches the heap directly — it bumps a per-timer
//! generation counter, and a popped heap entry whose generation is stale is
//! silently discarded. That is the only race-free way to cancel a timer
//! whose expiry event might already be queued behind other events (§5).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ConfigError, Error};

/// The five protocol timers named in SEMI E84 (spec §3 Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerId {
    /// Select → valid.
    Tp1,
    /// Valid → tr_req.
    Tp2,
    /// Tr_req → busy.
    Tp3,
    /// Busy duration.
    Tp4,
    /// Compt → valid low.
    Tp5,
}

impl TimerId {
    pub const ALL: [TimerId; 5] = [
        TimerId::Tp1,
        TimerId::Tp2,
        TimerId::Tp3,
        TimerId::Tp4,
        TimerId::Tp5,
    ];

    /// Recommended protocol-default maximum duration (spec §4.2).
    pub fn default_duration(self) -> Duration {
        match self {
            TimerId::Tp1 => Duration::from_secs(2),
            TimerId::Tp2 => Duration::from_secs(2),
            TimerId::Tp3 => Duration::from_secs(60),
            TimerId::Tp4 => Duration::from_secs(60),
            TimerId::Tp5 => Duration::from_secs(2),
        }
    }
}

/// Posted into the engine's event queue when a timer's deadline elapses
/// without being cancelled or re-armed in the meantime.
#[derive(Debug, Clone, Copy)]
pub struct TimerFired {
    pub id: TimerId,
    pub generation: u64,
}

enum Command {
    Arm { id: TimerId, duration: Duration, generation: u64 },
    Cancel { id: TimerId, generation: u64 },
}

/// Handle used by the rest of the engine to arm/cancel timers. Cheap to
/// clone; the actual heap lives in the task spawned by [`TimerService::spawn`].
#[derive(Clone)]
pub struct TimerService {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl TimerService {
    /// Spawn the timer loop. `fired_tx` is the engine's event queue —
    /// firing never calls back into any state machine directly.
    pub fn spawn(fired_tx: mpsc::Sender<TimerFired>) -> (Self, TimerGenerations) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let generations = TimerGenerations::new();
        let task_generations = generations.clone();
        tokio::spawn(run(cmd_rx, fired_tx, task_generations));
        (Self { cmd_tx }, generations)
    }

    /// Arm `id` for `duration`, cancelling and replacing any prior armed
    /// deadline for the same timer. Returns the new generation so the
    /// caller can recognize (and ignore) stale `TimerFired` events.
    pub fn arm(&self, id: TimerId, duration: Duration, generations: &TimerGenerations) -> u64 {
        let generation = generations.bump(id);
        let _ = self.cmd_tx.send(Command::Arm { id, duration, generation });
        generation
    }

    /// Cancel `id` if armed. A no-op if it was already unarmed or fired.
    pub fn cancel(&self, id: TimerId, generations: &TimerGenerations) {
        let generation = generations.bump(id);
        let _ = self.cmd_tx.send(Command::Cancel { id, generation });
    }
}

/// Validate timer overrides from configuration (spec §6, §7
/// `InvalidTimerValue`).
pub fn validate_override(id: TimerId, millis: u64) -> Result<Duration, Error> {
    if millis == 0 {
        return Err(Error::Config(ConfigError::InvalidTimerValue {
            timer: id,
            reason: "duration must be greater than zero".to_string(),
        }));
    }
    if millis > Duration::from_secs(600).as_millis() as u64 {
        return Err(Error::Config(ConfigError::InvalidTimerValue {
            timer: id,
            reason: "duration exceeds sane maximum of 600s".to_string(),
        }));
    }
    Ok(Duration::from_millis(millis))
}

/// Shared generation counters, one per timer id. Bumped by both `arm` (a
/// re-arm invalidates whatever was previously in flight) and `cancel`.
#[derive(Clone)]
pub struct TimerGenerations {
    inner: std::sync::Arc<std::sync::Mutex<HashMap<TimerId, u64>>>,
}

impl TimerGenerations {
    fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    fn bump(&self, id: TimerId) -> u64 {
        let mut map = self.inner.lock().unwrap();
        let gen = map.entry(id).or_insert(0);
        *gen += 1;
        *gen
    }

    /// Current generation for `id`, or `0` if never armed/cancelled.
    pub fn current(&self, id: TimerId) -> u64 {
        *self.inner.lock().unwrap().get(&id).unwrap_or(&0)
    }
}

async fn run(
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    fired_tx: mpsc::Sender<TimerFired>,
    generations: TimerGenerations,
) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>> = BinaryHeap::new();

    loop {
        let next_deadline = heap.peek().map(|Reverse((deadline, _, _))| *deadline);

        let command = match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    cmd = cmd_rx.recv() => cmd,
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some(Reverse((_, generation, id))) = heap.pop() {
                            if generations.current(id) == generation {
                                if fired_tx.send(TimerFired { id, generation }).await.is_err() {
                                    return;
                                }
                            }
                            // else: stale entry for a cancelled/re-armed timer, discard.
                        }
                        continue;
                    }
                }
            }
            None => cmd_rx.recv().await,
        };

        match command {
            Some(Command::Arm { id, duration, generation }) => {
                heap.push(Reverse((Instant::now() + duration, generation, id)));
            }
            Some(Command::Cancel { .. }) => {
                // Nothing to do to the heap itself; the bumped generation
                // (already applied by `bump` before the command was sent)
                // makes the stale entry self-discard when it's popped.
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_after_duration() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let (svc, gens) = TimerService::spawn(fired_tx);

        let generation = svc.arm(TimerId::Tp1, Duration::from_millis(20), &gens);
        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.id, TimerId::Tp1);
        assert_eq!(fired.generation, generation);
    }

    #[tokio::test]
    async fn cancel_suppresses_stale_fire() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let (svc, gens) = TimerService::spawn(fired_tx);

        svc.arm(TimerId::Tp2, Duration::from_millis(20), &gens);
        svc.cancel(TimerId::Tp2, &gens);
        svc.arm(TimerId::Tp3, Duration::from_millis(40), &gens);

        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.id, TimerId::Tp3);
    }

    #[tokio::test]
    async fn rearm_invalidates_previous_generation() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let (svc, gens) = TimerService::spawn(fired_tx);

        svc.arm(TimerId::Tp1, Duration::from_millis(500), &gens);
        let second_gen = svc.arm(TimerId::Tp1, Duration::from_millis(10), &gens);

        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.generation, second_gen);
    }

    #[test]
    fn invalid_timer_values_are_rejected() {
        assert!(validate_override(TimerId::Tp1, 0).is_err());
        assert!(validate_override(TimerId::Tp1, 10_000_000).is_err());
        assert!(validate_override(TimerId::Tp1, 500).is_ok());
    }
}
