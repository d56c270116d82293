//! Time Wheel for TTL Callbacks
//!
//! A single-layer wheel: `S` slots advanced by a fixed-interval tick. A
//! scheduled task lands in slot `(current + delay_ticks) % S` carrying
//! `circles = delay_ticks / S`, the number of full revolutions to wait
//! before it is due. Each tick scans one slot: tasks with `circles > 0` are
//! decremented and stay; due tasks are removed and their callbacks run,
//! each in its own spawned task so one failing callback cannot take down
//! its siblings or the wheel.
//!
//! Adding, cancelling, and ticking are serialized through a single operator
//! task that consumes an add channel, a remove channel, the tick interval,
//! and a stop signal — no locks around the slot vector.
//!
//! The wheel is a cleanup optimization: reads perform their own lazy expiry
//! check, so a late or missed callback is never a correctness problem.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Tick interval of the server-wide wheel.
pub const TICK: Duration = Duration::from_secs(1);

/// Slot count of the server-wide wheel (one hour span at a 1s tick).
pub const SLOTS: usize = 3600;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    key: String,
    delay: Duration,
    job: Job,
}

struct Entry {
    key: String,
    circles: usize,
    job: Job,
}

/// Handle to a running time wheel.
pub struct TimeWheel {
    add_tx: mpsc::UnboundedSender<Task>,
    remove_tx: mpsc::UnboundedSender<String>,
    stop_tx: watch::Sender<bool>,
}

impl TimeWheel {
    /// Starts the operator task and returns a shared handle.
    pub fn start(tick: Duration, slots: usize) -> Arc<Self> {
        assert!(slots > 0 && !tick.is_zero());

        let (add_tx, add_rx) = mpsc::unbounded_channel();
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(operate(tick, slots, add_rx, remove_rx, stop_rx));

        Arc::new(Self {
            add_tx,
            remove_tx,
            stop_tx,
        })
    }

    /// Schedules `job` to run after `delay`. A later task under the same
    /// key supersedes the registry entry; the superseded callback still
    /// fires and must tolerate that (expiry callbacks re-check the TTL map).
    pub fn schedule(&self, delay: Duration, key: impl Into<String>, job: Job) {
        let _ = self.add_tx.send(Task {
            key: key.into(),
            delay,
            job,
        });
    }

    /// Schedules `job` at an absolute wall-clock time; past times fire on
    /// the next tick.
    pub fn schedule_at(&self, at: SystemTime, key: impl Into<String>, job: Job) {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.schedule(delay, key, job);
    }

    /// Cancels the task registered under `key`, if any.
    pub fn cancel(&self, key: &str) {
        let _ = self.remove_tx.send(key.to_string());
    }

    /// Stops the operator task.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

struct Wheel {
    slots: Vec<Vec<Entry>>,
    registry: HashMap<String, usize>,
    current: usize,
    tick: Duration,
}

impl Wheel {
    fn new(tick: Duration, slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| Vec::new()).collect(),
            registry: HashMap::new(),
            current: 0,
            tick,
        }
    }

    fn add(&mut self, task: Task) {
        let ticks = (task.delay.as_millis() / self.tick.as_millis().max(1)) as usize;
        let slot = (self.current + ticks) % self.slots.len();
        let circles = ticks / self.slots.len();

        self.slots[slot].push(Entry {
            key: task.key.clone(),
            circles,
            job: task.job,
        });
        self.registry.insert(task.key, slot);
    }

    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.registry.remove(key) {
            self.slots[slot].retain(|entry| entry.key != key);
        }
    }

    /// Advances the cursor one slot and returns the due jobs.
    fn advance(&mut self) -> Vec<Entry> {
        let bucket = std::mem::take(&mut self.slots[self.current]);
        let mut due = Vec::new();
        for mut entry in bucket {
            if entry.circles > 0 {
                entry.circles -= 1;
                self.slots[self.current].push(entry);
            } else {
                self.registry.remove(&entry.key);
                due.push(entry);
            }
        }
        self.current = (self.current + 1) % self.slots.len();
        due
    }
}

async fn operate(
    tick: Duration,
    slots: usize,
    mut add_rx: mpsc::UnboundedReceiver<Task>,
    mut remove_rx: mpsc::UnboundedReceiver<String>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut wheel = Wheel::new(tick, slots);
    let start = tokio::time::Instant::now() + tick;
    let mut ticker = tokio::time::interval_at(start, tick);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for entry in wheel.advance() {
                    // one task per callback: a panicking job only kills its
                    // own task
                    tokio::spawn(async move { (entry.job)() });
                }
            }
            Some(task) = add_rx.recv() => wheel.add(task),
            Some(key) = remove_rx.recv() => wheel.remove(&key),
            _ = stop_rx.changed() => {
                debug!("time wheel stopped");
                return;
            }
        }
    }
}
