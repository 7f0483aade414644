//! Fixed-rate snapshot push and the passive mirror on the receiving side.
//!
//! Every tick sends one complete GAME_STATE built from the local engine;
//! there is no delta tracking, acknowledgement or retransmission. A lost
//! tick is simply superseded by the next one. The receiver replaces its
//! mirror wholesale with whatever arrived last.

use crate::attack::flush_attack_rows;
use crate::engine::LocalEngine;
use log::{debug, trace};
use shared::{GameSnapshot, Packet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use transport::Endpoint;

/// Anything packets can be handed to without blocking.
pub trait Outbound {
    /// Returns `false` when the packet could not be queued.
    fn send(&self, packet: Packet) -> bool;
}

impl Outbound for Endpoint {
    fn send(&self, packet: Packet) -> bool {
        Endpoint::send(self, packet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(33),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub state_sent: bool,
    pub attack_rows: usize,
}

#[derive(Debug, Default)]
pub struct Synchronizer {
    ticks: u64,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sync step: a full GAME_STATE, then any owed attack rows.
    pub fn tick<E, O>(&mut self, engine: &mut E, outbound: &O) -> TickReport
    where
        E: LocalEngine + ?Sized,
        O: Outbound + ?Sized,
    {
        self.ticks += 1;
        let state_sent = outbound.send(Packet::game_state(engine.snapshot()));
        let attack_rows = flush_attack_rows(engine, outbound);
        if attack_rows > 0 {
            debug!("Tick {}: sent {} attack rows", self.ticks, attack_rows);
        }
        TickReport {
            state_sent,
            attack_rows,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Background task driving a [`Synchronizer`] at a fixed rate. Stops when
/// dropped.
pub struct SyncTask {
    handle: JoinHandle<()>,
}

impl SyncTask {
    pub fn spawn<E, O>(config: &SyncConfig, engine: Arc<Mutex<E>>, outbound: O) -> Self
    where
        E: LocalEngine + Send + 'static,
        O: Outbound + Send + Sync + 'static,
    {
        let period = config.interval;
        let handle = tokio::spawn(async move {
            let mut sync = Synchronizer::new();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let report = {
                    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
                    sync.tick(&mut *engine, &outbound)
                };
                if !report.state_sent {
                    trace!("Sync tick {} had nowhere to go", sync.ticks());
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct MirrorState {
    snapshot: Option<GameSnapshot>,
    received: u64,
}

/// Read-only copy of the opponent's board. One writer (the packet handler),
/// any number of readers.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    inner: Arc<RwLock<MirrorState>>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the previous snapshot entirely.
    pub fn inject_complete_state(&self, snapshot: GameSnapshot) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = Some(snapshot);
        state.received += 1;
    }

    pub fn snapshot(&self) -> Option<GameSnapshot> {
        self.with_snapshot(|snapshot| snapshot.cloned())
    }

    /// Borrows the current snapshot without cloning it.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(Option<&GameSnapshot>) -> R) -> R {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(state.snapshot.as_ref())
    }

    /// Number of snapshots injected so far.
    pub fn received(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).received
    }

    /// Forgets the previous opponent. Only the controller does this, when it
    /// opens a new connection.
    pub(crate) fn clear(&self) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *state = MirrorState::default();
    }
}
