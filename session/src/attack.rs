//! Outgoing penalty rows.
//!
//! Rows owed to the opponent pile up here between sync ticks and leave as a
//! single ATTACK_BLOCKS packet when the next tick drains the queue.

use crate::engine::LocalEngine;
use crate::sync::Outbound;
use log::debug;
use shared::{AttackRow, Packet};
use std::collections::VecDeque;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttackQueue {
    rows: VecDeque<AttackRow>,
}

impl AttackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: AttackRow) {
        self.rows.push_back(row);
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = AttackRow>) {
        self.rows.extend(rows);
    }

    /// Takes every queued row, oldest first.
    pub fn drain_all(&mut self) -> Vec<AttackRow> {
        self.rows.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Drains the engine's outgoing rows into at most one ATTACK_BLOCKS packet.
/// Returns how many rows went out.
pub fn flush_attack_rows<E, O>(engine: &mut E, outbound: &O) -> usize
where
    E: LocalEngine + ?Sized,
    O: Outbound + ?Sized,
{
    let rows = engine.drain_outgoing_attack_rows();
    if rows.is_empty() {
        return 0;
    }

    let count = rows.len();
    if !outbound.send(Packet::attack(rows)) {
        debug!("Attack of {} rows dropped, link is down", count);
    }
    count
}
