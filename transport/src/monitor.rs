//! Liveness and lag tracking for a single link.
//!
//! The monitor never reads a clock itself; the heartbeat task and the receive
//! loop feed it `Instant`s. Only local monotonic time is compared, so the two
//! peers never need synchronized clocks.

use crate::config::LinkConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// PINGs awaiting a PONG. The link times out long before this fills up.
const MAX_OUTSTANDING_PINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    /// Edge of the lag flag. Never repeated while the flag is unchanged.
    LagChanged(bool),
    /// Silence exceeded the timeout. Reported once, after which the monitor
    /// stays quiet.
    TimedOut,
}

#[derive(Debug)]
pub struct LinkMonitor {
    lag_threshold: Duration,
    silence_timeout: Duration,
    /// Last time any packet arrived
    last_seen: Instant,
    /// Send times of unanswered PINGs, oldest first. PONGs come back in the
    /// order the PINGs went out.
    pings_in_flight: VecDeque<Instant>,
    latency: Option<Duration>,
    lagging: bool,
    expired: bool,
}

impl LinkMonitor {
    pub fn new(config: &LinkConfig, now: Instant) -> Self {
        Self {
            lag_threshold: config.lag_threshold,
            silence_timeout: config.silence_timeout,
            last_seen: now,
            pings_in_flight: VecDeque::new(),
            latency: None,
            lagging: false,
            expired: false,
        }
    }

    /// Records inbound traffic. Clears the lag flag immediately if it was set.
    pub fn mark_seen(&mut self, now: Instant) -> Option<LinkSignal> {
        if self.expired {
            return None;
        }

        self.last_seen = self.last_seen.max(now);
        if self.lagging {
            self.lagging = false;
            Some(LinkSignal::LagChanged(false))
        } else {
            None
        }
    }

    /// Queues the send time of a PING. Earlier unanswered PINGs keep their
    /// own send times.
    pub fn record_ping(&mut self, now: Instant) {
        if self.pings_in_flight.len() == MAX_OUTSTANDING_PINGS {
            self.pings_in_flight.pop_front();
        }
        self.pings_in_flight.push_back(now);
    }

    /// Round trip of the oldest unanswered PING. A PONG without an
    /// outstanding PING leaves the previous sample alone.
    pub fn record_pong(&mut self, now: Instant) -> Option<Duration> {
        let sent = self.pings_in_flight.pop_front()?;
        let rtt = now.saturating_duration_since(sent);
        self.latency = Some(rtt);
        Some(rtt)
    }

    /// Compares the current silence against both thresholds.
    pub fn evaluate(&mut self, now: Instant) -> Option<LinkSignal> {
        if self.expired {
            return None;
        }

        let silence = self.silence(now);
        if silence > self.silence_timeout {
            self.expired = true;
            return Some(LinkSignal::TimedOut);
        }

        if silence > self.lag_threshold && !self.lagging {
            self.lagging = true;
            Some(LinkSignal::LagChanged(true))
        } else if silence < self.lag_threshold && self.lagging {
            self.lagging = false;
            Some(LinkSignal::LagChanged(false))
        } else {
            None
        }
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn is_lagging(&self) -> bool {
        self.lagging
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }
}
