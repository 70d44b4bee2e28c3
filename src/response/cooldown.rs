//! Per-check corrective-action cooldown

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::{CheckEvent, CheckId};

/// Drops events for checks that were corrected less than one cooldown ago.
///
/// A corrective write changes a physical process variable and its effect
/// only shows up in later frames, so a second correction for the same check
/// is held back until the window expires. One window per check id; this is
/// not a counter. Expired entries are evicted lazily on each call.
///
/// A cooldown too long to represent as an `Instant` opens a window that
/// never closes (`None` expiry).
#[derive(Debug)]
pub struct CooldownFilter {
    cooldown: Duration,
    expiries: HashMap<CheckId, Option<Instant>>,
}

fn still_cooling(expiry: Option<Instant>, now: Instant) -> bool {
    expiry.map_or(true, |expiry| expiry > now)
}

impl CooldownFilter {
    /// Create a filter with one cooldown shared by every check.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            expiries: HashMap::new(),
        }
    }

    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit the events whose check is not cooling down and arm a window for
    /// each admitted check.
    ///
    /// Entries expiring at or before `now` are evicted first. Of several
    /// events for the same check in one batch only the first is admitted.
    pub fn filter(&mut self, events: Vec<CheckEvent>, now: Instant) -> Vec<CheckEvent> {
        self.expiries.retain(|_, expiry| still_cooling(*expiry, now));

        let mut admitted = Vec::with_capacity(events.len());
        for event in events {
            if self.expiries.contains_key(&event.check_id) {
                debug!(
                    check_id = %event.check_id,
                    frame_id = event.frame_id,
                    "Event suppressed by cooldown"
                );
                continue;
            }
            self.expiries
                .insert(event.check_id.clone(), now.checked_add(self.cooldown));
            admitted.push(event);
        }
        admitted
    }

    /// Whether `check_id` would be suppressed at `now`.
    pub fn is_cooling(&self, check_id: &str, now: Instant) -> bool {
        self.expiries
            .get(check_id)
            .is_some_and(|expiry| still_cooling(*expiry, now))
    }

    /// Time left in the window for `check_id`, if one is active at `now`.
    pub fn remaining(&self, check_id: &str, now: Instant) -> Option<Duration> {
        self.expiries
            .get(check_id)
            .and_then(|expiry| match expiry {
                Some(expiry) => expiry.checked_duration_since(now),
                None => Some(Duration::MAX),
            })
            .filter(|d| !d.is_zero())
    }

    /// Number of tracked windows, expired ones included until the next call.
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}
