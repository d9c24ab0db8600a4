// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Trigger gates and the record of accepted triggers they consult.

use std::fmt;

use crate::SampleId;

/// Most accepted triggers in any rolling second.
pub const MAX_TRIGGERS_PER_SECOND: usize = 60;
/// A sample may not retrigger within this many seconds of its last trigger.
pub const SAME_SAMPLE_WINDOW: f64 = 0.100;
/// Number of recent triggers checked for same-sample suppression.
pub const RECENT_TRIGGERS: usize = 16;

/// The gate that rejected a candidate, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gate {
    /// The rolling-second trigger budget is spent.
    RateCap,
    /// Too soon after the previous trigger.
    Spacing,
    /// The same sample fired too recently.
    SameSample,
    /// The cursor is outside the candidate's radius, or another sample is closer.
    Voronoi,
    /// Fast motion onto a neighbor of the previous trigger.
    Similar,
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Gate::RateCap => "rate cap",
            Gate::Spacing => "spacing",
            Gate::SameSample => "same sample",
            Gate::Voronoi => "voronoi",
            Gate::Similar => "similar",
        };
        f.write_str(name)
    }
}

/// Fixed-size ring of `(id, time)` pairs, newest last.
#[derive(Debug)]
struct Ring<const N: usize> {
    entries: [(SampleId, f64); N],
    head: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    fn new() -> Self {
        Ring {
            entries: [(0, 0.0); N],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, id: SampleId, t: f64) {
        self.entries[self.head] = (id, t);
        self.head = (self.head + 1) % N;
        self.len = (self.len + 1).min(N);
    }

    /// Oldest retained entry.
    fn oldest(&self) -> Option<(SampleId, f64)> {
        if self.len == 0 {
            return None;
        }
        Some(self.entries[(self.head + N - self.len) % N])
    }

    fn iter(&self) -> impl Iterator<Item = &(SampleId, f64)> + '_ {
        let start = (self.head + N - self.len) % N;
        (0..self.len).map(move |i| &self.entries[(start + i) % N])
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Accepted triggers, oldest dropped first.
#[derive(Debug)]
pub struct TriggerLog {
    /// Times of the last MAX_TRIGGERS_PER_SECOND triggers.
    window: Ring<MAX_TRIGGERS_PER_SECOND>,
    recent: Ring<RECENT_TRIGGERS>,
    last: Option<(SampleId, f64)>,
}

impl TriggerLog {
    pub fn new() -> TriggerLog {
        TriggerLog {
            window: Ring::new(),
            recent: Ring::new(),
            last: None,
        }
    }

    pub fn record(&mut self, id: SampleId, t: f64) {
        self.window.push(id, t);
        self.recent.push(id, t);
        self.last = Some((id, t));
    }

    pub fn last(&self) -> Option<(SampleId, f64)> {
        self.last
    }

    pub fn last_id(&self) -> Option<SampleId> {
        self.last.map(|(id, _)| id)
    }

    /// Accepted triggers in the second ending at `now`.
    pub fn in_last_second(&self, now: f64) -> usize {
        self.window
            .iter()
            .filter(|&&(_, t)| now - t < 1.0 && t <= now)
            .count()
    }

    /// True if one more trigger at `now` would exceed the rolling budget.
    pub fn rate_capped(&self, now: f64) -> bool {
        self.window.len == MAX_TRIGGERS_PER_SECOND
            && self.window.oldest().is_some_and(|(_, t)| now - t < 1.0)
    }

    /// True if less than `spacing` seconds have passed since the last trigger.
    pub fn too_soon(&self, now: f64, spacing: f64) -> bool {
        self.last.is_some_and(|(_, t)| now - t < spacing)
    }

    /// True if `id` fired within the same-sample window.
    pub fn fired_recently(&self, id: SampleId, now: f64) -> bool {
        self.recent
            .iter()
            .any(|&(recent, t)| recent == id && now - t < SAME_SAMPLE_WINDOW)
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.recent.clear();
        self.last = None;
    }
}
