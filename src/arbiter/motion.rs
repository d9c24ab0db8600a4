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
//! Pointer motion history and velocity smoothing.

/// Number of motion samples kept for smoothing.
pub const HISTORY_LEN: usize = 8;
/// Pairs further apart than this are treated as a pause, not motion.
const MAX_PAIR_GAP: f64 = 0.1;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    /// Seconds.
    pub t: f64,
}

/// Fixed ring of the most recent pointer positions.
#[derive(Debug, Default)]
pub struct MotionHistory {
    samples: [MotionSample; HISTORY_LEN],
    /// Index of the next write.
    head: usize,
    len: usize,
}

impl MotionHistory {
    pub fn new() -> MotionHistory {
        MotionHistory::default()
    }

    pub fn push(&mut self, x: f32, y: f32, t: f64) {
        self.samples[self.head] = MotionSample { x, y, t };
        self.head = (self.head + 1) % HISTORY_LEN;
        self.len = (self.len + 1).min(HISTORY_LEN);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MotionSample> + '_ {
        let start = (self.head + HISTORY_LEN - self.len) % HISTORY_LEN;
        (0..self.len).map(move |i| &self.samples[(start + i) % HISTORY_LEN])
    }

    /// Mean speed in px/s over consecutive pairs with a usable time delta.
    /// Zero when there is no such pair.
    pub fn velocity(&self) -> f32 {
        let mut total = 0.0f64;
        let mut pairs = 0usize;
        let mut previous: Option<&MotionSample> = None;
        for current in self.iter() {
            if let Some(previous) = previous {
                let dt = current.t - previous.t;
                if dt > 0.0 && dt < MAX_PAIR_GAP {
                    let dx = (current.x - previous.x) as f64;
                    let dy = (current.y - previous.y) as f64;
                    total += (dx * dx + dy * dy).sqrt() / dt;
                    pairs += 1;
                }
            }
            previous = Some(current);
        }
        if pairs == 0 {
            0.0
        } else {
            (total / pairs as f64) as f32
        }
    }
}
