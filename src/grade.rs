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
//! Storage performance tiers and the budgets derived from them.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Performance tier of the storage card holding the body pak.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CardGrade {
    High,
    #[default]
    Medium,
    Low,
}

impl CardGrade {
    fn to_u8(self) -> u8 {
        match self {
            CardGrade::High => 0,
            CardGrade::Medium => 1,
            CardGrade::Low => 2,
        }
    }

    fn from_u8(value: u8) -> CardGrade {
        match value {
            0 => CardGrade::High,
            1 => CardGrade::Medium,
            _ => CardGrade::Low,
        }
    }

    /// Upper bound on resident body PCM bytes.
    pub fn cache_ceiling_bytes(self) -> usize {
        match self {
            CardGrade::High => 32 * MIB,
            CardGrade::Medium => 16 * MIB,
            CardGrade::Low => 8 * MIB,
        }
    }

    /// Minimum number of bytes fetched per body read.
    pub fn read_size_bytes(self) -> usize {
        match self {
            CardGrade::High => 256 * KIB,
            CardGrade::Medium => 192 * KIB,
            CardGrade::Low => 128 * KIB,
        }
    }

    /// Longest body preview that will be decoded, in milliseconds.
    pub fn max_body_ms(self) -> u32 {
        match self {
            CardGrade::High => 4000,
            CardGrade::Medium => 3000,
            CardGrade::Low => 1500,
        }
    }

    /// Maximum number of voices allowed to play body audio at once.
    pub fn max_body_streams(self) -> usize {
        match self {
            CardGrade::High => 3,
            CardGrade::Medium => 2,
            CardGrade::Low => 0,
        }
    }

    /// Minimum spacing between any two accepted triggers.
    pub fn min_trigger_spacing(self) -> Duration {
        match self {
            CardGrade::High => Duration::from_millis(18),
            CardGrade::Medium => Duration::from_millis(21),
            CardGrade::Low => Duration::from_millis(24),
        }
    }

    /// Number of k-NN neighbors whose bodies are prefetched alongside a dwelled-on sample.
    pub fn neighbor_prefetch(self) -> usize {
        match self {
            CardGrade::High => 4,
            CardGrade::Medium => 2,
            CardGrade::Low => 0,
        }
    }
}

impl fmt::Display for CardGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardGrade::High => "high",
            CardGrade::Medium => "medium",
            CardGrade::Low => "low",
        };
        f.write_str(name)
    }
}

impl FromStr for CardGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "gold" => Ok(CardGrade::High),
            "medium" | "ok" => Ok(CardGrade::Medium),
            "low" | "slow" => Ok(CardGrade::Low),
            other => Err(format!("unknown card grade: {}", other)),
        }
    }
}

/// Process-wide grade knob. Clones observe the same value; every component
/// re-reads it at its next decision point.
#[derive(Clone, Debug)]
pub struct SharedGrade {
    grade: Arc<AtomicU8>,
}

impl SharedGrade {
    /// Creates a new shared grade.
    pub fn new(grade: CardGrade) -> SharedGrade {
        SharedGrade {
            grade: Arc::new(AtomicU8::new(grade.to_u8())),
        }
    }

    /// Returns the current grade.
    pub fn get(&self) -> CardGrade {
        CardGrade::from_u8(self.grade.load(Ordering::Acquire))
    }

    /// Changes the grade for every holder of this knob.
    pub fn set(&self, grade: CardGrade) {
        self.grade.store(grade.to_u8(), Ordering::Release);
    }
}

impl Default for SharedGrade {
    fn default() -> Self {
        SharedGrade::new(CardGrade::default())
    }
}
