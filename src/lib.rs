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
//! Sample preview pipeline.
//!
//! Lets a user sweep a cursor across a scatter map of thousands of samples and
//! hear each one the moment the cursor lands on it:
//! - [`index::SpatialSampleIndex`] keeps every stub clip, coordinate and
//!   neighbor list in memory for instant lookups
//! - [`cache::StreamingPreviewCache`] streams longer preview bodies from
//!   storage on a background thread into a bounded LRU cache
//! - [`mixer::PreviewMixer`] and [`mixer::MixerRenderer`] play stubs, bridge
//!   to bodies once resident, and mix everything for the audio thread
//! - [`arbiter::TriggerArbiter`] turns pointer motion into a paced,
//!   deduplicated stream of triggers and prefetches
//!
//! [`system::PreviewSystem`] wires the four together.

pub mod arbiter;
pub mod cache;
pub mod config;
pub mod grade;
pub mod index;
pub mod mixer;
pub mod pcm;
pub mod system;

#[cfg(test)]
pub(crate) mod testutil;

/// Opaque sample identifier shared by the stub index and the body pak. Zero is
/// reserved and never names a sample.
pub type SampleId = u64;

pub use arbiter::{Gate, TickOutcome, TriggerArbiter};
pub use cache::StreamingPreviewCache;
pub use grade::{CardGrade, SharedGrade};
pub use index::SpatialSampleIndex;
pub use mixer::{BridgeOutcome, MixerRenderer, PreviewMixer};
pub use system::PreviewSystem;
