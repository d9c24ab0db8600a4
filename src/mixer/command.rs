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
//! Messages and status shared between the control handle and the renderer.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::cache::BodyBuffer;
use crate::pcm::PcmSlice;
use crate::SampleId;

use super::voice::VoiceMode;
use super::MAX_VOICES;

/// A request from the control thread, applied by the renderer at the start of
/// its next block.
pub enum MixerCommand {
    /// Start (or restart) the stub of `id`.
    PlayStub {
        id: SampleId,
        pcm: PcmSlice,
        gain: f32,
        seq: u64,
    },
    /// Crossfade the stub voice playing `id` over to its body.
    Bridge {
        id: SampleId,
        body: BodyBuffer,
        seq: u64,
    },
    /// Silence every voice.
    StopAll { seq: u64 },
}

impl MixerCommand {
    pub fn seq(&self) -> u64 {
        match self {
            MixerCommand::PlayStub { seq, .. }
            | MixerCommand::Bridge { seq, .. }
            | MixerCommand::StopAll { seq } => *seq,
        }
    }
}

const MODE_FREE: u8 = 0;
const MODE_STUB: u8 = 1;
const MODE_BODY: u8 = 2;

/// Voice snapshot published by the renderer after every block. Each field is
/// written only by the renderer.
pub struct MixerStatus {
    ids: [AtomicU64; MAX_VOICES],
    modes: [AtomicU8; MAX_VOICES],
    active: AtomicUsize,
    body_streams: AtomicUsize,
    /// Sequence number of the last command the renderer applied.
    applied_seq: AtomicU64,
}

impl MixerStatus {
    pub fn new() -> MixerStatus {
        MixerStatus {
            ids: std::array::from_fn(|_| AtomicU64::new(0)),
            modes: std::array::from_fn(|_| AtomicU8::new(MODE_FREE)),
            active: AtomicUsize::new(0),
            body_streams: AtomicUsize::new(0),
            applied_seq: AtomicU64::new(0),
        }
    }

    pub(super) fn publish_voice(&self, slot: usize, id: SampleId, mode: Option<VoiceMode>) {
        let mode = match mode {
            None => MODE_FREE,
            Some(VoiceMode::Stub) => MODE_STUB,
            Some(VoiceMode::Body) => MODE_BODY,
        };
        self.ids[slot].store(id, Ordering::Relaxed);
        self.modes[slot].store(mode, Ordering::Relaxed);
    }

    pub(super) fn publish_counts(&self, active: usize, body_streams: usize, applied_seq: u64) {
        self.active.store(active, Ordering::Relaxed);
        self.body_streams.store(body_streams, Ordering::Relaxed);
        self.applied_seq.store(applied_seq, Ordering::Release);
    }

    /// Mode of the voice playing `id`, if any.
    pub fn mode_of(&self, id: SampleId) -> Option<VoiceMode> {
        if id == 0 {
            return None;
        }
        (0..MAX_VOICES)
            .find(|&slot| self.ids[slot].load(Ordering::Relaxed) == id)
            .and_then(|slot| match self.modes[slot].load(Ordering::Relaxed) {
                MODE_STUB => Some(VoiceMode::Stub),
                MODE_BODY => Some(VoiceMode::Body),
                _ => None,
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn body_streams(&self) -> usize {
        self.body_streams.load(Ordering::Relaxed)
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq.load(Ordering::Acquire)
    }
}
