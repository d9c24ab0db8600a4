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
//! A single preview voice: stub playback and the crossfade into a body.

use crate::pcm::PcmSlice;
use crate::SampleId;

/// Which buffer a voice is reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceMode {
    Stub,
    Body,
}

/// Buffers handed back by a voice. Fixed size so releasing never allocates.
pub type Retired = [Option<PcmSlice>; 2];

/// The stub a voice is fading out of during a bridge.
struct Tail {
    pcm: PcmSlice,
    position: usize,
    gain: f32,
}

/// A voice slot in the renderer's fixed pool.
pub struct Voice {
    /// Sample being played, 0 when free.
    id: SampleId,
    mode: VoiceMode,
    source: Option<PcmSlice>,
    position: usize,
    gain: f32,
    /// Fade-in level of `source`, ramping 0 to 1 after a bridge.
    crossfade: f32,
    tail: Option<Tail>,
    /// Trigger sequence number, used as the voice age when stealing.
    started: u64,
}

impl Voice {
    pub fn new() -> Voice {
        Voice {
            id: 0,
            mode: VoiceMode::Stub,
            source: None,
            position: 0,
            gain: 0.0,
            crossfade: 1.0,
            tail: None,
            started: 0,
        }
    }

    pub fn id(&self) -> SampleId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.id != 0
    }

    pub fn mode(&self) -> Option<VoiceMode> {
        self.is_active().then_some(self.mode)
    }

    pub fn started(&self) -> u64 {
        self.started
    }

    /// Frames left in the current source.
    pub fn remaining(&self) -> usize {
        self.source
            .as_ref()
            .map_or(0, |pcm| pcm.frames().saturating_sub(self.position))
    }

    /// True once the voice is inside the last fade window of its data.
    pub fn is_releasing(&self, fade_frames: usize) -> bool {
        self.is_active() && self.remaining() <= fade_frames
    }

    /// Starts a stub at full level. Returns whatever the slot was holding.
    pub fn start_stub(
        &mut self,
        id: SampleId,
        pcm: PcmSlice,
        gain: f32,
        started: u64,
    ) -> Retired {
        let retired = self.release();
        self.id = id;
        self.mode = VoiceMode::Stub;
        self.source = Some(pcm);
        self.position = 0;
        self.gain = gain;
        self.crossfade = 1.0;
        self.started = started;
        retired
    }

    /// Switches to `body`, keeping the current stub as the fading tail.
    /// Returns a previous tail still fading, if any.
    pub fn bridge(&mut self, body: PcmSlice, gain: f32) -> Option<PcmSlice> {
        let previous = self.tail.take().map(|tail| tail.pcm);
        if let Some(stub) = self.source.replace(body) {
            self.tail = Some(Tail {
                pcm: stub,
                position: self.position,
                gain: self.gain,
            });
        }
        self.mode = VoiceMode::Body;
        self.position = 0;
        self.gain = gain;
        self.crossfade = 0.0;
        previous
    }

    /// Frees the slot and hands back its buffers.
    pub fn release(&mut self) -> Retired {
        let retired = [self.source.take(), self.tail.take().map(|tail| tail.pcm)];
        self.id = 0;
        self.position = 0;
        self.crossfade = 1.0;
        retired
    }

    /// Adds this voice's next `out.len()` frames, scaled by `scale`, into `out`.
    /// `fade_step` is the per-frame crossfade increment. Returns true when the
    /// source has been exhausted.
    pub fn render_into(&mut self, out: &mut [f32], scale: f32, fade_step: f32) -> bool {
        let Some(source) = self.source.as_ref() else {
            return true;
        };

        let frames = out.len().min(source.frames().saturating_sub(self.position));
        let gain = self.gain * scale;
        for (frame, sample) in out.iter_mut().enumerate().take(frames) {
            let mut value = source.sample_f32(self.position + frame) * gain;
            if let Some(tail) = self.tail.as_ref() {
                value = value * self.crossfade
                    + tail.pcm.sample_f32(tail.position + frame)
                        * tail.gain
                        * scale
                        * (1.0 - self.crossfade);
                self.crossfade = (self.crossfade + fade_step).min(1.0);
            }
            *sample += value;
        }
        self.position += frames;

        if let Some(tail) = self.tail.as_mut() {
            tail.position += frames;
        }
        self.position >= source.frames()
    }

    /// Drops the finished tail once the fade has completed.
    pub fn take_finished_tail(&mut self) -> Option<PcmSlice> {
        if self.crossfade >= 1.0 {
            self.tail.take().map(|tail| tail.pcm)
        } else {
            None
        }
    }
}
