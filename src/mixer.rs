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
//! Preview voice pool and mixer.
//!
//! The mixer is split in two. [`PreviewMixer`] lives on the control thread and
//! turns trigger and bridge requests into commands. [`MixerRenderer`] is owned
//! by the audio thread: it applies queued commands at the top of each block,
//! renders every voice, and publishes a status snapshot through atomics. The
//! render path takes no locks, performs no I/O, and never allocates or frees
//! PCM; retired buffers travel back to the control thread to be dropped there.

mod command;
mod limiter;
mod voice;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::StreamingPreviewCache;
use crate::grade::SharedGrade;
use crate::index::SpatialSampleIndex;
use crate::pcm::PcmSlice;
use crate::SampleId;

use command::{MixerCommand, MixerStatus};
pub use limiter::{soft_limit, THRESHOLD as LIMITER_THRESHOLD};
use voice::Voice;
pub use voice::VoiceMode;

/// Size of the voice pool.
pub const MAX_VOICES: usize = 16;
/// Length of the stub to body crossfade.
pub const CROSSFADE_MS: u32 = 5;

const COMMAND_QUEUE_CAPACITY: usize = 64;
/// Every handle the renderer can hold at once: two per voice plus one per
/// queued command. The control side drains before each send, so the retire
/// queue never fills.
const RETIRE_QUEUE_CAPACITY: usize = 2 * MAX_VOICES + COMMAND_QUEUE_CAPACITY;

/// Result of [`PreviewMixer::bridge_when_ready`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// A bridge was queued for the next block.
    Requested,
    /// The voice is already bridged or a bridge is already queued.
    Pending,
    /// No voice is playing this sample's stub.
    NotPlaying,
    /// The grade's concurrent body stream limit is reached.
    StreamCap,
    /// The body is not resident yet, or the command queue is momentarily full.
    NotResident,
}

impl BridgeOutcome {
    /// True if calling again later could still produce a bridge.
    pub fn should_retry(self) -> bool {
        matches!(self, BridgeOutcome::StreamCap | BridgeOutcome::NotResident)
    }
}

/// Renderer sizing.
#[derive(Clone, Copy, Debug)]
pub struct MixerSettings {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Voice pool size, clamped to 1..=MAX_VOICES.
    pub max_voices: usize,
    /// Largest block rendered in one pass by `render_interleaved`.
    pub max_block_frames: usize,
}

impl Default for MixerSettings {
    fn default() -> Self {
        MixerSettings {
            sample_rate: 48_000,
            max_voices: MAX_VOICES,
            max_block_frames: 1024,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InFlightKind {
    Play,
    Bridge,
}

/// A command sent but not yet applied by the renderer.
struct InFlight {
    id: SampleId,
    seq: u64,
    kind: InFlightKind,
}

struct ControlState {
    next_seq: u64,
    in_flight: Vec<InFlight>,
}

impl ControlState {
    fn prune(&mut self, applied_seq: u64) {
        self.in_flight.retain(|pending| pending.seq > applied_seq);
    }

    fn has(&self, id: SampleId, kind: InFlightKind) -> bool {
        self.in_flight
            .iter()
            .any(|pending| pending.id == id && pending.kind == kind)
    }

    fn bridges(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|pending| pending.kind == InFlightKind::Bridge)
            .count()
    }
}

/// Control-thread handle to the preview voice pool.
pub struct PreviewMixer {
    index: Arc<SpatialSampleIndex>,
    cache: Arc<StreamingPreviewCache>,
    grade: SharedGrade,
    commands: Sender<MixerCommand>,
    retired: Receiver<PcmSlice>,
    status: Arc<MixerStatus>,
    control: Mutex<ControlState>,
    max_voices: usize,
}

impl PreviewMixer {
    /// Creates the control handle and the renderer to hand to the audio thread.
    pub fn new(
        index: Arc<SpatialSampleIndex>,
        cache: Arc<StreamingPreviewCache>,
        grade: SharedGrade,
        settings: MixerSettings,
    ) -> (PreviewMixer, MixerRenderer) {
        let max_voices = settings.max_voices.clamp(1, MAX_VOICES);
        let (commands, command_queue) = crossbeam_channel::bounded(COMMAND_QUEUE_CAPACITY);
        let (retire, retired) = crossbeam_channel::bounded(RETIRE_QUEUE_CAPACITY);
        let status = Arc::new(MixerStatus::new());

        let fade_frames = (settings.sample_rate as usize * CROSSFADE_MS as usize / 1000).max(1);
        let renderer = MixerRenderer {
            voices: (0..max_voices).map(|_| Voice::new()).collect(),
            commands: command_queue,
            retire,
            status: status.clone(),
            grade: grade.clone(),
            fade_frames,
            fade_step: 1.0 / fade_frames as f32,
            scratch: vec![0.0; settings.max_block_frames.max(1)],
            applied_seq: 0,
            sample_rate: settings.sample_rate,
        };
        let mixer = PreviewMixer {
            index,
            cache,
            grade,
            commands,
            retired,
            status,
            control: Mutex::new(ControlState {
                next_seq: 1,
                in_flight: Vec::new(),
            }),
            max_voices,
        };
        (mixer, renderer)
    }

    /// Starts the stub for `id` on a free or stolen voice. Returns false if `id`
    /// has no stub or the command could not be queued.
    pub fn play_stub(&self, id: SampleId) -> bool {
        self.reclaim();
        let Some(pcm) = self.index.stub_pcm(id).filter(|pcm| !pcm.is_empty()) else {
            return false;
        };
        let gain = self.index.stub_gain(id);

        let mut control = self.control.lock();
        control.prune(self.status.applied_seq());
        let seq = control.next_seq;
        match self
            .commands
            .try_send(MixerCommand::PlayStub { id, pcm, gain, seq })
        {
            Ok(()) => {
                control.next_seq += 1;
                control.in_flight.push(InFlight {
                    id,
                    seq,
                    kind: InFlightKind::Play,
                });
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                debug!(id, "Mixer command queue unavailable; stub dropped");
                false
            }
        }
    }

    /// Bridges the stub voice playing `id` to its body if the body is resident
    /// and a body stream is free. Calling this repeatedly is harmless: at most
    /// one bridge is ever queued per voice.
    pub fn bridge_when_ready(&self, id: SampleId) -> BridgeOutcome {
        self.reclaim();
        let mut control = self.control.lock();
        control.prune(self.status.applied_seq());

        if control.has(id, InFlightKind::Bridge) {
            return BridgeOutcome::Pending;
        }
        // A queued play restarts the voice as a stub whatever it plays now.
        let mode = if control.has(id, InFlightKind::Play) {
            Some(VoiceMode::Stub)
        } else {
            self.status.mode_of(id)
        };
        match mode {
            None => return BridgeOutcome::NotPlaying,
            Some(VoiceMode::Body) => return BridgeOutcome::Pending,
            Some(VoiceMode::Stub) => {}
        }

        let streams = self.status.body_streams() + control.bridges();
        if streams >= self.grade.get().max_body_streams() {
            return BridgeOutcome::StreamCap;
        }
        let Some(body) = self.cache.body(id) else {
            return BridgeOutcome::NotResident;
        };

        let seq = control.next_seq;
        match self.commands.try_send(MixerCommand::Bridge { id, body, seq }) {
            Ok(()) => {
                control.next_seq += 1;
                control.in_flight.push(InFlight {
                    id,
                    seq,
                    kind: InFlightKind::Bridge,
                });
                debug!(id, "Bridge to body requested");
                BridgeOutcome::Requested
            }
            Err(_) => BridgeOutcome::NotResident,
        }
    }

    /// Silences every voice at the start of the next block.
    pub fn stop_all(&self) {
        self.reclaim();
        let mut control = self.control.lock();
        let seq = control.next_seq;
        if self.commands.try_send(MixerCommand::StopAll { seq }).is_ok() {
            control.next_seq += 1;
            control.in_flight.clear();
        }
    }

    /// Mode of the voice playing `id` as of the last rendered block.
    pub fn voice_mode(&self, id: SampleId) -> Option<VoiceMode> {
        self.status.mode_of(id)
    }

    pub fn active_voices(&self) -> usize {
        self.status.active()
    }

    pub fn body_streams(&self) -> usize {
        self.status.body_streams()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Drops buffers the renderer has finished with.
    pub fn reclaim(&self) {
        while self.retired.try_recv().is_ok() {}
    }
}

/// Audio-thread half of the mixer. Owns all voice state.
pub struct MixerRenderer {
    voices: Vec<Voice>,
    commands: Receiver<MixerCommand>,
    retire: Sender<PcmSlice>,
    status: Arc<MixerStatus>,
    grade: SharedGrade,
    fade_frames: usize,
    fade_step: f32,
    /// Mono mix buffer for interleaved output.
    scratch: Vec<f32>,
    applied_seq: u64,
    sample_rate: u32,
}

impl MixerRenderer {
    /// Renders one mono block into `output`, overwriting it.
    pub fn render(&mut self, output: &mut [f32]) {
        self.apply_commands();
        output.fill(0.0);

        let active = self.voices.iter().filter(|v| v.is_active()).count();
        if active > 0 {
            let scale = 1.0 / (active as f32).sqrt();
            for slot in 0..self.voices.len() {
                if !self.voices[slot].is_active() {
                    continue;
                }
                let exhausted = self.voices[slot].render_into(output, scale, self.fade_step);
                if let Some(tail) = self.voices[slot].take_finished_tail() {
                    self.retire(tail);
                }
                if exhausted {
                    for pcm in self.voices[slot].release().into_iter().flatten() {
                        self.retire(pcm);
                    }
                }
            }
        }

        limiter::soft_limit_buffer(output);
        self.publish();
    }

    /// Renders into an interleaved buffer, copying the mono mix to every
    /// channel.
    pub fn render_interleaved(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut scratch = std::mem::take(&mut self.scratch);
        let block = scratch.len();
        for chunk in output.chunks_mut(block * channels) {
            let frames = chunk.len() / channels;
            self.render(&mut scratch[..frames]);
            let (whole, partial) = chunk.split_at_mut(frames * channels);
            for (frame, &sample) in whole.chunks_exact_mut(channels).zip(&scratch[..frames]) {
                frame.fill(sample);
            }
            partial.fill(0.0);
        }
        self.scratch = scratch;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.applied_seq = command.seq();
            match command {
                MixerCommand::PlayStub { id, pcm, gain, seq } => {
                    let slot = self
                        .voices
                        .iter()
                        .position(|v| v.id() == id)
                        .unwrap_or_else(|| self.steal_slot());
                    for old in self.voices[slot]
                        .start_stub(id, pcm, gain, seq)
                        .into_iter()
                        .flatten()
                    {
                        self.retire(old);
                    }
                }
                MixerCommand::Bridge { id, body, .. } => {
                    let streams = self
                        .voices
                        .iter()
                        .filter(|v| v.mode() == Some(VoiceMode::Body))
                        .count();
                    let slot = self
                        .voices
                        .iter()
                        .position(|v| v.id() == id && v.mode() == Some(VoiceMode::Stub));
                    match slot {
                        Some(slot) if streams < self.grade.get().max_body_streams() => {
                            if let Some(previous) =
                                self.voices[slot].bridge(body.pcm().clone(), body.gain())
                            {
                                self.retire(previous);
                            }
                        }
                        _ => self.retire(body.pcm().clone()),
                    }
                }
                MixerCommand::StopAll { .. } => {
                    for slot in 0..self.voices.len() {
                        for pcm in self.voices[slot].release().into_iter().flatten() {
                            self.retire(pcm);
                        }
                    }
                }
            }
        }
    }

    /// Picks a voice for a new trigger: a free one, else the oldest releasing
    /// voice, else the oldest voice.
    fn steal_slot(&self) -> usize {
        if let Some(free) = self.voices.iter().position(|v| !v.is_active()) {
            return free;
        }
        let oldest = |releasing_only: bool| {
            self.voices
                .iter()
                .enumerate()
                .filter(|(_, v)| !releasing_only || v.is_releasing(self.fade_frames))
                .min_by_key(|(_, v)| v.started())
                .map(|(slot, _)| slot)
        };
        oldest(true).or_else(|| oldest(false)).unwrap_or(0)
    }

    fn retire(&self, pcm: PcmSlice) {
        // Fails only once the control handle is gone.
        let _ = self.retire.try_send(pcm);
    }

    fn publish(&self) {
        let mut active = 0;
        let mut body_streams = 0;
        for (slot, voice) in self.voices.iter().enumerate() {
            let mode = voice.mode();
            active += mode.is_some() as usize;
            body_streams += (mode == Some(VoiceMode::Body)) as usize;
            self.status.publish_voice(slot, voice.id(), mode);
        }
        self.status
            .publish_counts(active, body_streams, self.applied_seq);
    }
}
