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
//! Coordinator that owns the four preview components.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::arbiter::{TickOutcome, TriggerArbiter};
use crate::cache::StreamingPreviewCache;
use crate::config::{ConfigError, PreviewConfig};
use crate::grade::{CardGrade, SharedGrade};
use crate::index::{IndexError, SpatialSampleIndex};
use crate::mixer::{MixerRenderer, PreviewMixer};
use crate::SampleId;

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Unable to load stub index: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid preview configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The preview pipeline, driven from the UI/control thread.
///
/// [`PreviewSystem::init`] also returns the [`MixerRenderer`], which belongs to
/// the audio thread.
pub struct PreviewSystem {
    index: Arc<SpatialSampleIndex>,
    cache: Arc<StreamingPreviewCache>,
    mixer: Arc<PreviewMixer>,
    arbiter: TriggerArbiter,
    grade: SharedGrade,
    tick_interval: Duration,
    /// Zero point for motion timestamps.
    origin: Instant,
    last_motion: Option<Instant>,
}

impl PreviewSystem {
    /// Loads the stub index and opens the body pak. A missing or malformed index
    /// is an error; a bad pak only disables bodies.
    pub fn init(config: &PreviewConfig) -> Result<(PreviewSystem, MixerRenderer), SystemError> {
        let arbiter_settings = config.arbiter_settings()?;
        let grade = SharedGrade::new(config.card_grade());

        let mut index = SpatialSampleIndex::new();
        index.load(config.bak())?;
        let index = Arc::new(index);

        let cache = Arc::new(StreamingPreviewCache::new(grade.clone()));
        if cache.open(config.pak()).is_err() {
            warn!(pak = ?config.pak(), "Continuing without preview bodies");
        }

        let (mixer, renderer) = PreviewMixer::new(
            index.clone(),
            cache.clone(),
            grade.clone(),
            config.mixer_settings(),
        );
        let mixer = Arc::new(mixer);
        let arbiter = TriggerArbiter::new(
            index.clone(),
            cache.clone(),
            mixer.clone(),
            grade.clone(),
            arbiter_settings,
        );

        info!(
            samples = index.sample_count(),
            bodies = cache.body_count(),
            grade = %grade.get(),
            voices = mixer.max_voices(),
            "Preview system ready"
        );
        let system = PreviewSystem {
            index,
            cache,
            mixer,
            arbiter,
            grade,
            tick_interval: arbiter_settings.tick_interval,
            origin: Instant::now(),
            last_motion: None,
        };
        Ok((system, renderer))
    }

    /// Feeds a live pointer position. Events arriving faster than the tick
    /// interval are dropped and return None.
    pub fn on_motion(&mut self, x: f32, y: f32) -> Option<TickOutcome> {
        let now = Instant::now();
        if self
            .last_motion
            .is_some_and(|last| now.duration_since(last) < self.tick_interval)
        {
            return None;
        }
        self.last_motion = Some(now);
        let t = now.duration_since(self.origin).as_secs_f64();
        Some(self.arbiter.tick(x, y, t))
    }

    /// Feeds a pointer position at an explicit time in seconds. Bypasses the
    /// tick interval check.
    pub fn tick_at(&mut self, x: f32, y: f32, t: f64) -> TickOutcome {
        self.arbiter.tick(x, y, t)
    }

    /// Plays an explicitly selected sample, bypassing the trigger gates, and
    /// streams its body. Returns false if the sample has no stub.
    pub fn on_select(&mut self, id: SampleId) -> bool {
        if !self.mixer.play_stub(id) {
            return false;
        }
        self.cache.prefetch(id);
        self.arbiter.follow_bridge(id);
        true
    }

    /// Retries any pending bridge and drops buffers the renderer has retired.
    /// Call periodically while the cursor is idle.
    pub fn poll(&mut self) {
        self.arbiter.poll();
        self.mixer.reclaim();
    }

    /// Silences every preview and forgets motion history.
    pub fn stop_previews(&mut self) {
        self.mixer.stop_all();
        self.arbiter.reset();
    }

    /// Changes the card grade for every component. Takes effect at each one's
    /// next decision.
    pub fn set_card_grade(&self, grade: CardGrade) {
        if self.grade.get() != grade {
            info!(grade = %grade, "Card grade changed");
        }
        self.grade.set(grade);
    }

    pub fn card_grade(&self) -> CardGrade {
        self.grade.get()
    }

    /// True once the stub index is loaded.
    pub fn is_ready(&self) -> bool {
        self.index.is_loaded()
    }

    /// True if preview bodies can be streamed.
    pub fn has_bodies(&self) -> bool {
        self.cache.is_open()
    }

    pub fn sample_count(&self) -> usize {
        self.index.sample_count()
    }

    pub fn index(&self) -> &Arc<SpatialSampleIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<StreamingPreviewCache> {
        &self.cache
    }

    pub fn mixer(&self) -> &Arc<PreviewMixer> {
        &self.mixer
    }

    pub fn arbiter(&self) -> &TriggerArbiter {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut TriggerArbiter {
        &mut self.arbiter
    }

    /// Stops the loader thread and releases cached bodies.
    pub fn shutdown(&mut self) {
        self.mixer.stop_all();
        self.cache.close();
        info!(
            hit_rate = self.cache.hit_rate(),
            triggers = self.arbiter.stats().triggered,
            "Preview system shut down"
        );
    }
}
