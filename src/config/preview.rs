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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::arbiter::ArbiterSettings;
use crate::grade::CardGrade;
use crate::mixer::{MixerSettings, MAX_VOICES};

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_micros(8500);
const DEFAULT_VORONOI_RADIUS: f32 = 25.0;
const DEFAULT_FAST_MOTION_THRESHOLD: f32 = 100.0;
const DEFAULT_DWELL_THRESHOLD: f32 = 2.0;
const DEFAULT_MAX_BLOCK_FRAMES: usize = 1024;

/// A YAML representation of the preview pipeline configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct PreviewConfig {
    /// The stub index file. Relative paths resolve against the config file.
    bak: PathBuf,

    /// The body pak file. Relative paths resolve against the config file.
    pak: PathBuf,

    /// Storage card grade (default: medium).
    card_grade: Option<CardGrade>,

    /// Output sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Number of preview voices (default: 16, at most 16).
    max_voices: Option<usize>,

    /// Minimum spacing between processed motion events (default: 8500us).
    tick_interval: Option<String>,

    /// Closest-wins radius in px (default: 25).
    voronoi_radius: Option<f32>,

    /// Speed in px/s above which similar samples are skipped (default: 100).
    fast_motion_threshold: Option<f32>,

    /// Movement per tick in px at or below which the cursor is dwelling (default: 2).
    dwell_threshold: Option<f32>,

    /// Largest block the renderer mixes in one pass (default: 1024).
    max_block_frames: Option<usize>,
}

impl PreviewConfig {
    /// Creates a configuration with every optional setting at its default.
    pub fn new(bak: &Path, pak: &Path) -> PreviewConfig {
        PreviewConfig {
            bak: bak.to_path_buf(),
            pak: pak.to_path_buf(),
            card_grade: None,
            sample_rate: None,
            max_voices: None,
            tick_interval: None,
            voronoi_radius: None,
            fast_motion_threshold: None,
            dwell_threshold: None,
            max_block_frames: None,
        }
    }

    /// Parse a preview configuration from a file.
    pub fn deserialize(path: &Path) -> Result<PreviewConfig, ConfigError> {
        let mut preview = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<PreviewConfig>()?;
        if let Some(base) = path.parent() {
            preview.bak = base.join(&preview.bak);
            preview.pak = base.join(&preview.pak);
        }
        preview.validate()?;
        Ok(preview)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == Some(0) {
            return Err(ConfigError::NotPositive {
                field: "sample_rate",
            });
        }
        if self.tick_interval()?.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "tick_interval",
            });
        }
        for (field, value) in [
            ("voronoi_radius", self.voronoi_radius),
            ("fast_motion_threshold", self.fast_motion_threshold),
            ("dwell_threshold", self.dwell_threshold),
        ] {
            // Also rejects NaN.
            if value.is_some_and(|value| !(value > 0.0 && value.is_finite())) {
                return Err(ConfigError::NotPositive { field });
            }
        }
        Ok(())
    }

    pub fn bak(&self) -> &Path {
        &self.bak
    }

    pub fn pak(&self) -> &Path {
        &self.pak
    }

    pub fn card_grade(&self) -> CardGrade {
        self.card_grade.unwrap_or_default()
    }

    /// Overrides the card grade.
    pub fn set_card_grade(&mut self, grade: CardGrade) {
        self.card_grade = Some(grade);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the voice count, clamped to the pool size.
    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(MAX_VOICES).clamp(1, MAX_VOICES)
    }

    /// Returns the tick interval from the configuration.
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        match &self.tick_interval {
            Some(tick_interval) => Ok(DurationString::from_string(tick_interval.clone())
                .map_err(|reason| ConfigError::Duration {
                    field: "tick_interval",
                    value: tick_interval.clone(),
                    reason: reason.to_string(),
                })?
                .into()),
            None => Ok(DEFAULT_TICK_INTERVAL),
        }
    }

    pub fn voronoi_radius(&self) -> f32 {
        self.voronoi_radius.unwrap_or(DEFAULT_VORONOI_RADIUS)
    }

    pub fn fast_motion_threshold(&self) -> f32 {
        self.fast_motion_threshold
            .unwrap_or(DEFAULT_FAST_MOTION_THRESHOLD)
    }

    pub fn dwell_threshold(&self) -> f32 {
        self.dwell_threshold.unwrap_or(DEFAULT_DWELL_THRESHOLD)
    }

    pub fn max_block_frames(&self) -> usize {
        self.max_block_frames
            .unwrap_or(DEFAULT_MAX_BLOCK_FRAMES)
            .max(1)
    }

    pub fn mixer_settings(&self) -> MixerSettings {
        MixerSettings {
            sample_rate: self.sample_rate(),
            max_voices: self.max_voices(),
            max_block_frames: self.max_block_frames(),
        }
    }

    pub fn arbiter_settings(&self) -> Result<ArbiterSettings, ConfigError> {
        Ok(ArbiterSettings {
            voronoi_radius: self.voronoi_radius(),
            fast_motion_threshold: self.fast_motion_threshold(),
            dwell_threshold: self.dwell_threshold(),
            tick_interval: self.tick_interval()?,
        })
    }
}
