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
//! Turns pointer motion into paced preview triggers.
//!
//! Every tick resolves the sample nearest the cursor and runs it through the
//! gates in [`Gate`] order. An accepted candidate plays its stub at once. When
//! the cursor is dwelling, the body and a grade-dependent number of k-NN
//! neighbors are prefetched, and the arbiter keeps asking the mixer to bridge
//! on later ticks until the body is playing or can no longer be.
//!
//! All state here belongs to the control thread.

mod gate;
mod motion;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::StreamingPreviewCache;
use crate::grade::{CardGrade, SharedGrade};
use crate::index::SpatialSampleIndex;
use crate::mixer::{BridgeOutcome, PreviewMixer};
use crate::SampleId;

pub use gate::{Gate, MAX_TRIGGERS_PER_SECOND, SAME_SAMPLE_WINDOW};
use gate::TriggerLog;
pub use motion::{MotionHistory, MotionSample};

/// Tunable thresholds. Distances are in scatter coordinate units, which the
/// caller is expected to use as its pixel space.
#[derive(Clone, Copy, Debug)]
pub struct ArbiterSettings {
    /// Closest-wins radius.
    pub voronoi_radius: f32,
    /// Speed in px/s above which neighbors of the previous trigger are skipped.
    pub fast_motion_threshold: f32,
    /// Movement per tick at or below which the cursor counts as dwelling.
    pub dwell_threshold: f32,
    /// Nominal spacing of ticks.
    pub tick_interval: Duration,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        ArbiterSettings {
            voronoi_radius: 25.0,
            fast_motion_threshold: 100.0,
            dwell_threshold: 2.0,
            tick_interval: Duration::from_micros(8500),
        }
    }
}

/// What a tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The stub played. `prefetched` counts the bodies requested, including
    /// the sample's own.
    Triggered { id: SampleId, prefetched: usize },
    Rejected { id: SampleId, gate: Gate },
    /// Nothing is loaded.
    NoCandidate,
}

/// Running totals, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub ticks: u64,
    pub triggered: u64,
    pub rate_cap: u64,
    pub spacing: u64,
    pub same_sample: u64,
    pub voronoi: u64,
    pub similar: u64,
    pub bridges: u64,
}

impl ArbiterStats {
    fn count_rejection(&mut self, gate: Gate) {
        match gate {
            Gate::RateCap => self.rate_cap += 1,
            Gate::Spacing => self.spacing += 1,
            Gate::SameSample => self.same_sample += 1,
            Gate::Voronoi => self.voronoi += 1,
            Gate::Similar => self.similar += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rate_cap + self.spacing + self.same_sample + self.voronoi + self.similar
    }
}

pub struct TriggerArbiter {
    index: Arc<SpatialSampleIndex>,
    cache: Arc<StreamingPreviewCache>,
    mixer: Arc<PreviewMixer>,
    grade: SharedGrade,
    settings: ArbiterSettings,
    motion: MotionHistory,
    log: TriggerLog,
    /// Sample whose body was prefetched and still needs bridging.
    pending_bridge: Option<SampleId>,
    /// Latest trigger that has already had its dwell prefetch.
    dwelled: Option<SampleId>,
    stats: ArbiterStats,
}

impl TriggerArbiter {
    pub fn new(
        index: Arc<SpatialSampleIndex>,
        cache: Arc<StreamingPreviewCache>,
        mixer: Arc<PreviewMixer>,
        grade: SharedGrade,
        settings: ArbiterSettings,
    ) -> TriggerArbiter {
        TriggerArbiter {
            index,
            cache,
            mixer,
            grade,
            settings,
            motion: MotionHistory::new(),
            log: TriggerLog::new(),
            pending_bridge: None,
            dwelled: None,
            stats: ArbiterStats::default(),
        }
    }

    /// Processes one pointer sample at time `t` (seconds, monotonic).
    pub fn tick(&mut self, x: f32, y: f32, t: f64) -> TickOutcome {
        self.stats.ticks += 1;
        self.motion.push(x, y, t);
        let velocity = self.motion.velocity();
        let dwelling = self.is_dwelling(velocity);
        self.retry_bridge();

        let Some(id) = self.index.nearest(x, y) else {
            return TickOutcome::NoCandidate;
        };
        let grade = self.grade.get();

        if let Err(gate) = self.check_gates(id, x, y, t, velocity, grade) {
            self.stats.count_rejection(gate);
            // Settling onto the sample that just fired still earns its body.
            if gate == Gate::SameSample && dwelling && self.log.last_id() == Some(id) {
                self.dwell_on(id, grade);
            }
            return TickOutcome::Rejected { id, gate };
        }

        self.mixer.play_stub(id);
        self.log.record(id, t);
        self.stats.triggered += 1;
        self.dwelled = None;
        self.pending_bridge = None;

        let prefetched = if dwelling {
            self.dwell_on(id, grade)
        } else {
            0
        };
        debug!(id, velocity, prefetched, "Preview triggered");
        TickOutcome::Triggered { id, prefetched }
    }

    fn check_gates(
        &self,
        id: SampleId,
        x: f32,
        y: f32,
        t: f64,
        velocity: f32,
        grade: CardGrade,
    ) -> Result<(), Gate> {
        if self.log.rate_capped(t) {
            return Err(Gate::RateCap);
        }
        if self
            .log
            .too_soon(t, grade.min_trigger_spacing().as_secs_f64())
        {
            return Err(Gate::Spacing);
        }
        if self.log.fired_recently(id, t) {
            return Err(Gate::SameSample);
        }
        if !self
            .index
            .is_closest_within(id, x, y, self.settings.voronoi_radius)
        {
            return Err(Gate::Voronoi);
        }
        if velocity > self.settings.fast_motion_threshold {
            if let Some(last) = self.log.last_id() {
                if last != id && self.index.neighbors(last).contains(id) {
                    return Err(Gate::Similar);
                }
            }
        }
        Ok(())
    }

    fn is_dwelling(&self, velocity: f32) -> bool {
        velocity * self.settings.tick_interval.as_secs_f32() <= self.settings.dwell_threshold
    }

    /// Prefetches the body of `id` and its nearest neighbors, once per trigger.
    /// Returns the number of bodies requested.
    fn dwell_on(&mut self, id: SampleId, grade: CardGrade) -> usize {
        if self.dwelled == Some(id) {
            return 0;
        }
        self.dwelled = Some(id);

        self.cache.prefetch(id);
        let neighbors = self.index.neighbors(id);
        let extra = grade.neighbor_prefetch().min(neighbors.len());
        for &neighbor in &neighbors.as_slice()[..extra] {
            self.cache.prefetch(neighbor);
        }

        self.pending_bridge = Some(id);
        self.retry_bridge();
        1 + extra
    }

    fn retry_bridge(&mut self) {
        let Some(id) = self.pending_bridge else {
            return;
        };
        let outcome = self.mixer.bridge_when_ready(id);
        if outcome == BridgeOutcome::Requested {
            self.stats.bridges += 1;
        }
        if !outcome.should_retry() {
            self.pending_bridge = None;
        }
    }

    /// Keeps trying to bridge `id` on later ticks, as if it had been dwelled on.
    pub fn follow_bridge(&mut self, id: SampleId) {
        self.pending_bridge = Some(id);
        self.retry_bridge();
    }

    /// Retries a pending bridge without a motion sample.
    pub fn poll(&mut self) {
        self.retry_bridge();
    }

    /// Overrides the dwell (px per tick) and fast-motion (px/s) thresholds.
    pub fn set_motion_thresholds(&mut self, dwell_px: f32, fast_px_per_s: f32) {
        self.settings.dwell_threshold = dwell_px;
        self.settings.fast_motion_threshold = fast_px_per_s;
    }

    pub fn settings(&self) -> &ArbiterSettings {
        &self.settings
    }

    /// Accepted triggers in the second ending at `now`.
    pub fn triggers_last_second(&self, now: f64) -> usize {
        self.log.in_last_second(now)
    }

    /// Smoothed cursor speed in px/s.
    pub fn velocity(&self) -> f32 {
        self.motion.velocity()
    }

    pub fn last_trigger(&self) -> Option<SampleId> {
        self.log.last_id()
    }

    pub fn pending_bridge(&self) -> Option<SampleId> {
        self.pending_bridge
    }

    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }

    /// Forgets motion and trigger history.
    pub fn reset(&mut self) {
        self.motion.clear();
        self.log.clear();
        self.pending_bridge = None;
        self.dwelled = None;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::mixer::{MixerRenderer, MixerSettings, VoiceMode};
    use crate::testutil::{eventually, BakBuilder, PakBuilder};

    struct Fixture {
        arbiter: TriggerArbiter,
        renderer: MixerRenderer,
        mixer: Arc<PreviewMixer>,
        cache: Arc<StreamingPreviewCache>,
    }

    impl Fixture {
        fn from_builder(bak: BakBuilder, grade: CardGrade) -> Fixture {
            let mut index = SpatialSampleIndex::new();
            index.load_bytes(&bak.build()).unwrap();
            let index = Arc::new(index);

            let mut pak = PakBuilder::new();
            for id in index.ids() {
                pak = pak.body(id, 100);
            }
            let grade = SharedGrade::new(grade);
            let cache = Arc::new(StreamingPreviewCache::new(grade.clone()));
            cache.open_reader(Cursor::new(pak.build())).unwrap();

            let (mixer, renderer) = PreviewMixer::new(
                index.clone(),
                cache.clone(),
                grade.clone(),
                MixerSettings::default(),
            );
            let mixer = Arc::new(mixer);
            let arbiter = TriggerArbiter::new(
                index,
                cache.clone(),
                mixer.clone(),
                grade,
                ArbiterSettings::default(),
            );
            Fixture {
                arbiter,
                renderer,
                mixer,
                cache,
            }
        }

        /// Ids 1, 2, 3 at (0,0), (100,0), (0,100). Sample 1 lists 2 and 3 as neighbors.
        fn three_points(grade: CardGrade) -> Fixture {
            let bak = BakBuilder::new()
                .sample(1, 0, 0, vec![1000; 20_000])
                .sample(2, 100, 0, vec![1000; 20_000])
                .sample(3, 0, 100, vec![1000; 20_000])
                .neighbors(1, vec![2, 3]);
            Fixture::from_builder(bak, grade)
        }

        fn render(&mut self) {
            let mut block = vec![0.0; 256];
            self.renderer.render(&mut block);
        }
    }

    #[test]
    fn test_tick_triggers_nearest() {
        let mut fixture = Fixture::three_points(CardGrade::Medium);
        let outcome = fixture.arbiter.tick(1.0, 1.0, 0.0);
        assert_eq!(
            outcome,
            TickOutcome::Triggered {
                id: 1,
                prefetched: 3
            }
        );
        fixture.render();
        assert!(fixture.mixer.voice_mode(1).is_some());
        assert_eq!(fixture.arbiter.last_trigger(), Some(1));
    }

    #[test]
    fn test_same_sample_suppressed() {
        let mut fixture = Fixture::three_points(CardGrade::Medium);
        assert!(matches!(
            fixture.arbiter.tick(1.0, 1.0, 0.0),
            TickOutcome::Triggered { id: 1, .. }
        ));
        assert_eq!(
            fixture.arbiter.tick(2.0, 2.0, 0.05),
            TickOutcome::Rejected {
                id: 1,
                gate: Gate::SameSample
            }
        );
        assert!(matches!(
            fixture.arbiter.tick(1.0, 1.0, 0.15),
            TickOutcome::Triggered { id: 1, .. }
        ));
    }

    #[test]
    fn test_spacing_tracks_grade() {
        let mut fixture = Fixture::three_points(CardGrade::Low);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        // 24 ms minimum on a low grade card.
        assert_eq!(
            fixture.arbiter.tick(100.0, 0.0, 0.5),
            TickOutcome::Triggered {
                id: 2,
                prefetched: 1
            }
        );
        assert_eq!(
            fixture.arbiter.tick(0.0, 100.0, 0.52),
            TickOutcome::Rejected {
                id: 3,
                gate: Gate::Spacing
            }
        );
    }

    #[test]
    fn test_voronoi_radius() {
        let mut fixture = Fixture::three_points(CardGrade::High);
        assert_eq!(
            fixture.arbiter.tick(40.0, 0.0, 0.0),
            TickOutcome::Rejected {
                id: 1,
                gate: Gate::Voronoi
            }
        );
        assert!(matches!(
            fixture.arbiter.tick(80.0, 0.0, 1.0),
            TickOutcome::Triggered { id: 2, .. }
        ));
    }

    #[test]
    fn test_no_candidate_without_index() {
        let grade = SharedGrade::default();
        let index = Arc::new(SpatialSampleIndex::new());
        let cache = Arc::new(StreamingPreviewCache::new(grade.clone()));
        let (mixer, _renderer) = PreviewMixer::new(
            index.clone(),
            cache.clone(),
            grade.clone(),
            MixerSettings::default(),
        );
        let mut arbiter = TriggerArbiter::new(
            index,
            cache,
            Arc::new(mixer),
            grade,
            ArbiterSettings::default(),
        );
        assert_eq!(arbiter.tick(0.0, 0.0, 0.0), TickOutcome::NoCandidate);
    }

    #[test]
    fn test_similar_sample_skipped_at_speed() {
        let mut fixture = Fixture::three_points(CardGrade::Medium);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        assert_eq!(
            fixture.arbiter.tick(100.0, 0.0, 0.03),
            TickOutcome::Rejected {
                id: 2,
                gate: Gate::Similar
            }
        );
        // Sample 3 is a neighbor too.
        assert_eq!(
            fixture.arbiter.tick(0.0, 100.0, 0.06),
            TickOutcome::Rejected {
                id: 3,
                gate: Gate::Similar
            }
        );
    }

    #[test]
    fn test_similar_sample_allowed_when_slow() {
        let mut fixture = Fixture::three_points(CardGrade::Medium);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        // A half second gap is a pause, not motion.
        assert!(matches!(
            fixture.arbiter.tick(100.0, 0.0, 0.5),
            TickOutcome::Triggered { id: 2, .. }
        ));
    }

    #[test]
    fn test_unrelated_sample_allowed_at_speed() {
        let bak = BakBuilder::new()
            .sample(1, 0, 0, vec![1000; 100])
            .sample(2, 100, 0, vec![1000; 100])
            .sample(3, 0, 100, vec![1000; 100])
            .neighbors(1, vec![2]);
        let mut fixture = Fixture::from_builder(bak, CardGrade::Medium);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        assert!(matches!(
            fixture.arbiter.tick(100.0, 0.0, 0.03),
            TickOutcome::Rejected {
                gate: Gate::Similar,
                ..
            }
        ));
        assert_eq!(
            fixture.arbiter.tick(0.0, 100.0, 0.06),
            TickOutcome::Triggered {
                id: 3,
                prefetched: 0
            }
        );
    }

    fn neighbor_fixture(grade: CardGrade) -> Fixture {
        let mut bak = BakBuilder::new();
        for id in 1..=7u64 {
            bak = bak.sample(id, id as i16 * 200, 0, vec![1000; 20_000]);
        }
        Fixture::from_builder(bak.neighbors(1, vec![2, 3, 4, 5, 6, 7]), grade)
    }

    #[test]
    fn test_neighbor_prefetch_by_grade() {
        for (grade, expected) in [
            (CardGrade::High, 5),
            (CardGrade::Medium, 3),
            (CardGrade::Low, 1),
        ] {
            let mut fixture = neighbor_fixture(grade);
            assert_eq!(
                fixture.arbiter.tick(200.0, 0.0, 0.0),
                TickOutcome::Triggered {
                    id: 1,
                    prefetched: expected
                },
                "{}",
                grade
            );

            let cache = fixture.cache.clone();
            eventually(|| !cache.has_pending(), "Loader never drained");
            assert_eq!(cache.len(), expected);
            assert!(cache.is_resident(1));
            assert!(!cache.is_resident(7));
        }
    }

    #[test]
    fn test_fast_motion_does_not_prefetch() {
        let mut fixture = Fixture::three_points(CardGrade::High);
        fixture.arbiter.tick(50.0, 50.0, 0.0);
        let outcome = fixture.arbiter.tick(1.0, 1.0, 0.01);
        assert_eq!(
            outcome,
            TickOutcome::Triggered {
                id: 1,
                prefetched: 0
            }
        );
        assert!(!fixture.cache.has_pending());
        assert_eq!(fixture.arbiter.pending_bridge(), None);
    }

    #[test]
    fn test_bridge_retried_until_body_plays() {
        let mut fixture = Fixture::three_points(CardGrade::High);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        fixture.render();

        // Small steps keep every tick inside the same-sample window.
        let mut t = 0.0;
        for _ in 0..900 {
            if fixture.mixer.voice_mode(1) == Some(VoiceMode::Body) {
                break;
            }
            t += 0.0001;
            fixture.arbiter.tick(0.0, 0.0, t);
            fixture.render();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(fixture.mixer.voice_mode(1), Some(VoiceMode::Body));
        assert_eq!(fixture.arbiter.pending_bridge(), None);
        assert_eq!(fixture.arbiter.stats().bridges, 1);
    }

    #[test]
    fn test_settling_after_fast_arrival_prefetches() {
        let mut fixture = Fixture::three_points(CardGrade::High);
        fixture.arbiter.tick(60.0, 60.0, 0.0);
        assert!(matches!(
            fixture.arbiter.tick(0.0, 0.0, 0.01),
            TickOutcome::Triggered { id: 1, prefetched: 0 }
        ));

        // Hold still until the fast pair has left the history.
        for step in 2..12 {
            fixture.arbiter.tick(0.0, 0.0, step as f64 * 0.005);
        }
        let cache = fixture.cache.clone();
        eventually(|| cache.is_resident(1), "Body never prefetched after dwelling");
    }

    #[test]
    fn test_motion_thresholds() {
        let mut fixture = Fixture::three_points(CardGrade::High);
        fixture.arbiter.set_motion_thresholds(0.0, 10_000.0);
        fixture.arbiter.tick(0.0, 0.0, 0.0);
        // Fast motion below the raised threshold is not similarity gated.
        assert!(matches!(
            fixture.arbiter.tick(100.0, 0.0, 0.03),
            TickOutcome::Triggered {
                id: 2,
                prefetched: 0
            }
        ));
        assert_eq!(fixture.arbiter.settings().dwell_threshold, 0.0);
    }

    #[test]
    fn test_rate_never_exceeds_cap() {
        let mut bak = BakBuilder::new();
        for row in 0..12i16 {
            for col in 0..12i16 {
                let id = (row * 12 + col + 1) as u64;
                bak = bak.sample(id, col * 30, row * 30, vec![1000; 64]);
            }
        }
        let mut fixture = Fixture::from_builder(bak, CardGrade::High);
        let mut rng = StdRng::seed_from_u64(7);

        let (mut x, mut y, mut t) = (0.0f32, 0.0f32, 0.0f64);
        let mut accepted = Vec::new();
        for _ in 0..4000 {
            t += rng.gen_range(0.0005..0.012);
            x = (x + rng.gen_range(-40.0..40.0)).clamp(0.0, 330.0);
            y = (y + rng.gen_range(-40.0..40.0)).clamp(0.0, 330.0);
            if let TickOutcome::Triggered { .. } = fixture.arbiter.tick(x, y, t) {
                accepted.push(t);
            }
            assert!(fixture.arbiter.triggers_last_second(t) <= MAX_TRIGGERS_PER_SECOND);
        }

        assert!(accepted.len() > 100);
        for (i, &start) in accepted.iter().enumerate() {
            let in_window = accepted[i..].iter().take_while(|&&s| s - start < 1.0).count();
            assert!(in_window <= MAX_TRIGGERS_PER_SECOND);
        }
        for pair in accepted.windows(2) {
            assert!(pair[1] - pair[0] >= 0.018);
        }
    }
}
