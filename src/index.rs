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
//! In-memory stub index: every sample's stub clip, scatter coordinate and
//! precomputed neighbor list.
//!
//! After a successful load the index is immutable, so it can be shared behind
//! an `Arc` and read from any thread, including the audio thread. Lookups do
//! not allocate or block.

mod error;
mod format;
mod grid;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::pcm::{gain_from_q15, PcmSlice};
use crate::SampleId;

pub use error::IndexError;
pub use format::{IndexRow, MAX_NEIGHBORS};
use format::NEIGHBOR_SENTINEL;
use grid::SpatialGrid;
pub use grid::GRID_SIZE;

/// Fixed-capacity neighbor list with an explicit length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbors {
    ids: [SampleId; MAX_NEIGHBORS],
    len: u8,
}

impl Neighbors {
    pub const EMPTY: Neighbors = Neighbors {
        ids: [0; MAX_NEIGHBORS],
        len: 0,
    };

    pub fn as_slice(&self) -> &[SampleId] {
        &self.ids[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: SampleId) -> bool {
        self.as_slice().contains(&id)
    }
}

/// The loaded contents. Kept separate so a failed load never leaves a
/// half-built index behind.
struct Loaded {
    rows: Vec<IndexRow>,
    stubs: Vec<PcmSlice>,
    neighbors: Vec<Neighbors>,
    by_id: HashMap<SampleId, usize>,
    grid: SpatialGrid,
    stub_bytes: usize,
}

/// Spatial sample index with instant stub access.
#[derive(Default)]
pub struct SpatialSampleIndex {
    loaded: Option<Loaded>,
}

impl SpatialSampleIndex {
    /// Creates an empty, unloaded index.
    pub fn new() -> SpatialSampleIndex {
        SpatialSampleIndex { loaded: None }
    }

    /// Loads an index file, replacing anything previously loaded. On failure the
    /// index is left unloaded.
    pub fn load(&mut self, path: &Path) -> Result<(), IndexError> {
        self.unload();
        let bytes = std::fs::read(path).map_err(|e| {
            warn!(path = ?path, error = %e, "Unable to read stub index");
            IndexError::Io(e)
        })?;
        self.load_bytes(&bytes).inspect_err(|e| {
            warn!(path = ?path, error = %e, "Stub index rejected");
        })?;
        info!(
            path = ?path,
            samples = self.sample_count(),
            stub_kb = self.stub_bytes() / 1024,
            "Stub index loaded"
        );
        Ok(())
    }

    /// Loads an index from an in-memory image.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), IndexError> {
        self.unload();
        let parsed = format::parse(bytes)?;

        let mut by_id = HashMap::with_capacity(parsed.rows.len());
        for (row_index, row) in parsed.rows.iter().enumerate() {
            if by_id.insert(row.id, row_index).is_some() {
                return Err(IndexError::DuplicateId(row.id));
            }
        }

        let stub_bytes = parsed.stub_pcm.len() * 2;
        let blob: Arc<[i16]> = parsed.stub_pcm.into();
        let stubs = parsed
            .rows
            .iter()
            .map(|row| {
                PcmSlice::new(
                    blob.clone(),
                    row.stub_byte_offset as usize / 2,
                    row.stub_frames as usize,
                )
                .ok_or(IndexError::StubOutOfBounds(row.id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let neighbors = parsed
            .knn
            .iter()
            .map(|list| {
                let mut resolved = Neighbors::EMPTY;
                for &neighbor in list.iter().take_while(|&&n| n != NEIGHBOR_SENTINEL) {
                    resolved.ids[resolved.len as usize] = parsed.rows[neighbor as usize].id;
                    resolved.len += 1;
                }
                resolved
            })
            .collect();

        let grid = SpatialGrid::build(&parsed.rows);
        self.loaded = Some(Loaded {
            rows: parsed.rows,
            stubs,
            neighbors,
            by_id,
            grid,
            stub_bytes,
        });
        Ok(())
    }

    /// Releases all index and stub memory. Safe to call when nothing is loaded.
    pub fn unload(&mut self) {
        self.loaded = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn sample_count(&self) -> usize {
        self.loaded.as_ref().map_or(0, |l| l.rows.len())
    }

    /// Total size of the stub PCM blob.
    pub fn stub_bytes(&self) -> usize {
        self.loaded.as_ref().map_or(0, |l| l.stub_bytes)
    }

    #[inline]
    fn row_of(&self, id: SampleId) -> Option<(&Loaded, usize)> {
        let loaded = self.loaded.as_ref()?;
        let row = *loaded.by_id.get(&id)?;
        Some((loaded, row))
    }

    pub fn contains(&self, id: SampleId) -> bool {
        self.row_of(id).is_some()
    }

    /// Returns the stub PCM for `id`.
    pub fn stub(&self, id: SampleId) -> Option<&[i16]> {
        self.row_of(id)
            .map(|(loaded, row)| loaded.stubs[row].samples())
    }

    /// Returns a shared handle to the stub PCM for `id`, for handing to a voice.
    pub fn stub_pcm(&self, id: SampleId) -> Option<PcmSlice> {
        self.row_of(id).map(|(loaded, row)| loaded.stubs[row].clone())
    }

    /// Stub length in frames, 0 for unknown ids.
    pub fn stub_length(&self, id: SampleId) -> usize {
        self.row_of(id)
            .map_or(0, |(loaded, row)| loaded.rows[row].stub_frames as usize)
    }

    /// Stub gain, 0.0 for unknown ids.
    pub fn stub_gain(&self, id: SampleId) -> f32 {
        self.row_of(id)
            .map_or(0.0, |(loaded, row)| gain_from_q15(loaded.rows[row].gain_q15))
    }

    pub fn coordinates(&self, id: SampleId) -> Option<(i16, i16)> {
        self.row_of(id).map(|(loaded, row)| {
            let row = &loaded.rows[row];
            (row.x, row.y)
        })
    }

    /// Returns the precomputed nearest neighbors of `id`, empty for unknown ids.
    pub fn neighbors(&self, id: SampleId) -> Neighbors {
        self.row_of(id)
            .map_or(Neighbors::EMPTY, |(loaded, row)| loaded.neighbors[row])
    }

    /// Finds the sample closest to `(x, y)`.
    pub fn nearest(&self, x: f32, y: f32) -> Option<SampleId> {
        let loaded = self.loaded.as_ref()?;
        loaded
            .grid
            .nearest(&loaded.rows, x, y)
            .map(|(row, _)| loaded.rows[row].id)
    }

    /// True if `id` is within `radius` of `(x, y)` and no other sample is closer.
    pub fn is_closest_within(&self, id: SampleId, x: f32, y: f32, radius: f32) -> bool {
        match self.row_of(id) {
            Some((loaded, row)) => loaded.grid.is_closest_within(&loaded.rows, row, x, y, radius),
            None => false,
        }
    }

    /// Iterates over every loaded sample id in file order.
    pub fn ids(&self) -> impl Iterator<Item = SampleId> + '_ {
        self.loaded
            .iter()
            .flat_map(|loaded| loaded.rows.iter().map(|row| row.id))
    }

    /// Number of samples in each spatial bin, row-major over a GRID_SIZE square.
    pub fn bin_occupancy(&self) -> Vec<usize> {
        self.loaded
            .as_ref()
            .map_or_else(|| SpatialGrid::empty().occupancy(), |l| l.grid.occupancy())
    }
}

impl std::fmt::Debug for SpatialSampleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialSampleIndex")
            .field("loaded", &self.is_loaded())
            .field("samples", &self.sample_count())
            .field("stub_kb", &(self.stub_bytes() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BakBuilder;

    fn three_point_index() -> SpatialSampleIndex {
        let bytes = BakBuilder::new()
            .sample(1, 0, 0, vec![100; 8])
            .sample(2, 100, 0, vec![200; 4])
            .sample_with_gain(3, 0, 100, vec![300; 2], 16384)
            .neighbors(1, vec![2, 3])
            .neighbors(2, vec![1])
            .build();
        let mut index = SpatialSampleIndex::new();
        index.load_bytes(&bytes).unwrap();
        index
    }

    #[test]
    fn test_lookups_for_known_ids() {
        let index = three_point_index();
        assert!(index.is_loaded());
        assert_eq!(index.sample_count(), 3);
        for id in index.ids().collect::<Vec<_>>() {
            assert!(index.stub(id).is_some());
            assert!(index.coordinates(id).is_some());
        }
        assert_eq!(index.stub(2), Some(&[200i16; 4][..]));
        assert_eq!(index.stub_length(1), 8);
        assert_eq!(index.stub_gain(3), 0.5);
        assert_eq!(index.coordinates(2), Some((100, 0)));
        assert_eq!(index.neighbors(1).as_slice(), &[2, 3]);
        assert!(index.neighbors(3).is_empty());
    }

    #[test]
    fn test_unknown_ids_are_absent() {
        let index = three_point_index();
        assert!(index.stub(42).is_none());
        assert!(index.stub_pcm(42).is_none());
        assert_eq!(index.stub_length(42), 0);
        assert_eq!(index.stub_gain(42), 0.0);
        assert!(index.coordinates(42).is_none());
        assert!(index.neighbors(42).is_empty());
    }

    #[test]
    fn test_nearest_three_points() {
        let index = three_point_index();
        assert_eq!(index.nearest(1.0, 1.0), Some(1));
        assert_eq!(index.nearest(90.0, 5.0), Some(2));
        assert_eq!(index.nearest(3.0, 80.0), Some(3));
        assert!(index.is_closest_within(1, 1.0, 1.0, 25.0));
        assert!(!index.is_closest_within(2, 1.0, 1.0, 25.0));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let bytes = BakBuilder::new()
            .sample(5, 0, 0, vec![1])
            .sample(5, 10, 10, vec![2])
            .build();
        let mut index = SpatialSampleIndex::new();
        assert!(matches!(
            index.load_bytes(&bytes),
            Err(IndexError::DuplicateId(5))
        ));
        assert!(!index.is_loaded());
    }

    #[test]
    fn test_failed_load_leaves_index_unloaded() {
        let mut index = three_point_index();
        assert!(index.load_bytes(&[0u8; 32]).is_err());
        assert!(!index.is_loaded());
        assert!(index.stub(1).is_none());
        assert_eq!(index.nearest(0.0, 0.0), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.bak");
        BakBuilder::new()
            .sample(11, -300, 300, vec![1, 2, 3])
            .write(&path)
            .unwrap();

        let mut index = SpatialSampleIndex::new();
        index.load(&path).unwrap();
        assert_eq!(index.stub(11), Some(&[1i16, 2, 3][..]));

        let mut missing = SpatialSampleIndex::new();
        assert!(matches!(
            missing.load(&dir.path().join("nope.bak")),
            Err(IndexError::Io(_))
        ));
    }

    #[test]
    fn test_unload_is_idempotent() {
        let mut index = three_point_index();
        index.unload();
        index.unload();
        assert_eq!(index.sample_count(), 0);
        assert_eq!(index.bin_occupancy().iter().sum::<usize>(), 0);
    }
}
