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
//! Shared handles to mono 16-bit PCM.

use std::sync::Arc;

/// Scale from i16 samples to f32 full scale.
pub const I16_SCALE: f32 = 1.0 / 32768.0;

/// Converts a Q15 fixed-point gain (32768 = unity) to linear gain.
pub fn gain_from_q15(gain_q15: u16) -> f32 {
    gain_q15 as f32 / 32768.0
}

/// A window into a reference-counted PCM buffer.
///
/// Stubs are windows into the index's single stub blob; bodies own their whole
/// buffer. Cloning only bumps the reference count.
#[derive(Clone)]
pub struct PcmSlice {
    data: Arc<[i16]>,
    start: usize,
    len: usize,
}

impl PcmSlice {
    /// Creates a slice over `data[start..start + len]`. Returns None if the
    /// window does not fit.
    pub fn new(data: Arc<[i16]>, start: usize, len: usize) -> Option<PcmSlice> {
        let end = start.checked_add(len)?;
        if end > data.len() {
            return None;
        }
        Some(PcmSlice { data, start, len })
    }

    /// Wraps a whole buffer.
    pub fn whole(data: Arc<[i16]>) -> PcmSlice {
        let len = data.len();
        PcmSlice {
            data,
            start: 0,
            len,
        }
    }

    /// Returns the samples in this window.
    pub fn samples(&self) -> &[i16] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the number of frames (mono samples).
    pub fn frames(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the sample at `frame` as f32, or silence past the end.
    #[inline]
    pub fn sample_f32(&self, frame: usize) -> f32 {
        if frame < self.len {
            self.data[self.start + frame] as f32 * I16_SCALE
        } else {
            0.0
        }
    }

    /// True if both slices view the same window of the same buffer.
    pub fn same_window(&self, other: &PcmSlice) -> bool {
        Arc::ptr_eq(&self.data, &other.data) && self.start == other.start && self.len == other.len
    }

    /// Number of handles sharing the underlying buffer.
    #[cfg(test)]
    pub(crate) fn handles(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

impl std::fmt::Debug for PcmSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmSlice")
            .field("start", &self.start)
            .field("frames", &self.len)
            .finish()
    }
}
