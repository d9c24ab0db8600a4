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
use crate::SampleId;

/// Reasons a stub index fails to load. Any of these leaves the index unloaded.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index file is too small ({0} bytes)")]
    TooSmall(usize),

    #[error("Implausible sample count {0}")]
    BadSampleCount(u32),

    #[error("{section} section at offset {offset} runs past end of file")]
    SectionOutOfBounds { section: &'static str, offset: usize },

    #[error("Sample id 0 is reserved (row {0})")]
    ReservedId(usize),

    #[error("Duplicate sample id {0}")]
    DuplicateId(SampleId),

    #[error("Stub for sample {0} lies outside the stub section")]
    StubOutOfBounds(SampleId),

    #[error("Neighbor row {neighbor} of row {row} does not exist")]
    BadNeighbor { row: usize, neighbor: u16 },
}
