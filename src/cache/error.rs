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

/// Reasons a body pak cannot be opened. Any of these leaves the cache inert.
#[derive(Debug, thiserror::Error)]
pub enum PakError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pak index is truncated")]
    Truncated,

    #[error("Implausible sample count {0}")]
    BadSampleCount(u32),

    #[error("Sample id 0 is reserved (record {0})")]
    ReservedId(usize),

    #[error("Duplicate sample id {0}")]
    DuplicateId(SampleId),

    #[error("Body of sample {id} starts at unaligned offset {offset}")]
    MisalignedOffset { id: SampleId, offset: u32 },

    #[error("Unable to start loader thread: {0}")]
    Spawn(std::io::Error),
}
