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
//! Binary layout of the body pak (`.pak`) file.
//!
//! ```text
//! header (32 bytes, u32 LE): sample_count, index_ofs, reserved...
//! records (16 bytes each): id:u64 byte_ofs:u32 length_ms:u16 gain_q15:u16
//! payload: mono i16 LE PCM at BODY_SAMPLE_RATE, each body starting on a BLOCK_SIZE boundary
//! ```

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use super::error::PakError;
use crate::SampleId;

pub const HEADER_SIZE: usize = 32;
pub const RECORD_SIZE: usize = 16;
/// Storage block size; body offsets and reads are aligned to it.
pub const BLOCK_SIZE: u64 = 4096;
pub const MAX_SAMPLE_COUNT: u32 = 0xFFFF;
/// Body payload sample rate in Hz.
pub const BODY_SAMPLE_RATE: u32 = 22_050;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PakRecord {
    pub id: SampleId,
    pub byte_offset: u32,
    pub length_ms: u16,
    pub gain_q15: u16,
}

impl PakRecord {
    /// Frames this record decodes to when capped at `max_ms`.
    pub fn frames(&self, max_ms: u32) -> usize {
        let ms = (self.length_ms as u32).min(max_ms) as usize;
        ms * BODY_SAMPLE_RATE as usize / 1000
    }
}

/// Read-only lookup over the pak's records.
pub struct PakIndex {
    records: Vec<PakRecord>,
    by_id: HashMap<SampleId, usize>,
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), PakError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => PakError::Truncated,
        _ => PakError::Io(e),
    })
}

impl PakIndex {
    /// Reads and validates the header and record table.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<PakIndex, PakError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE];
        read_exact_or_truncated(reader, &mut header)?;

        let sample_count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let index_offset = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if sample_count == 0 || sample_count > MAX_SAMPLE_COUNT {
            return Err(PakError::BadSampleCount(sample_count));
        }

        let count = sample_count as usize;
        let mut table = vec![0u8; count * RECORD_SIZE];
        reader.seek(SeekFrom::Start(index_offset as u64))?;
        read_exact_or_truncated(reader, &mut table)?;

        let mut records = Vec::with_capacity(count);
        let mut by_id = HashMap::with_capacity(count);
        for (position, raw) in table.chunks_exact(RECORD_SIZE).enumerate() {
            let mut id = [0u8; 8];
            id.copy_from_slice(&raw[0..8]);
            let record = PakRecord {
                id: u64::from_le_bytes(id),
                byte_offset: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
                length_ms: u16::from_le_bytes([raw[12], raw[13]]),
                gain_q15: u16::from_le_bytes([raw[14], raw[15]]),
            };
            if record.id == 0 {
                return Err(PakError::ReservedId(position));
            }
            if record.byte_offset as u64 % BLOCK_SIZE != 0 {
                return Err(PakError::MisalignedOffset {
                    id: record.id,
                    offset: record.byte_offset,
                });
            }
            if by_id.insert(record.id, position).is_some() {
                return Err(PakError::DuplicateId(record.id));
            }
            records.push(record);
        }

        Ok(PakIndex { records, by_id })
    }

    pub fn get(&self, id: SampleId) -> Option<&PakRecord> {
        self.by_id.get(&id).map(|&position| &self.records[position])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PakRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testutil::PakBuilder;

    #[test]
    fn test_read_records() {
        let bytes = PakBuilder::new().body(3, 100).body(8, 50).build();
        let index = PakIndex::read_from(&mut Cursor::new(bytes)).unwrap();

        assert_eq!(index.len(), 2);
        let record = index.get(8).unwrap();
        assert_eq!(record.length_ms, 50);
        assert_eq!(record.byte_offset as u64 % BLOCK_SIZE, 0);
        assert!(index.get(4).is_none());
    }

    #[test]
    fn test_frames_capped_by_grade() {
        let record = PakRecord {
            id: 1,
            byte_offset: 0,
            length_ms: 5000,
            gain_q15: 0,
        };
        assert_eq!(record.frames(1500), 1500 * 22050 / 1000);
        assert_eq!(record.frames(10_000), 5000 * 22050 / 1000);
    }

    #[test]
    fn test_rejects_truncated_header() {
        let result = PakIndex::read_from(&mut Cursor::new(vec![1u8; 10]));
        assert!(matches!(result, Err(PakError::Truncated)));
    }

    #[test]
    fn test_rejects_truncated_table() {
        let mut bytes = PakBuilder::new().body(3, 100).build();
        bytes[0..4].copy_from_slice(&9000u32.to_le_bytes());
        bytes.truncate(HEADER_SIZE + RECORD_SIZE);
        let result = PakIndex::read_from(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(PakError::Truncated)));
    }

    #[test]
    fn test_rejects_misaligned_offset() {
        let mut bytes = PakBuilder::new().body(3, 100).build();
        // Record 0's byte offset lives at header + 8.
        bytes[HEADER_SIZE + 8..HEADER_SIZE + 12].copy_from_slice(&4100u32.to_le_bytes());
        let result = PakIndex::read_from(&mut Cursor::new(bytes));
        assert!(matches!(
            result,
            Err(PakError::MisalignedOffset { id: 3, offset: 4100 })
        ));
    }

    #[test]
    fn test_rejects_zero_count() {
        let mut bytes = PakBuilder::new().body(3, 100).build();
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        let result = PakIndex::read_from(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(PakError::BadSampleCount(0))));
    }
}
