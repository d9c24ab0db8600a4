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
//! Binary layout of the stub index (`.bak`) file.
//!
//! ```text
//! header (64 bytes, u32 LE): sample_count, index_ofs, stub_ofs, coord_ofs, knn_ofs, reserved...
//! index rows (24 bytes each): id:u64 stub_ofs:u32 stub_frames:u16 gain_q15:u16 x:i16 y:i16 reserved:[u8; 4]
//! stub section: mono i16 LE PCM, addressed by row stub_ofs (bytes, relative to the section)
//! knn section: sample_count * 16 u16 row indices, 0xFFFF terminates a list early
//! ```

use super::error::IndexError;

pub const HEADER_SIZE: usize = 64;
pub const ROW_SIZE: usize = 24;
pub const MAX_NEIGHBORS: usize = 16;
pub const NEIGHBOR_SENTINEL: u16 = 0xFFFF;
/// Row indices are u16 and 0xFFFF is the sentinel.
pub const MAX_SAMPLE_COUNT: u32 = 0xFFFF;

/// One decoded index row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRow {
    pub id: u64,
    pub stub_byte_offset: u32,
    pub stub_frames: u16,
    pub gain_q15: u16,
    pub x: i16,
    pub y: i16,
}

/// The fully validated contents of a stub index file.
pub struct ParsedIndex {
    pub rows: Vec<IndexRow>,
    pub stub_pcm: Vec<i16>,
    /// Per-row neighbor row indices, terminated by the sentinel.
    pub knn: Vec<[u16; MAX_NEIGHBORS]>,
}

struct Header {
    sample_count: u32,
    index_offset: usize,
    stub_offset: usize,
    coord_offset: usize,
    knn_offset: usize,
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn parse_header(bytes: &[u8]) -> Result<Header, IndexError> {
    if bytes.len() <= HEADER_SIZE {
        return Err(IndexError::TooSmall(bytes.len()));
    }

    let sample_count = read_u32(bytes, 0);
    if sample_count == 0 || sample_count > MAX_SAMPLE_COUNT {
        return Err(IndexError::BadSampleCount(sample_count));
    }

    Ok(Header {
        sample_count,
        index_offset: read_u32(bytes, 4) as usize,
        stub_offset: read_u32(bytes, 8) as usize,
        coord_offset: read_u32(bytes, 12) as usize,
        knn_offset: read_u32(bytes, 16) as usize,
    })
}

fn section_end(header: &Header, start: usize, file_len: usize) -> usize {
    [header.index_offset, header.coord_offset, header.knn_offset]
        .into_iter()
        .filter(|&ofs| ofs > start)
        .min()
        .unwrap_or(file_len)
        .min(file_len)
}

/// Parses and validates a complete stub index image.
pub fn parse(bytes: &[u8]) -> Result<ParsedIndex, IndexError> {
    let header = parse_header(bytes)?;
    let count = header.sample_count as usize;

    let rows_end = count
        .checked_mul(ROW_SIZE)
        .and_then(|len| header.index_offset.checked_add(len))
        .filter(|&end| header.index_offset >= HEADER_SIZE && end <= bytes.len())
        .ok_or(IndexError::SectionOutOfBounds {
            section: "index",
            offset: header.index_offset,
        })?;

    if header.stub_offset < HEADER_SIZE || header.stub_offset > bytes.len() {
        return Err(IndexError::SectionOutOfBounds {
            section: "stub",
            offset: header.stub_offset,
        });
    }
    let stub_end = section_end(&header, header.stub_offset, bytes.len());
    let stub_bytes = &bytes[header.stub_offset..stub_end];
    let stub_pcm: Vec<i16> = stub_bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut rows = Vec::with_capacity(count);
    for at in (header.index_offset..rows_end).step_by(ROW_SIZE) {
        let row = IndexRow {
            id: read_u64(bytes, at),
            stub_byte_offset: read_u32(bytes, at + 8),
            stub_frames: read_u16(bytes, at + 12),
            gain_q15: read_u16(bytes, at + 14),
            x: read_u16(bytes, at + 16) as i16,
            y: read_u16(bytes, at + 18) as i16,
        };
        if row.id == 0 {
            return Err(IndexError::ReservedId(rows.len()));
        }
        let stub_start = row.stub_byte_offset as usize;
        let stub_len = row.stub_frames as usize * 2;
        if stub_start % 2 != 0 || stub_start + stub_len > stub_pcm.len() * 2 {
            return Err(IndexError::StubOutOfBounds(row.id));
        }
        rows.push(row);
    }

    let knn = parse_knn(bytes, &header)?;

    Ok(ParsedIndex {
        rows,
        stub_pcm,
        knn,
    })
}

fn parse_knn(bytes: &[u8], header: &Header) -> Result<Vec<[u16; MAX_NEIGHBORS]>, IndexError> {
    let count = header.sample_count as usize;
    if header.knn_offset == 0 {
        return Ok(vec![[NEIGHBOR_SENTINEL; MAX_NEIGHBORS]; count]);
    }

    let list_size = MAX_NEIGHBORS * 2;
    let end = header.knn_offset + count * list_size;
    if header.knn_offset < HEADER_SIZE || end > bytes.len() {
        return Err(IndexError::SectionOutOfBounds {
            section: "knn",
            offset: header.knn_offset,
        });
    }

    let mut knn = Vec::with_capacity(count);
    for row in 0..count {
        let base = header.knn_offset + row * list_size;
        let mut list = [NEIGHBOR_SENTINEL; MAX_NEIGHBORS];
        for (slot, entry) in list.iter_mut().enumerate() {
            let neighbor = read_u16(bytes, base + slot * 2);
            if neighbor == NEIGHBOR_SENTINEL {
                break;
            }
            if neighbor as usize >= count {
                return Err(IndexError::BadNeighbor { row, neighbor });
            }
            *entry = neighbor;
        }
        knn.push(list);
    }
    Ok(knn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BakBuilder;

    #[test]
    fn test_parse_rows_and_stubs() {
        let bytes = BakBuilder::new()
            .sample(7, 10, 20, vec![1, 2, 3])
            .sample(9, -5, 40, vec![4, 5])
            .build();

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].id, 7);
        assert_eq!((parsed.rows[1].x, parsed.rows[1].y), (-5, 40));
        let row = parsed.rows[1];
        let start = row.stub_byte_offset as usize / 2;
        assert_eq!(&parsed.stub_pcm[start..start + 2], &[4, 5]);
    }

    #[test]
    fn test_rejects_tiny_file() {
        assert!(matches!(parse(&[0u8; 64]), Err(IndexError::TooSmall(64))));
        assert!(matches!(parse(&[]), Err(IndexError::TooSmall(0))));
    }

    #[test]
    fn test_rejects_bad_sample_count() {
        let mut bytes = BakBuilder::new().sample(1, 0, 0, vec![0]).build();
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(parse(&bytes), Err(IndexError::BadSampleCount(0))));

        bytes[0..4].copy_from_slice(&100_000u32.to_le_bytes());
        assert!(matches!(
            parse(&bytes),
            Err(IndexError::BadSampleCount(100_000))
        ));
    }

    #[test]
    fn test_rejects_truncated_rows() {
        let bytes = BakBuilder::new()
            .sample(1, 0, 0, vec![0])
            .sample(2, 0, 0, vec![0])
            .build();
        // Claim many more rows than the file holds.
        let mut bytes = bytes;
        bytes[0..4].copy_from_slice(&5000u32.to_le_bytes());
        assert!(matches!(
            parse(&bytes),
            Err(IndexError::SectionOutOfBounds { section: "index", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_neighbor() {
        let bytes = BakBuilder::new()
            .sample(1, 0, 0, vec![0])
            .neighbors(1, vec![5])
            .build_raw_neighbors();
        assert!(matches!(
            parse(&bytes),
            Err(IndexError::BadNeighbor { row: 0, neighbor: 5 })
        ));
    }

    #[test]
    fn test_missing_knn_section_means_no_neighbors() {
        let bytes = BakBuilder::new().sample(1, 0, 0, vec![0]).without_knn().build();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.knn[0][0], NEIGHBOR_SENTINEL);
    }
}
