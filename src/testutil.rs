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
//! Fixture builders and polling helpers shared by the unit tests.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};

use crate::cache::BODY_SAMPLE_RATE;
use crate::SampleId;

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(2);
    let timeout = Duration::from_secs(5);
    let max_tick = Duration::from_millis(50);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

struct BakSample {
    id: SampleId,
    x: i16,
    y: i16,
    pcm: Vec<i16>,
    gain_q15: u16,
}

/// Builds `.bak` stub index images.
pub struct BakBuilder {
    samples: Vec<BakSample>,
    neighbors: Vec<(SampleId, Vec<u64>)>,
    with_knn: bool,
}

impl BakBuilder {
    pub fn new() -> BakBuilder {
        BakBuilder {
            samples: Vec::new(),
            neighbors: Vec::new(),
            with_knn: true,
        }
    }

    pub fn sample(self, id: SampleId, x: i16, y: i16, pcm: Vec<i16>) -> BakBuilder {
        self.sample_with_gain(id, x, y, pcm, 32768)
    }

    pub fn sample_with_gain(
        mut self,
        id: SampleId,
        x: i16,
        y: i16,
        pcm: Vec<i16>,
        gain_q15: u16,
    ) -> BakBuilder {
        self.samples.push(BakSample {
            id,
            x,
            y,
            pcm,
            gain_q15,
        });
        self
    }

    /// Sets the neighbor list of `id`. Values are sample ids for `build` and
    /// raw row indices for `build_raw_neighbors`.
    pub fn neighbors(mut self, id: SampleId, neighbors: Vec<u64>) -> BakBuilder {
        self.neighbors.push((id, neighbors));
        self
    }

    pub fn without_knn(mut self) -> BakBuilder {
        self.with_knn = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.encode(|id| {
            self.samples
                .iter()
                .position(|s| s.id == id)
                .expect("neighbor must be a known sample") as u16
        })
    }

    pub fn build_raw_neighbors(&self) -> Vec<u8> {
        self.encode(|raw| raw as u16)
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.build())
    }

    fn encode(&self, resolve: impl Fn(u64) -> u16) -> Vec<u8> {
        let count = self.samples.len();
        let index_ofs = 64usize;
        let stub_ofs = index_ofs + count * 24;
        let stub_len: usize = self.samples.iter().map(|s| s.pcm.len() * 2).sum();
        let knn_ofs = if self.with_knn { stub_ofs + stub_len } else { 0 };

        let mut out = vec![0u8; 64];
        for (slot, value) in [count, index_ofs, stub_ofs, 0, knn_ofs].iter().enumerate() {
            out[slot * 4..slot * 4 + 4].copy_from_slice(&(*value as u32).to_le_bytes());
        }

        let mut stub_cursor = 0u32;
        for sample in &self.samples {
            out.extend_from_slice(&sample.id.to_le_bytes());
            out.extend_from_slice(&stub_cursor.to_le_bytes());
            out.extend_from_slice(&(sample.pcm.len() as u16).to_le_bytes());
            out.extend_from_slice(&sample.gain_q15.to_le_bytes());
            out.extend_from_slice(&sample.x.to_le_bytes());
            out.extend_from_slice(&sample.y.to_le_bytes());
            out.extend_from_slice(&[0u8; 4]);
            stub_cursor += sample.pcm.len() as u32 * 2;
        }

        for sample in &self.samples {
            for value in &sample.pcm {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }

        if self.with_knn {
            for sample in &self.samples {
                let mut list = [0xFFFFu16; 16];
                if let Some((_, neighbors)) = self.neighbors.iter().find(|(id, _)| *id == sample.id)
                {
                    for (slot, &neighbor) in neighbors.iter().take(16).enumerate() {
                        list[slot] = resolve(neighbor);
                    }
                }
                for value in list {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        out
    }
}

/// Number of body frames a pak record of `length_ms` decodes to.
pub fn body_frames(length_ms: u16) -> usize {
    length_ms as usize * BODY_SAMPLE_RATE as usize / 1000
}

struct PakRecord {
    id: SampleId,
    length_ms: u16,
    gain_q15: u16,
}

/// Builds `.pak` body images. Payload sample `i` of a body is `(i % 1000) as i16 + 1`.
pub struct PakBuilder {
    records: Vec<PakRecord>,
}

impl PakBuilder {
    pub fn new() -> PakBuilder {
        PakBuilder {
            records: Vec::new(),
        }
    }

    pub fn body(mut self, id: SampleId, length_ms: u16) -> PakBuilder {
        self.records.push(PakRecord {
            id,
            length_ms,
            gain_q15: 32768,
        });
        self
    }

    pub fn expected_sample(frame: usize) -> i16 {
        (frame % 1000) as i16 + 1
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.records.len();
        let index_ofs = 32usize;
        let mut out = vec![0u8; 32];
        out[0..4].copy_from_slice(&(count as u32).to_le_bytes());
        out[4..8].copy_from_slice(&(index_ofs as u32).to_le_bytes());

        let align = |n: usize| n.div_ceil(4096) * 4096;
        let mut payload_ofs = align(index_ofs + count * 16);
        let mut offsets = Vec::with_capacity(count);
        for record in &self.records {
            offsets.push(payload_ofs);
            payload_ofs = align(payload_ofs + body_frames(record.length_ms) * 2);
        }

        for (record, &ofs) in self.records.iter().zip(&offsets) {
            out.extend_from_slice(&record.id.to_le_bytes());
            out.extend_from_slice(&(ofs as u32).to_le_bytes());
            out.extend_from_slice(&record.length_ms.to_le_bytes());
            out.extend_from_slice(&record.gain_q15.to_le_bytes());
        }

        for (record, &ofs) in self.records.iter().zip(&offsets) {
            out.resize(ofs, 0);
            for frame in 0..body_frames(record.length_ms) {
                out.extend_from_slice(&Self::expected_sample(frame).to_le_bytes());
            }
        }

        out
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.build())
    }
}
