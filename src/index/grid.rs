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
//! Uniform spatial grid over the scatter coordinates.

use super::format::IndexRow;

pub const GRID_SIZE: usize = 32;
/// Width of one bin in coordinate units (65536 / 32).
pub const CELL_SIZE: f32 = 2048.0;

/// Buckets row indices by the bin their coordinate falls into.
pub struct SpatialGrid {
    bins: Vec<Vec<u16>>,
}

fn cell_of(coordinate: f32) -> usize {
    let cell = ((coordinate + 32768.0) / CELL_SIZE).floor();
    cell.clamp(0.0, (GRID_SIZE - 1) as f32) as usize
}

#[inline]
fn distance_sq(row: &IndexRow, x: f32, y: f32) -> f32 {
    let dx = row.x as f32 - x;
    let dy = row.y as f32 - y;
    dx * dx + dy * dy
}

impl SpatialGrid {
    pub fn build(rows: &[IndexRow]) -> SpatialGrid {
        let mut bins = vec![Vec::new(); GRID_SIZE * GRID_SIZE];
        for (index, row) in rows.iter().enumerate() {
            let cx = cell_of(row.x as f32);
            let cy = cell_of(row.y as f32);
            bins[cy * GRID_SIZE + cx].push(index as u16);
        }
        SpatialGrid { bins }
    }

    pub fn empty() -> SpatialGrid {
        SpatialGrid { bins: Vec::new() }
    }

    /// Number of rows in each bin, row-major.
    pub fn occupancy(&self) -> Vec<usize> {
        self.bins.iter().map(Vec::len).collect()
    }

    /// Visits every row in the bins at Chebyshev ring `ring` around `(cx, cy)`.
    fn visit_ring(&self, cx: usize, cy: usize, ring: usize, mut visit: impl FnMut(u16)) {
        let ring = ring as isize;
        let (cx, cy) = (cx as isize, cy as isize);
        for gy in (cy - ring)..=(cy + ring) {
            if gy < 0 || gy >= GRID_SIZE as isize {
                continue;
            }
            for gx in (cx - ring)..=(cx + ring) {
                if gx < 0 || gx >= GRID_SIZE as isize {
                    continue;
                }
                // Interior cells belong to smaller rings.
                if (gy - cy).abs() != ring && (gx - cx).abs() != ring {
                    continue;
                }
                for &row in &self.bins[gy as usize * GRID_SIZE + gx as usize] {
                    visit(row);
                }
            }
        }
    }

    /// Returns the row closest to `(x, y)` and its squared distance. Ties go to
    /// the lowest row index.
    pub fn nearest(&self, rows: &[IndexRow], x: f32, y: f32) -> Option<(usize, f32)> {
        if self.bins.is_empty() {
            return None;
        }
        let (cx, cy) = (cell_of(x), cell_of(y));
        let mut best: Option<(usize, f32)> = None;

        for ring in 0..GRID_SIZE {
            self.visit_ring(cx, cy, ring, |row| {
                let row = row as usize;
                let d2 = distance_sq(&rows[row], x, y);
                let better = match best {
                    None => true,
                    Some((best_row, best_d2)) => d2 < best_d2 || (d2 == best_d2 && row < best_row),
                };
                if better {
                    best = Some((row, d2));
                }
            });

            // Anything in a later ring is at least `ring` whole cells away.
            if let Some((_, best_d2)) = best {
                let bound = ring as f32 * CELL_SIZE;
                if best_d2 < bound * bound {
                    break;
                }
            }
        }
        best
    }

    /// True if `candidate` lies within `radius` of `(x, y)` and no other row is
    /// strictly closer.
    pub fn is_closest_within(
        &self,
        rows: &[IndexRow],
        candidate: usize,
        x: f32,
        y: f32,
        radius: f32,
    ) -> bool {
        let Some(candidate_row) = rows.get(candidate) else {
            return false;
        };
        let candidate_d2 = distance_sq(candidate_row, x, y);
        if candidate_d2 > radius * radius {
            return false;
        }

        let (x0, x1) = (cell_of(x - radius), cell_of(x + radius));
        let (y0, y1) = (cell_of(y - radius), cell_of(y + radius));
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                for &row in &self.bins[gy * GRID_SIZE + gx] {
                    let row = row as usize;
                    if row != candidate && distance_sq(&rows[row], x, y) < candidate_d2 {
                        return false;
                    }
                }
            }
        }
        true
    }
}
