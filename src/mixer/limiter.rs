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
//! Output soft limiter.

/// Level above which the limiter starts bending the signal.
pub const THRESHOLD: f32 = 0.8;

/// Soft-limits one sample. Linear below [`THRESHOLD`], then a tanh knee that
/// approaches full scale.
#[inline]
pub fn soft_limit(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= THRESHOLD {
        return x;
    }
    let headroom = 1.0 - THRESHOLD;
    let bent = THRESHOLD + headroom * ((magnitude - THRESHOLD) / headroom).tanh();
    bent.copysign(x)
}

/// Soft-limits a buffer in place.
pub fn soft_limit_buffer(buffer: &mut [f32]) {
    for sample in buffer.iter_mut() {
        *sample = soft_limit(*sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_below_threshold() {
        for x in [-0.8f32, -0.3, 0.0, 0.25, 0.8] {
            assert_eq!(soft_limit(x), x);
        }
    }

    #[test]
    fn test_knee_is_bounded_and_monotonic() {
        let mut previous = soft_limit(THRESHOLD);
        for step in 1..20 {
            let x = THRESHOLD + step as f32 * 0.05;
            let y = soft_limit(x);
            assert!(y < 1.0, "{} limited to {}", x, y);
            assert!(y >= previous);
            assert_eq!(soft_limit(-x), -y);
            previous = y;
        }
    }

    #[test]
    fn test_buffer() {
        let mut buffer = vec![0.5, 1.5, -1.5];
        soft_limit_buffer(&mut buffer);
        assert_eq!(buffer[0], 0.5);
        assert!(buffer[1] > THRESHOLD && buffer[1] < 1.0);
        assert_eq!(buffer[2], -buffer[1]);
    }
}
