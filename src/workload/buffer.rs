//! Deterministic byte-buffer generation for writes and read verification
//!
//! Every worker builds one large buffer once per run, then slices a
//! per-(worker, file) window out of it for each operation. Because the
//! buffer contents are a pure function of the generation mode, the reader
//! side can rebuild the identical bytes and compare, which is what makes
//! read verification meaningful across operations and processes.

use rand::Rng;
use rand_distr::{Distribution as _, Exp};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::util::fnv1a;

/// log2 of the large buffer size.
pub const BIGGEST_BUF_SIZE_BITS: u32 = 20;
/// The large buffer size: 1 MiB.
pub const BIGGEST_BUF_SIZE: usize = 1 << BIGGEST_BUF_SIZE_BITS;
/// log2 of the repeated random segment.
pub const RANDOM_SEG_SIZE_BITS: u32 = 10;
/// Trailing padding so different offsets yield different leading patterns.
pub const BUF_OFFSET_RANGE: usize = 1 << 10;
/// Exponential sizes are capped at this multiple of the mean.
pub const RANDOM_SIZE_LIMIT: u64 = 8;

/// File size distribution across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeDistribution {
    /// Every file is exactly `total_size_kb`.
    #[default]
    Fixed,
    /// Sizes drawn from Exp(1/total_size_kb), clamped to [1, 8 * mean].
    Exponential,
}

impl SizeDistribution {
    pub fn name(&self) -> &'static str {
        match self {
            SizeDistribution::Fixed => "fixed",
            SizeDistribution::Exponential => "exponential",
        }
    }
}

impl std::str::FromStr for SizeDistribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(SizeDistribution::Fixed),
            "exponential" => Ok(SizeDistribution::Exponential),
            other => Err(format!("unrecognized file size distribution: {}", other)),
        }
    }
}

/// Build the large generation buffer: `BIGGEST_BUF_SIZE + BUF_OFFSET_RANGE`
/// bytes.
///
/// Compressible mode repeats one 2^10-byte segment (random bytes in 0..127
/// when `contents_random`, else the deterministic `k % 128` ramp) by
/// successive doubling. Incompressible mode fills the whole buffer from the
/// RNG so it does not compress. Backslash bytes are replaced to keep logged
/// buffer excerpts unambiguous.
pub fn create_biggest_buf(
    incompressible: bool,
    contents_random: bool,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<u8> {
    let mut buf: Vec<u8>;
    if incompressible {
        buf = vec![0u8; BIGGEST_BUF_SIZE];
        rng.fill(&mut buf[..]);
    } else {
        let seg_size = 1usize << RANDOM_SEG_SIZE_BITS;
        let mut seg: Vec<u8> = if contents_random {
            (0..seg_size).map(|_| rng.gen_range(0..127u8)).collect()
        } else {
            (0..seg_size).map(|k| (k % 128) as u8).collect()
        };
        for b in seg.iter_mut() {
            if *b == b'\\' {
                *b = b'!';
            }
        }
        buf = seg;
        // keep doubling until the buffer is big enough
        for _ in 0..(BIGGEST_BUF_SIZE_BITS - RANDOM_SEG_SIZE_BITS) {
            let len = buf.len();
            buf.extend_from_within(0..len);
        }
    }
    let head: Vec<u8> = buf[0..BUF_OFFSET_RANGE].to_vec();
    buf.extend_from_slice(&head);
    debug_assert_eq!(buf.len(), BIGGEST_BUF_SIZE + BUF_OFFSET_RANGE);
    buf
}

/// Starting byte within the large buffer for `(worker_id, file_num)`.
///
/// Gives every file in a run a distinguishable leading pattern while staying
/// reproducible across processes.
pub fn unique_offset(worker_id: &str, file_num: usize) -> usize {
    ((fnv1a(worker_id) as usize).wrapping_add(file_num)) % BUF_OFFSET_RANGE
}

/// Size in KB of the next file.
pub fn next_file_size_kb(
    distribution: SizeDistribution,
    total_size_kb: u64,
    rng: &mut Xoshiro256PlusPlus,
) -> u64 {
    match distribution {
        SizeDistribution::Fixed => total_size_kb,
        SizeDistribution::Exponential => {
            if total_size_kb == 0 {
                return 0;
            }
            let exp = Exp::new(1.0 / total_size_kb as f64)
                .expect("mean file size is positive");
            let sampled = exp.sample(rng).round() as u64;
            sampled.clamp(1, total_size_kb * RANDOM_SIZE_LIMIT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(seed)
    }

    #[test]
    fn test_buffer_length() {
        let buf = create_biggest_buf(false, false, &mut rng(1));
        assert_eq!(buf.len(), (1 << 20) + 1024);
    }

    #[test]
    fn test_compressible_deterministic_repeats() {
        let buf = create_biggest_buf(false, false, &mut rng(1));
        let seg = 1usize << RANDOM_SEG_SIZE_BITS;
        // segment repeats across the whole body
        assert_eq!(&buf[0..seg], &buf[seg..2 * seg]);
        assert_eq!(&buf[0..seg], &buf[BIGGEST_BUF_SIZE - seg..BIGGEST_BUF_SIZE]);
        // tail padding mirrors the head
        assert_eq!(&buf[0..BUF_OFFSET_RANGE], &buf[BIGGEST_BUF_SIZE..]);
    }

    #[test]
    fn test_compressible_same_regardless_of_rng() {
        // the deterministic ramp ignores the RNG entirely
        let a = create_biggest_buf(false, false, &mut rng(1));
        let b = create_biggest_buf(false, false, &mut rng(999));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_backslash_bytes_in_compressible() {
        for buf in [
            create_biggest_buf(false, false, &mut rng(1)),
            create_biggest_buf(false, true, &mut rng(2)),
        ] {
            assert!(!buf[..BIGGEST_BUF_SIZE].contains(&b'\\'));
        }
    }

    #[test]
    fn test_incompressible_reproducible_from_seed() {
        let a = create_biggest_buf(true, false, &mut rng(5));
        let b = create_biggest_buf(true, false, &mut rng(5));
        let c = create_biggest_buf(true, false, &mut rng(6));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_incompressible_does_not_repeat_segment() {
        let buf = create_biggest_buf(true, false, &mut rng(5));
        let seg = 1usize << RANDOM_SEG_SIZE_BITS;
        assert_ne!(&buf[0..seg], &buf[seg..2 * seg]);
    }

    #[test]
    fn test_unique_offset_in_range_and_shifts_per_file() {
        let o0 = unique_offset("00", 0);
        let o1 = unique_offset("00", 1);
        assert!(o0 < BUF_OFFSET_RANGE);
        assert_eq!((o0 + 1) % BUF_OFFSET_RANGE, o1);
        assert_ne!(unique_offset("00", 0), unique_offset("01", 0));
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(next_file_size_kb(SizeDistribution::Fixed, 64, &mut rng(3)), 64);
    }

    #[test]
    fn test_exponential_bounds_and_mean() {
        let mut r = rng(11);
        let mean_kb = 16u64;
        let n = 1000;
        let mut sum = 0u64;
        for _ in 0..n {
            let sz = next_file_size_kb(SizeDistribution::Exponential, mean_kb, &mut r);
            assert!((1..=mean_kb * RANDOM_SIZE_LIMIT).contains(&sz));
            sum += sz;
        }
        let empirical = sum as f64 / n as f64;
        // clamping shaves the tail, so allow 20% drift around the mean
        assert!(
            (empirical - mean_kb as f64).abs() < mean_kb as f64 * 0.2,
            "empirical mean {} too far from {}",
            empirical,
            mean_kb
        );
    }

    #[test]
    fn test_exponential_reproducible_for_same_seed() {
        let mut r1 = rng(77);
        let mut r2 = rng(77);
        for _ in 0..100 {
            assert_eq!(
                next_file_size_kb(SizeDistribution::Exponential, 16, &mut r1),
                next_file_size_kb(SizeDistribution::Exponential, 16, &mut r2)
            );
        }
    }

    #[test]
    fn test_size_distribution_parse() {
        assert_eq!(
            "fixed".parse::<SizeDistribution>().unwrap(),
            SizeDistribution::Fixed
        );
        assert_eq!(
            "Exponential".parse::<SizeDistribution>().unwrap(),
            SizeDistribution::Exponential
        );
        assert!("gaussian".parse::<SizeDistribution>().is_err());
    }
}
