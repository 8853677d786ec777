//! Log-exponential latency histogram
//!
//! Buckets are organized into groups. Every bucket within a group has the
//! same width; group 0 covers `[0, buckets_per_group * smallest_interval)`,
//! group 1 covers the equal-width range after it, and each later group
//! doubles the width of its predecessor. Locating a sample's group is an
//! integer log2 of `t / smallest_interval`, so insertion is O(1).
//!
//! Dumps are cumulative-delta: each dump writes the counts accumulated since
//! the previous dump and then remembers the current totals. A dump file may
//! therefore hold many concatenated records, one per dump interval, and
//! percentiles-over-time fall out without double counting.

use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use thiserror::Error;

/// Default number of bucket groups.
pub const DEFAULT_BUCKET_GROUPS: usize = 29;
/// Default log2 of buckets per group (64 buckets).
pub const DEFAULT_BUCKET_BITS: u32 = 6;
/// Default width of the very first bucket, in seconds (1 microsecond).
pub const DEFAULT_SMALLEST_INTERVAL: f64 = 0.000_001;

const FORMAT_VERSION: &str = "1.0";

/// Errors from parsing a histogram dump file.
#[derive(Debug, Error)]
pub enum HistogramLoadError {
    #[error("wrong version line: {0}")]
    WrongVersion(String),
    #[error("missing or malformed field: {0}")]
    MissingField(String),
    #[error("declared total-samples {declared} != reconstructed sum {actual}")]
    TotalMismatch { declared: u64, actual: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Latency histogram with log-exponential bucket layout.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    bucket_groups: usize,
    bucket_bits: u32,
    smallest_interval: f64,
    counts: Vec<u64>,
    /// totals as of the previous dump, for delta computation
    dumped: Vec<u64>,
}

impl LatencyHistogram {
    /// Create a histogram with the default layout (29 groups of 64 buckets,
    /// 1 us smallest interval).
    pub fn new() -> Self {
        Self::with_layout(
            DEFAULT_BUCKET_GROUPS,
            DEFAULT_BUCKET_BITS,
            DEFAULT_SMALLEST_INTERVAL,
        )
    }

    /// Create a histogram with an explicit layout.
    pub fn with_layout(bucket_groups: usize, bucket_bits: u32, smallest_interval: f64) -> Self {
        assert!(bucket_groups >= 2, "need at least two bucket groups");
        assert!(bucket_bits >= 1 && bucket_bits < 32);
        assert!(smallest_interval > 0.0);
        let total = bucket_groups << bucket_bits;
        Self {
            bucket_groups,
            bucket_bits,
            smallest_interval,
            counts: vec![0; total],
            dumped: vec![0; total],
        }
    }

    pub fn bucket_groups(&self) -> usize {
        self.bucket_groups
    }

    pub fn buckets_per_group(&self) -> usize {
        1 << self.bucket_bits
    }

    pub fn smallest_interval(&self) -> f64 {
        self.smallest_interval
    }

    /// Lower bound of group `g` in seconds.
    fn group_start(&self, g: usize) -> f64 {
        if g == 0 {
            0.0
        } else {
            self.buckets_per_group() as f64
                * self.smallest_interval
                * f64::powi(2.0, g as i32 - 1)
        }
    }

    /// Width of one bucket within group `g`.
    fn bucket_width(&self, g: usize) -> f64 {
        if g == 0 {
            self.smallest_interval
        } else {
            self.smallest_interval * f64::powi(2.0, g as i32 - 1)
        }
    }

    /// Record one sample of `t` seconds; returns `(group, bucket)` indexes.
    ///
    /// Samples beyond the last group clamp into its final bucket; negative or
    /// sub-resolution samples land in bucket (0, 0).
    pub fn add(&mut self, t: f64) -> (usize, usize) {
        let ratio = t / self.smallest_interval;
        let group = if ratio >= 1.0 {
            let log2 = (ratio as u64).ilog2() as i64;
            (log2 - self.bucket_bits as i64 + 1).clamp(0, self.bucket_groups as i64 - 1) as usize
        } else {
            0
        };
        let width = self.bucket_width(group);
        let offset = (t - self.group_start(group)).max(0.0);
        let bucket = ((offset / width) as usize).min(self.buckets_per_group() - 1);
        self.counts[(group << self.bucket_bits) + bucket] += 1;
        (group, bucket)
    }

    /// Count in one `(group, bucket)` cell.
    pub fn count_at(&self, group: usize, bucket: usize) -> u64 {
        self.counts[(group << self.bucket_bits) + bucket]
    }

    /// Total samples recorded since creation.
    pub fn total_samples(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Samples recorded since the previous dump.
    pub fn samples_since_dump(&self) -> u64 {
        self.counts
            .iter()
            .zip(self.dumped.iter())
            .map(|(c, d)| c - d)
            .sum()
    }

    /// Write one dump record: the per-bucket deltas since the previous dump,
    /// then snapshot the current totals so the next dump starts fresh.
    pub fn dump<W: Write>(
        &mut self,
        w: &mut W,
        thread_id: &str,
        time_sec: f64,
    ) -> io::Result<()> {
        let bpg = self.buckets_per_group();
        let delta_total = self.samples_since_dump();
        writeln!(w, "latency-histogram-version: {}", FORMAT_VERSION)?;
        writeln!(w, "thread: {}", thread_id)?;
        writeln!(w, "time-sec: {}", time_sec)?;
        writeln!(w, "bucket-bits: {}", self.bucket_bits)?;
        writeln!(w, "bucket-groups: {}", self.bucket_groups)?;
        writeln!(w, "smallest-interval: {}", self.smallest_interval)?;
        writeln!(w, "total-samples: {}", delta_total)?;
        for g in 0..self.bucket_groups {
            let mut line = String::new();
            for b in 0..bpg {
                if b > 0 {
                    line.push(',');
                }
                let idx = (g << self.bucket_bits) + b;
                let _ = write!(line, "{}", self.counts[idx] - self.dumped[idx]);
            }
            writeln!(w, "group-{}: {}", g, line)?;
        }
        writeln!(w)?;
        self.dumped.copy_from_slice(&self.counts);
        Ok(())
    }

    /// Parse every dump record in a reader. Each returned histogram holds one
    /// dump interval's delta counters; the declared per-record total is
    /// verified against the reconstructed sum.
    pub fn load_all<R: BufRead>(r: R) -> Result<Vec<HistogramDump>, HistogramLoadError> {
        let mut lines = r.lines();
        let mut dumps = Vec::new();

        loop {
            // skip blank separators; stop at EOF
            let first = loop {
                match lines.next() {
                    None => return Ok(dumps),
                    Some(line) => {
                        let line = line?;
                        if !line.trim().is_empty() {
                            break line;
                        }
                    }
                }
            };

            let version = parse_field(&first, "latency-histogram-version")?;
            if version != FORMAT_VERSION {
                return Err(HistogramLoadError::WrongVersion(version));
            }
            let thread = parse_field(&next_line(&mut lines)?, "thread")?;
            let time_sec: f64 = parse_field(&next_line(&mut lines)?, "time-sec")?
                .parse()
                .map_err(|_| HistogramLoadError::MissingField("time-sec".into()))?;
            let bucket_bits: u32 = parse_field(&next_line(&mut lines)?, "bucket-bits")?
                .parse()
                .map_err(|_| HistogramLoadError::MissingField("bucket-bits".into()))?;
            let bucket_groups: usize = parse_field(&next_line(&mut lines)?, "bucket-groups")?
                .parse()
                .map_err(|_| HistogramLoadError::MissingField("bucket-groups".into()))?;
            let smallest_interval: f64 =
                parse_field(&next_line(&mut lines)?, "smallest-interval")?
                    .parse()
                    .map_err(|_| HistogramLoadError::MissingField("smallest-interval".into()))?;
            let declared: u64 = parse_field(&next_line(&mut lines)?, "total-samples")?
                .parse()
                .map_err(|_| HistogramLoadError::MissingField("total-samples".into()))?;

            let mut histo =
                LatencyHistogram::with_layout(bucket_groups, bucket_bits, smallest_interval);
            for g in 0..bucket_groups {
                let key = format!("group-{}", g);
                let csv = parse_field(&next_line(&mut lines)?, &key)?;
                for (b, val) in csv.split(',').enumerate() {
                    if b >= histo.buckets_per_group() {
                        return Err(HistogramLoadError::MissingField(key));
                    }
                    let n: u64 = val
                        .trim()
                        .parse()
                        .map_err(|_| HistogramLoadError::MissingField(key.clone()))?;
                    histo.counts[(g << bucket_bits) + b] = n;
                }
            }

            let actual = histo.total_samples();
            if actual != declared {
                return Err(HistogramLoadError::TotalMismatch { declared, actual });
            }
            dumps.push(HistogramDump {
                thread,
                time_sec,
                histogram: histo,
            });
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// One dump interval reconstructed from a histogram file.
#[derive(Debug, Clone)]
pub struct HistogramDump {
    pub thread: String,
    pub time_sec: f64,
    pub histogram: LatencyHistogram,
}

fn next_line(
    lines: &mut std::io::Lines<impl BufRead>,
) -> Result<String, HistogramLoadError> {
    match lines.next() {
        Some(l) => Ok(l?),
        None => Err(HistogramLoadError::MissingField("unexpected EOF".into())),
    }
}

fn parse_field(line: &str, key: &str) -> Result<String, HistogramLoadError> {
    let (k, v) = line
        .split_once(':')
        .ok_or_else(|| HistogramLoadError::MissingField(key.to_string()))?;
    if k.trim() != key {
        return Err(HistogramLoadError::MissingField(format!(
            "expected {}, found {}",
            key,
            k.trim()
        )));
    }
    Ok(v.trim().to_string())
}
