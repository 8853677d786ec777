//! Per-operation response-time capture
//!
//! When measurement is enabled each operation appends a
//! `(op_name, start, duration)` triple; at the end of the run the samples
//! are written as a CSV into the shared directory, one row per operation,
//! with times relative to the worker's start. Optionally the durations also
//! feed a latency histogram whose dump is appended alongside.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::stats::histogram::LatencyHistogram;
use crate::util::time::epoch_now;

/// One measured operation: name, absolute start (epoch seconds), duration.
#[derive(Debug, Clone, Copy)]
pub struct RspSample {
    pub op: &'static str,
    pub start: f64,
    pub duration: f64,
}

/// Collects response-time samples for one worker.
#[derive(Debug, Default)]
pub struct RspTimes {
    enabled: bool,
    samples: Vec<RspSample>,
    op_start: Option<f64>,
    histogram: Option<LatencyHistogram>,
}

impl RspTimes {
    pub fn new(enabled: bool, with_histogram: bool) -> Self {
        Self {
            enabled,
            samples: Vec::new(),
            op_start: None,
            histogram: if enabled && with_histogram {
                Some(LatencyHistogram::new())
            } else {
                None
            },
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Mark the start of an operation.
    #[inline]
    pub fn op_start(&mut self) {
        if self.enabled {
            self.op_start = Some(epoch_now());
        }
    }

    /// Mark the end of an operation and record the sample.
    #[inline]
    pub fn op_end(&mut self, op: &'static str) {
        if let Some(start) = self.op_start.take() {
            let duration = epoch_now() - start;
            self.record(op, start, duration);
        }
    }

    /// Record a sample with an externally determined start and duration
    /// (used by the replication-wait operation, whose interval begins at the
    /// remote file's creation time).
    pub fn record(&mut self, op: &'static str, start: f64, duration: f64) {
        if !self.enabled {
            return;
        }
        self.samples.push(RspSample { op, start, duration });
        if let Some(h) = self.histogram.as_mut() {
            h.add(duration);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[RspSample] {
        &self.samples
    }

    /// Write the CSV of samples relative to `worker_start`, fsynced so the
    /// coordinator host sees it over a network filesystem.
    pub fn save_csv(&self, path: &Path, worker_start: f64) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        for s in &self.samples {
            writeln!(
                w,
                "{:>8}, {:9.6}, {:9.6}",
                s.op,
                s.start - worker_start,
                s.duration
            )?;
        }
        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(())
    }

    /// Append one histogram dump record to `path`, if histogram capture is
    /// on. Returns whether a dump was written.
    pub fn append_histogram_dump(&mut self, path: &Path, thread_id: &str) -> io::Result<bool> {
        let Some(h) = self.histogram.as_mut() else {
            return Ok(false);
        };
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        h.dump(&mut f, thread_id, epoch_now())?;
        f.sync_all()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_records_nothing() {
        let mut r = RspTimes::new(false, false);
        r.op_start();
        r.op_end("create");
        assert!(r.is_empty());
    }

    #[test]
    fn test_start_end_produces_sample() {
        let mut r = RspTimes::new(true, false);
        r.op_start();
        r.op_end("create");
        assert_eq!(r.len(), 1);
        let s = r.samples()[0];
        assert_eq!(s.op, "create");
        assert!(s.duration >= 0.0);
    }

    #[test]
    fn test_end_without_start_is_ignored() {
        let mut r = RspTimes::new(true, false);
        r.op_end("create");
        assert!(r.is_empty());
    }

    #[test]
    fn test_csv_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rsptimes.csv");
        let mut r = RspTimes::new(true, false);
        r.record("create", 100.5, 0.001234);
        r.record("create", 101.0, 0.25);
        r.save_csv(&path, 100.0).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "  create,  0.500000,  0.001234");
        assert_eq!(lines[1], "  create,  1.000000,  0.250000");
    }

    #[test]
    fn test_histogram_dump_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("histo.log");
        let mut r = RspTimes::new(true, true);
        r.record("read", 1.0, 0.002);
        assert!(r.append_histogram_dump(&path, "00").unwrap());
        r.record("read", 2.0, 0.004);
        assert!(r.append_histogram_dump(&path, "00").unwrap());

        let f = std::io::BufReader::new(File::open(&path).unwrap());
        let dumps = LatencyHistogram::load_all(f).unwrap();
        assert_eq!(dumps.len(), 2);
        assert_eq!(dumps[0].histogram.total_samples(), 1);
        assert_eq!(dumps[1].histogram.total_samples(), 1);
    }

    #[test]
    fn test_no_histogram_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("histo.log");
        let mut r = RspTimes::new(true, false);
        r.record("read", 1.0, 0.002);
        assert!(!r.append_histogram_dump(&path, "00").unwrap());
        assert!(!path.exists());
    }
}
