//! YAML parameter file
//!
//! An optional input file may supply the same parameters by name; keys are
//! the CLI option names without the leading `--`. Values from the file
//! override whatever the command line established. A YAML file cannot pull
//! in another YAML file.

use anyhow::{anyhow, bail, Context, Result};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

use crate::config::cli::parse_bool;
use crate::config::{Operation, SizeDistribution, TestParams};

/// Overlay the parameters named in `path` onto `params`.
pub fn parse_yaml(params: &mut TestParams, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading YAML input {}", path.display()))?;
    let doc: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("YAML parse error in {}", path.display()))?;
    if doc.is_null() {
        return Ok(());
    }
    let mapping = doc
        .as_mapping()
        .ok_or_else(|| anyhow!("YAML input must be a mapping of parameter names"))?;

    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| anyhow!("YAML parameter names must be strings"))?;
        apply_key(params, key, value)
            .with_context(|| format!("YAML parameter {:?}", key))?;
    }
    Ok(())
}

fn apply_key(params: &mut TestParams, key: &str, value: &Value) -> Result<()> {
    let w = &mut params.workload;
    match key {
        "yaml-input-file" => bail!("cannot specify a YAML input file from within itself"),
        "operation" => w.operation = str_value(value)?.parse::<Operation>().map_err(anyhow::Error::msg)?,
        "top" => {
            w.top_dirs = str_value(value)?
                .split(',')
                .map(|p| PathBuf::from(p.trim()))
                .collect()
        }
        "host-set" => {
            params.host_set = str_value(value)?
                .split([',', ' '])
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect()
        }
        "files" => w.iterations = positive(value)? as usize,
        "threads" => params.thread_count = positive(value)? as usize,
        "files-per-dir" => w.files_per_dir = positive(value)? as usize,
        "dirs-per-dir" => w.dirs_per_dir = positive(value)? as usize,
        "record-size" => w.record_size_kb = non_negative(value)?,
        "file-size" => w.total_size_kb = non_negative(value)?,
        "file-size-distribution" => {
            w.size_distribution = str_value(value)?
                .parse::<SizeDistribution>()
                .map_err(anyhow::Error::msg)?
        }
        "xattr-size" => w.xattr_size = non_negative(value)? as usize,
        "xattr-count" => w.xattr_count = non_negative(value)? as usize,
        "prefix" => w.prefix = str_value(value)?,
        "suffix" => w.suffix = str_value(value)?,
        "hash-into-dirs" => w.hash_to_dir = bool_value(value)?,
        "pause" => w.pause_between_files_us = non_negative(value)?,
        "stonewall" => w.stonewall = bool_value(value)?,
        "finish" => w.finish_all_requests = bool_value(value)?,
        "fsync" => w.fsync = bool_value(value)?,
        "record-ctime-size" => w.record_ctime_size = bool_value(value)?,
        "verify-read" => w.verify_read = bool_value(value)?,
        "incompressible" => w.incompressible = bool_value(value)?,
        "response-times" => w.measure_response_times = bool_value(value)?,
        "response-time-histogram" => w.response_time_histogram = bool_value(value)?,
        "same-dir" => w.is_shared_dir = bool_value(value)?,
        "dirs-on-demand" => w.dirs_on_demand = bool_value(value)?,
        "network-sync-dir" => {
            w.network_dir_override = Some(PathBuf::from(str_value(value)?))
        }
        "permute-host-dirs" => params.permute_host_dirs = bool_value(value)?,
        "launch-by-daemon" => params.launch_by_daemon = bool_value(value)?,
        "remote-pgm-dir" => params.remote_program_dir = PathBuf::from(str_value(value)?),
        "min-dirs-per-sec" => params.min_directories_per_sec = positive(value)?,
        "output-json" => params.output_json = Some(PathBuf::from(str_value(value)?)),
        other => bail!("unrecognized input parameter name: {}", other),
    }
    Ok(())
}

fn str_value(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => bail!("expected a string value"),
    }
}

fn bool_value(v: &Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => parse_bool(s).map_err(anyhow::Error::msg),
        _ => bail!("expected a boolean value"),
    }
}

fn non_negative(v: &Value) -> Result<u64> {
    v.as_u64().ok_or_else(|| anyhow!("expected a non-negative integer"))
}

fn positive(v: &Value) -> Result<u64> {
    let n = non_negative(v).map_err(|_| anyhow!("value must be greater than zero"))?;
    if n == 0 {
        bail!("value must be greater than zero");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(text: &str) -> Result<TestParams> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        let mut params = TestParams::default();
        parse_yaml(&mut params, file.path())?;
        Ok(params)
    }

    #[test]
    fn test_parse_operation() {
        let params = parse("operation: create\n").unwrap();
        assert_eq!(params.workload.operation, Operation::Create);
    }

    #[test]
    fn test_parse_negative_files_rejected() {
        let err = parse("files: -3\n").unwrap_err();
        assert!(format!("{:#}", err).contains("greater than zero"));
    }

    #[test]
    fn test_parse_host_set() {
        let params = parse("host-set: host-foo,host-bar\n").unwrap();
        assert_eq!(params.host_set, vec!["host-foo", "host-bar"]);
    }

    #[test]
    fn test_parse_exponential_distribution() {
        let params = parse("file-size-distribution: exponential\n").unwrap();
        assert_eq!(
            params.workload.size_distribution,
            SizeDistribution::Exponential
        );
    }

    #[test]
    fn test_parse_top_dir_list() {
        let params = parse("top: /mnt/foo,/mnt/bar\n").unwrap();
        assert_eq!(
            params.workload.top_dirs,
            vec![PathBuf::from("/mnt/foo"), PathBuf::from("/mnt/bar")]
        );
    }

    #[test]
    fn test_parse_booleans_both_forms() {
        let params = parse("fsync: true\nstonewall: N\n").unwrap();
        assert!(params.workload.fsync);
        assert!(!params.workload.stonewall);
    }

    #[test]
    fn test_rejects_nested_yaml_file() {
        let err = parse("yaml-input-file: other.yaml\n").unwrap_err();
        assert!(format!("{:#}", err).contains("within itself"));
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = parse("frobnication-level: 9\n").unwrap_err();
        assert!(format!("{:#}", err).contains("unrecognized"));
    }

    #[test]
    fn test_empty_file_is_noop() {
        let params = parse("").unwrap();
        assert_eq!(params.workload.iterations, 200);
    }

    #[test]
    fn test_yaml_overrides_prior_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"files: 42\n").unwrap();
        let mut params = TestParams::default();
        params.workload.iterations = 7; // as if set on the command line
        parse_yaml(&mut params, file.path()).unwrap();
        assert_eq!(params.workload.iterations, 42);
    }
}
