//! Turning run results into reports.
//!
//! Scores arrive in nanoseconds per operation. Each [`Entry`] carries the mean and the margin of error in the
//! configured display unit, or neither when fewer than two scores were collected.

use std::{
    fmt::{self, Display, Formatter, Write as _},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{CpuExt, System, SystemExt};
use thiserror::Error;

use crate::{
    config::Config,
    descriptor::Mode,
    runs::{ForkFailure, RunResult},
    stats::{self, StatsError, TimeUnit},
};

/// A report file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Pretty JSON with run metadata.
    Json,
    /// A Markdown table.
    Md,
}

impl Format {
    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Md => "md",
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Unknown report format.
#[derive(Debug, Error)]
#[error("invalid report format: '{0}' (expected json or md)")]
pub struct UnknownFormat(pub String);

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "md" => Ok(Format::Md),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// The machine the batch ran on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Operating system name.
    pub os: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// Kernel version.
    pub kernel_version: Option<String>,
    /// Brand of the first CPU.
    pub cpu: Option<String>,
    /// Number of logical CPUs.
    pub cpus: usize,
    /// Total memory in bytes.
    pub memory: u64,
}

impl HostInfo {
    /// Reads the host's details.
    #[must_use]
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            os: system.name(),
            os_version: system.os_version(),
            kernel_version: system.kernel_version(),
            cpu: system.cpus().first().map(|cpu| cpu.brand().trim().to_string()),
            cpus: system.cpus().len(),
            memory: system.total_memory(),
        }
    }
}

/// How the batch was run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Version of the harness.
    pub mch_version: String,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished.
    pub finished_at: DateTime<Utc>,
    /// Server processes per benchmark.
    pub forks: u32,
    /// Server executable.
    pub server: PathBuf,
    /// Extra arguments passed to the server.
    pub server_args: Vec<String>,
    /// Warmup windows per fork.
    pub warmup_iterations: u32,
    /// Measurement windows per fork.
    pub measurement_iterations: u32,
    /// Window length in seconds.
    pub time: u32,
    /// Unit scores are reported in.
    pub time_unit: TimeUnit,
    /// Machine the batch ran on.
    pub host: HostInfo,
}

impl Metadata {
    /// Metadata for a batch run with `config`.
    #[must_use]
    pub fn new(config: &Config, started_at: DateTime<Utc>, host: HostInfo) -> Self {
        Self {
            mch_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            forks: config.forks,
            server: config.server.clone(),
            server_args: config.server_args.clone(),
            warmup_iterations: config.warmup_iterations,
            measurement_iterations: config.measurement_iterations,
            time: config.time,
            time_unit: config.time_unit,
            host,
        }
    }
}

/// One benchmark's row in the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Add-on group, for function benchmarks.
    pub group: Option<String>,
    /// Command text or function id.
    pub benchmark: String,
    /// How the benchmark was measured.
    pub mode: Mode,
    /// Planned sample count, measurement iterations times forks.
    pub count: u64,
    /// Scores actually collected. Lower than `count` when a fork failed.
    pub samples: usize,
    /// Mean time per operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Half-width of the 99.9% confidence interval around the score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
    /// Display unit, like `ns/op`.
    pub unit: String,
    /// Forks that produced no scores.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ForkFailure>,
}

impl Entry {
    /// Reduces a result's scores, converting them to the batch's time unit.
    #[must_use]
    pub fn new(result: &RunResult, metadata: &Metadata) -> Self {
        let unit = metadata.time_unit;
        let statistics = stats::mean(&result.scores)
            .and_then(|mean| Ok((mean, stats::margin_of_error(&result.scores)?)));
        let (score, error) = match statistics {
            Ok((mean, error)) => (
                Some(stats::convert(mean, TimeUnit::Nanoseconds, unit)),
                Some(stats::convert(error, TimeUnit::Nanoseconds, unit)),
            ),
            Err(StatsError::InsufficientSamples { actual, .. }) => {
                log::warn!(
                    "[{}/{}] only {actual} scores, omitting score and error",
                    result.mode,
                    result.benchmark
                );
                (None, None)
            }
            Err(err) => {
                log::warn!("[{}/{}] {err}, omitting score and error", result.mode, result.benchmark);
                (None, None)
            }
        };
        Self {
            group: result.group.clone(),
            benchmark: result.benchmark.clone(),
            mode: result.mode,
            count: u64::from(metadata.measurement_iterations) * u64::from(metadata.forks),
            samples: result.scores.len(),
            score,
            error,
            unit: format!("{}/op", unit.abbreviation()),
            failures: result.failures.clone(),
        }
    }
}

/// A whole batch's report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// How and where the batch ran.
    pub metadata: Metadata,
    /// One entry per benchmark, in run order.
    pub entries: Vec<Entry>,
}

impl Report {
    /// Builds the report for `results`.
    #[must_use]
    pub fn new(metadata: Metadata, results: &[RunResult]) -> Self {
        let entries = results
            .iter()
            .map(|result| Entry::new(result, &metadata))
            .collect();
        Self { metadata, entries }
    }

    /// Pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// A Markdown table with one row per entry.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::from(
            "| Group | Benchmark | Mode | Count | Score | Error | Unit |\n\
             | ----- | --------- | ---- | ----- | ----- | ----- | ---- |\n",
        );
        let number = |value: Option<f64>| value.map_or_else(String::new, |value| format!("{value:.3}"));
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                entry.group.as_deref().unwrap_or_default(),
                entry.benchmark.replace('|', "\\|"),
                entry.mode,
                entry.count,
                number(entry.score),
                number(entry.error),
                entry.unit,
            );
        }
        out
    }

    /// Writes one file per format next to `output`, e.g. `mch-results.json`, returning the paths written.
    ///
    /// # Errors
    ///
    /// Fails if a directory or file cannot be written.
    pub fn write(&self, output: &Path, formats: &[Format]) -> anyhow::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for format in formats {
            let mut path = output.as_os_str().to_owned();
            path.push(".");
            path.push(format.extension());
            let path = PathBuf::from(path);

            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).context("could not create output directory structure")?;
            }
            let contents = match format {
                Format::Json => self.to_json()?,
                Format::Md => self.to_markdown(),
            };
            log::info!("writing {format} report to {}...", path.display());
            fs::write(&path, contents)
                .with_context(|| format!("could not write to output file {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}
