//! Orchestrator configuration.
//!
//! Settings are layered: built-in defaults, then [`CONFIG_FILE`] in the working directory if it exists, then
//! command-line flags. Everything is checked by [`Config::validate`] before any server process is spawned.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mch::config::{Config, CONFIG_FILE};
//!
//! let config = Config::load(Path::new(CONFIG_FILE)).unwrap();
//! config.validate(Path::new(".")).unwrap();
//! ```

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{report::Format, stats::TimeUnit};

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "mch-config.json";

/// Errors produced while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("could not read {path}: {source}")]
    Read {
        /// The file.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
    /// A config file is not valid JSON or has unknown fields.
    #[error("could not parse {path}: {source}")]
    Parse {
        /// The file.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// A setting is out of range.
    #[error("{field} {requirement}")]
    Invalid {
        /// Name of the setting.
        field: &'static str,
        /// What the setting must satisfy.
        requirement: &'static str,
    },
    /// The server executable could not be found.
    #[error("server executable '{0}' was not found")]
    MissingServer(PathBuf),
}

/// Everything a benchmark batch needs to know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Start function benchmarks without waiting for the operator.
    pub auto_start: bool,
    /// Warmup windows per fork.
    pub warmup_iterations: u32,
    /// Measurement windows per fork.
    pub measurement_iterations: u32,
    /// Window length in seconds.
    pub time: u32,
    /// Server processes per benchmark.
    pub forks: u32,
    /// Unit scores are reported in.
    pub time_unit: TimeUnit,
    /// Server executable, looked up on `PATH` when it is a bare name.
    pub server: PathBuf,
    /// Extra arguments for the server executable.
    pub server_args: Vec<String>,
    /// Report path, without extension.
    pub output: PathBuf,
    /// Report files to write.
    pub formats: Vec<Format>,
    /// Commands to measure parsing of.
    pub parsing_benchmarks: Vec<String>,
    /// Commands to measure execution of.
    pub execute_benchmarks: Vec<String>,
    /// Add-on groups, like `file/my_pack`, whose benchmark functions are measured.
    pub function_benchmarks: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_start: true,
            warmup_iterations: 5,
            measurement_iterations: 5,
            time: 10,
            forks: 5,
            time_unit: TimeUnit::Seconds,
            server: PathBuf::from("mch-server"),
            server_args: Vec::new(),
            output: PathBuf::from("mch-results"),
            formats: Vec::new(),
            parsing_benchmarks: Vec::new(),
            execute_benchmarks: Vec::new(),
            function_benchmarks: Vec::new(),
        }
    }
}

impl Config {
    /// Reads `path`, falling back to the defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        log::debug!("reading {}...", path.display());
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the settings and that the server executable exists, resolving relative paths against `directory`.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self, directory: &Path) -> Result<(), ConfigError> {
        if self.measurement_iterations < 2 {
            return Err(ConfigError::Invalid {
                field: "measurement_iterations",
                requirement: "must be at least 2",
            });
        }
        if self.time < 1 {
            return Err(ConfigError::Invalid {
                field: "time",
                requirement: "must be at least 1 second",
            });
        }
        if self.forks < 1 {
            return Err(ConfigError::Invalid {
                field: "forks",
                requirement: "must be at least 1",
            });
        }
        if self
            .warmup_iterations
            .checked_add(self.measurement_iterations)
            .is_none()
        {
            return Err(ConfigError::Invalid {
                field: "warmup_iterations",
                requirement: "plus measurement_iterations must fit in 32 bits",
            });
        }
        self.locate_server(directory)?;
        Ok(())
    }

    /// Resolves [`Config::server`] to an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingServer`] if nothing is found.
    pub fn locate_server(&self, directory: &Path) -> Result<PathBuf, ConfigError> {
        let is_bare_name = self.server.components().count() == 1 && !self.server.is_absolute();
        let candidates: Vec<PathBuf> = if is_bare_name {
            env::var_os("PATH")
                .map(|paths| env::split_paths(&paths).map(|dir| dir.join(&self.server)).collect())
                .unwrap_or_default()
        } else {
            vec![directory.join(&self.server)]
        };
        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::MissingServer(self.server.clone()))
    }

    /// Whether no benchmark of any mode is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parsing_benchmarks.is_empty()
            && self.execute_benchmarks.is_empty()
            && self.function_benchmarks.is_empty()
    }
}
