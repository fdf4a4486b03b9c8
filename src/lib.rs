//! Micro-benchmark harness for commands and functions running inside a tick-driven command server.
//!
//! mch measures three kinds of work: parsing a command, executing a pre-parsed command, and calling a scripted
//! function once per server tick. Each benchmark runs in several fresh server processes (forks); inside every
//! process the [iteration engine][engine] times fixed wall-clock windows, discards the warmup windows and sends the
//! measurement scores back over a local socket. The orchestrator folds the scores of all forks into a mean and a
//! 99.9% confidence interval.
//!
//! Function benchmarks are grouped by the add-on that provides them. Between groups the orchestrator rewrites the
//! level's enabled and disabled add-on lists in `level.dat`, a gzip-compressed [tagged tree][nbt], so that exactly
//! one benchmark add-on is loaded at a time.
//!
//! # Usage
//!
//! ## As an executable
//! Refer to the output of the `--help` flag for information on how to use the mch binary:
//! ```console
//! $ cargo install mch
//! $ mch --help
//! ```
//!
//! Settings come from `mch-config.json` in the working directory, overridden by flags. The server executable
//! (`mch-server` by default) must be on `PATH` or given with `--server`.
//!
//! ## As a library
//! ```no_run
//! use std::path::Path;
//!
//! use mch::{config::Config, execute_all, report::{HostInfo, Metadata, Report}};
//!
//! let config = Config {
//!     execute_benchmarks: vec!["scoreboard players add n x 1".to_string()],
//!     ..Config::default()
//! };
//! let started_at = chrono::Utc::now();
//! let results = execute_all(&config, Path::new(".")).expect("could not run benchmarks");
//! let report = Report::new(Metadata::new(&config, started_at, HostInfo::collect()), &results);
//! println!("{}", report.to_markdown());
//! ```
//!
//! # Writing function benchmarks
//! Put an add-on under `<level>/datapacks/<dir>/` whose `pack.mcmeta` contains `{"pack": {"mch": true}}`. Every
//! function in it whose first line is `# @benchmark` is a benchmark. The `#mch:setup` and `#mch:teardown` function
//! tags run around the group, `#mch:setup.iteration` and `#mch:teardown.iteration` around every window.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod benchmarks;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod level;
pub mod message;
pub mod nbt;
pub mod properties;
pub mod report;
pub mod resource;
pub mod runs;
pub mod server;
pub mod stats;

pub use config::Config;
pub use descriptor::{Mode, RunDescriptor};
pub use engine::IterationEngine;
pub use runs::{execute_all, validate_all, RunResult};
