//! What a freshly spawned server process is supposed to do.
//!
//! The orchestrator builds one [`RunDescriptor`] per child process and passes it in the [`ENV_VAR`] environment
//! variable as a single comma-separated line. The child parses it exactly once at startup; a descriptor that does not
//! parse is fatal before any socket is opened.
//!
//! ```text
//! dry
//! setup,<dry>
//! iteration,<auto_start>,<last_iteration_in_group>,<warmup>,<measurement>,<window_seconds>,<forks>,<fork>,<port>,<progress_percent>,<mode>,<benchmark>
//! ```
//!
//! The benchmark is always the last field and is taken verbatim, commas included, since commands routinely contain
//! them.
//!
//! # Examples
//!
//! ```
//! use mch::descriptor::{Mode, RunDescriptor};
//!
//! let descriptor: RunDescriptor = "iteration,true,false,0,5,1,1,0,4000,0,execute,say a,b".parse().unwrap();
//! let RunDescriptor::Iteration(iteration) = &descriptor else { unreachable!() };
//! assert_eq!(iteration.mode, Mode::Execute);
//! assert_eq!(iteration.benchmark, "say a,b");
//! assert_eq!(descriptor.to_string().parse::<RunDescriptor>().unwrap(), descriptor);
//! ```

use std::{
    env,
    fmt::{self, Display, Formatter},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable the descriptor is passed in.
pub const ENV_VAR: &str = "MCH_DESCRIPTOR";

/// Number of comma-separated fields in an `iteration` descriptor, tag included.
const ITERATION_FIELDS: usize = 12;

/// Errors produced while parsing a run descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The descriptor string is empty.
    #[error("empty run descriptor")]
    Empty,
    /// The leading tag is not `dry`, `setup` or `iteration`.
    #[error("unknown run descriptor tag '{0}'")]
    UnknownTag(String),
    /// Too few or too many fields for the tag.
    #[error("'{tag}' run descriptor needs {expected} fields, got {actual}")]
    FieldCount {
        /// Descriptor tag.
        tag: &'static str,
        /// Required number of fields, tag included.
        expected: usize,
        /// Number of fields found.
        actual: usize,
    },
    /// A field that does not parse as its type.
    #[error("invalid {field} '{value}' in run descriptor")]
    InvalidField {
        /// Name of the field.
        field: &'static str,
        /// Raw field text.
        value: String,
    },
    /// Fields that parse but describe an impossible run.
    #[error("invalid run descriptor: {0}")]
    Invariant(&'static str),
    /// The environment variable is not valid unicode.
    #[error("MCH_DESCRIPTOR is not valid unicode")]
    NotUnicode,
}

/// What is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Parsing a command without running it.
    Parsing,
    /// Running a pre-parsed command.
    Execute,
    /// Running a scripted function, one call per tick.
    Function,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Parsing => "parsing",
            Mode::Execute => "execute",
            Mode::Function => "function",
        })
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsing" => Ok(Mode::Parsing),
            "execute" => Ok(Mode::Execute),
            "function" => Ok(Mode::Function),
            _ => Err(ParseError::InvalidField {
                field: "mode",
                value: s.to_string(),
            }),
        }
    }
}

/// One measured run of one benchmark in one process.
#[derive(Clone, Debug, PartialEq)]
pub struct Iteration {
    /// Start measuring as soon as the world loads. When false, a function-mode run waits for the operator.
    pub auto_start: bool,
    /// Whether this is the final run in its add-on group, in which case the group teardown runs before posting.
    pub last_iteration_in_group: bool,
    /// Warmup windows per fork.
    pub warmup_iterations: u32,
    /// Measurement windows per fork.
    pub measurement_iterations: u32,
    /// Length of one window.
    pub window_seconds: u32,
    /// Total number of forks of this benchmark.
    pub forks: u32,
    /// Zero-based index of this fork.
    pub fork: u32,
    /// Local port the orchestrator listens for the result on.
    pub port: u16,
    /// Share of the whole batch finished before this run, for display only.
    pub progress_percent: f64,
    /// What is measured.
    pub mode: Mode,
    /// Command text (parsing, execute) or function id (function).
    pub benchmark: String,
}

impl Iteration {
    /// Length of one window.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.window_seconds))
    }

    /// Total number of windows, warmup and measurement.
    #[must_use]
    pub fn total_iterations(&self) -> u32 {
        self.warmup_iterations + self.measurement_iterations
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.measurement_iterations < 2 {
            return Err(ParseError::Invariant("measurement iterations must be at least 2"));
        }
        if self.window_seconds < 1 {
            return Err(ParseError::Invariant("window must be at least 1 second"));
        }
        if self.forks < 1 {
            return Err(ParseError::Invariant("forks must be at least 1"));
        }
        if self.fork >= self.forks {
            return Err(ParseError::Invariant("fork index must be below fork count"));
        }
        if self.warmup_iterations.checked_add(self.measurement_iterations).is_none() {
            return Err(ParseError::Invariant("too many iterations"));
        }
        if !(0.0..=100.0).contains(&self.progress_percent) {
            return Err(ParseError::Invariant("progress must be between 0 and 100"));
        }
        Ok(())
    }
}

/// What a server process should do once it has loaded.
#[derive(Clone, Debug, PartialEq)]
pub enum RunDescriptor {
    /// Load once to force first-load side effects, then stop. No timing, no result.
    Dry,
    /// Run the group setup hooks so the server picks up a changed add-on selection. With `dry`, also run the group
    /// teardown afterwards. No timing, no result.
    Setup {
        /// Also run the group teardown.
        dry: bool,
    },
    /// Measure a benchmark and report the scores.
    Iteration(Iteration),
}

impl RunDescriptor {
    /// Reads and parses [`ENV_VAR`].
    ///
    /// Returns `Ok(None)` when the variable is not set, i.e. the server was started by hand.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the variable is set but does not parse.
    pub fn from_env() -> Result<Option<Self>, ParseError> {
        match env::var(ENV_VAR) {
            Ok(value) => value.parse().map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(ParseError::NotUnicode),
        }
    }

    /// The measured run, if this is one.
    #[must_use]
    pub fn iteration(&self) -> Option<&Iteration> {
        match self {
            RunDescriptor::Iteration(iteration) => Some(iteration),
            _ => None,
        }
    }
}

impl Display for RunDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RunDescriptor::Dry => f.write_str("dry"),
            RunDescriptor::Setup { dry } => write!(f, "setup,{dry}"),
            RunDescriptor::Iteration(i) => write!(
                f,
                "iteration,{},{},{},{},{},{},{},{},{},{},{}",
                i.auto_start,
                i.last_iteration_in_group,
                i.warmup_iterations,
                i.measurement_iterations,
                i.window_seconds,
                i.forks,
                i.fork,
                i.port,
                i.progress_percent,
                i.mode,
                i.benchmark,
            ),
        }
    }
}

fn field<T: FromStr>(name: &'static str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidField {
        field: name,
        value: value.to_string(),
    })
}

impl FromStr for RunDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let tag = s.split(',').next().unwrap_or_default();
        match tag {
            "dry" => {
                let actual = s.split(',').count();
                if actual != 1 {
                    return Err(ParseError::FieldCount {
                        tag: "dry",
                        expected: 1,
                        actual,
                    });
                }
                Ok(RunDescriptor::Dry)
            }
            "setup" => {
                let fields: Vec<&str> = s.split(',').collect();
                if fields.len() != 2 {
                    return Err(ParseError::FieldCount {
                        tag: "setup",
                        expected: 2,
                        actual: fields.len(),
                    });
                }
                Ok(RunDescriptor::Setup {
                    dry: field("dry", fields[1])?,
                })
            }
            "iteration" => {
                let fields: Vec<&str> = s.splitn(ITERATION_FIELDS, ',').collect();
                if fields.len() != ITERATION_FIELDS {
                    return Err(ParseError::FieldCount {
                        tag: "iteration",
                        expected: ITERATION_FIELDS,
                        actual: fields.len(),
                    });
                }
                let progress_percent: f64 = field("progress", fields[9])?;
                let iteration = Iteration {
                    auto_start: field("auto start flag", fields[1])?,
                    last_iteration_in_group: field("last iteration flag", fields[2])?,
                    warmup_iterations: field("warmup iterations", fields[3])?,
                    measurement_iterations: field("measurement iterations", fields[4])?,
                    window_seconds: field("window seconds", fields[5])?,
                    forks: field("forks", fields[6])?,
                    fork: field("fork", fields[7])?,
                    port: field("port", fields[8])?,
                    progress_percent,
                    mode: fields[10].parse()?,
                    benchmark: fields[11].to_string(),
                };
                iteration.validate()?;
                Ok(RunDescriptor::Iteration(iteration))
            }
            _ => Err(ParseError::UnknownTag(tag.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iteration() -> Iteration {
        Iteration {
            auto_start: false,
            last_iteration_in_group: true,
            warmup_iterations: 3,
            measurement_iterations: 4,
            window_seconds: 2,
            forks: 5,
            fork: 4,
            port: 51_234,
            progress_percent: 100.0 / 3.0,
            mode: Mode::Function,
            benchmark: "bench:a/b".to_string(),
        }
    }

    #[test]
    fn iteration_survives_display_and_parse() {
        let descriptor = RunDescriptor::Iteration(iteration());
        let line = descriptor.to_string();
        assert!(line.starts_with("iteration,false,true,3,4,2,5,4,51234,33.33"));
        assert_eq!(line.parse::<RunDescriptor>().unwrap(), descriptor);
    }

    #[test]
    fn dry_and_setup_parse() {
        assert_eq!("dry".parse::<RunDescriptor>().unwrap(), RunDescriptor::Dry);
        assert_eq!(
            "setup,true".parse::<RunDescriptor>().unwrap(),
            RunDescriptor::Setup { dry: true }
        );
        assert_eq!(RunDescriptor::Setup { dry: false }.to_string(), "setup,false");
    }

    #[test]
    fn benchmark_keeps_its_commas() {
        let descriptor: RunDescriptor =
            "iteration,true,false,0,2,1,1,0,1,0,parsing,scoreboard players set a,b obj 1"
                .parse()
                .unwrap();
        assert_eq!(
            descriptor.iteration().unwrap().benchmark,
            "scoreboard players set a,b obj 1"
        );
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(
            "iteration,true,false,0,2,1,1,0,1".parse::<RunDescriptor>(),
            Err(ParseError::FieldCount {
                tag: "iteration",
                expected: ITERATION_FIELDS,
                actual: 9
            })
        );
        assert!(matches!(
            "dry,extra".parse::<RunDescriptor>(),
            Err(ParseError::FieldCount { tag: "dry", .. })
        ));
    }

    #[test]
    fn non_numeric_field_is_rejected() {
        assert_eq!(
            "iteration,true,false,x,2,1,1,0,1,0,parsing,say hi".parse::<RunDescriptor>(),
            Err(ParseError::InvalidField {
                field: "warmup iterations",
                value: "x".to_string()
            })
        );
        assert!(matches!(
            "iteration,true,false,0,2,1,1,0,1,0,compile,say hi".parse::<RunDescriptor>(),
            Err(ParseError::InvalidField { field: "mode", .. })
        ));
    }

    #[test]
    fn impossible_runs_are_rejected() {
        for line in [
            "iteration,true,false,0,1,1,1,0,1,0,parsing,say hi",
            "iteration,true,false,0,2,0,1,0,1,0,parsing,say hi",
            "iteration,true,false,0,2,1,0,0,1,0,parsing,say hi",
            "iteration,true,false,0,2,1,2,2,1,0,parsing,say hi",
            "iteration,true,false,0,2,1,1,0,1,NaN,parsing,say hi",
        ] {
            assert!(
                matches!(line.parse::<RunDescriptor>(), Err(ParseError::Invariant(_))),
                "{line}"
            );
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            "measure,1".parse::<RunDescriptor>(),
            Err(ParseError::UnknownTag("measure".to_string()))
        );
        assert_eq!("".parse::<RunDescriptor>(), Err(ParseError::Empty));
    }
}
