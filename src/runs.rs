//! Orchestration for running benchmarks in server processes.
//!
//! Every fork of every benchmark gets its own server process. Before spawning it, a listener is bound on an
//! ephemeral local port and an acceptor thread is started on it; the port goes into the child's
//! [`RunDescriptor`]. Once the child exits, the acceptor is joined, which is what guarantees its one message was
//! read in full. Forks never overlap, so results need no locking: each acceptor hands its message back through
//! its join handle.
//!
//! The primary function is [`execute_all`], which runs a whole batch and returns one [`RunResult`] per benchmark.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mch::{config::Config, execute_all};
//!
//! let config = Config::default();
//! let results = execute_all(&config, Path::new(".")).expect("could not run benchmarks");
//! ```

use std::{
    collections::BTreeSet,
    fmt::{self, Display, Formatter},
    io,
    net::{Ipv4Addr, TcpListener, TcpStream},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    benchmarks::{self, AddOn, DATAPACKS_DIR},
    config::Config,
    descriptor::{Iteration, Mode, RunDescriptor, ENV_VAR},
    level::{self, LevelStorage},
    message::{self, Message, ReceiveError},
    properties::ServerProperties,
};

/// Function measured first whenever function groups run, to show the harness' own per-call cost.
pub const BASELINE_BENCHMARK: &str = "mch:baseline";

/// A running server process.
pub trait Process {
    /// Blocks until the process exits, returning its exit code if it had one.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be waited on.
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

impl Process for Child {
    fn wait(&mut self) -> io::Result<Option<i32>> {
        Child::wait(self).map(|status| status.code())
    }
}

/// Starts server processes.
pub trait Launcher {
    /// Starts one server process for `descriptor`.
    ///
    /// # Errors
    ///
    /// Fails if the process cannot be started.
    fn launch(&mut self, descriptor: &RunDescriptor) -> io::Result<Box<dyn Process>>;
}

/// Launches the configured server executable, passing the descriptor through [`ENV_VAR`].
#[derive(Clone, Debug)]
pub struct ServerLauncher {
    program: PathBuf,
    args: Vec<String>,
    directory: PathBuf,
}

impl ServerLauncher {
    /// A launcher that runs `program` with `args` in `directory`.
    #[must_use]
    pub fn new(program: PathBuf, args: Vec<String>, directory: PathBuf) -> Self {
        Self {
            program,
            args,
            directory,
        }
    }
}

impl Launcher for ServerLauncher {
    fn launch(&mut self, descriptor: &RunDescriptor) -> io::Result<Box<dyn Process>> {
        // The operator starts manual runs from the server console.
        let interactive = descriptor
            .iteration()
            .is_some_and(|iteration| iteration.mode == Mode::Function && !iteration.auto_start);
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.directory)
            .env(ENV_VAR, descriptor.to_string())
            .stdin(if interactive {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(Box::new(child))
    }
}

/// Why a fork produced no scores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server process could not be started.
    Launch(String),
    /// The process exited without sending anything, e.g. because its descriptor did not parse.
    NoResult {
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
    },
    /// Something was sent but could not be read.
    Receive(String),
    /// The function did not get through one call within the server's command chain budget.
    BudgetExceeded,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Launch(err) => write!(f, "could not launch server: {err}"),
            FailureKind::NoResult {
                exit_code: Some(code),
            } => write!(f, "server exited with status {code} without a result"),
            FailureKind::NoResult { exit_code: None } => {
                f.write_str("server was terminated without a result")
            }
            FailureKind::Receive(err) => f.write_str(err),
            FailureKind::BudgetExceeded => f.write_str("maxCommandChainLength exceeded"),
        }
    }
}

/// A fork that produced no scores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkFailure {
    /// Zero-based fork index.
    pub fork: u32,
    /// Why it failed.
    pub kind: FailureKind,
}

/// Everything collected for one benchmark across its forks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Add-on group, for function benchmarks.
    pub group: Option<String>,
    /// Command text or function id.
    pub benchmark: String,
    /// How the benchmark was measured.
    pub mode: Mode,
    /// Measurement scores of every fork, in nanoseconds per operation, in fork order.
    pub scores: Vec<f64>,
    /// Forks that produced no scores.
    pub failures: Vec<ForkFailure>,
}

/// Benchmarks that run together, with the same add-on selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    /// The add-on enabled while the group runs; `None` runs with every benchmark add-on disabled.
    pub name: Option<String>,
    /// How the group's benchmarks are measured.
    pub mode: Mode,
    /// Command texts or function ids, in run order.
    pub benchmarks: Vec<String>,
}

/// The ordered list of groups a batch runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    /// Groups in run order.
    pub groups: Vec<Group>,
}

impl Plan {
    /// Orders the configured benchmarks: parsing, execute, the baseline, then every function group.
    ///
    /// # Errors
    ///
    /// Fails if a group's functions cannot be listed. Configured groups that are not benchmark add-ons, or that
    /// contain no benchmarks, are logged and skipped.
    pub fn build(config: &Config, addons: &[AddOn]) -> anyhow::Result<Self> {
        let mut groups = Vec::new();
        for (mode, benchmarks) in [
            (Mode::Parsing, &config.parsing_benchmarks),
            (Mode::Execute, &config.execute_benchmarks),
        ] {
            if !benchmarks.is_empty() {
                groups.push(Group {
                    name: None,
                    mode,
                    benchmarks: benchmarks.clone(),
                });
            }
        }

        let mut function_groups = Vec::new();
        for name in &config.function_benchmarks {
            let Some(addon) = addons.iter().find(|addon| &addon.name == name) else {
                log::warn!("[{name}] add-on not found, skipping...");
                continue;
            };
            if !addon.is_benchmark() {
                log::warn!("[{name}] add-on is not marked as a benchmark group, skipping...");
                continue;
            }
            let benchmarks: Vec<String> = benchmarks::find_benchmarks(addon)?
                .iter()
                .map(ToString::to_string)
                .collect();
            if benchmarks.is_empty() {
                log::warn!("[{name}] add-on has no benchmarks, skipping...");
                continue;
            }
            function_groups.push(Group {
                name: Some(name.clone()),
                mode: Mode::Function,
                benchmarks,
            });
        }
        if !function_groups.is_empty() {
            groups.push(Group {
                name: None,
                mode: Mode::Function,
                benchmarks: vec![BASELINE_BENCHMARK.to_string()],
            });
            groups.extend(function_groups);
        }

        Ok(Self { groups })
    }

    /// Number of measured processes the plan spawns.
    #[must_use]
    pub fn total(&self, forks: u32) -> u64 {
        self.groups
            .iter()
            .map(|group| group.benchmarks.len() as u64 * u64::from(forks))
            .sum()
    }
}

/// Runs a descriptor that reports nothing, returning whether the process exited cleanly.
///
/// # Errors
///
/// Fails if the process cannot be started or waited on.
pub fn run_pass(launcher: &mut dyn Launcher, descriptor: &RunDescriptor) -> anyhow::Result<bool> {
    log::debug!("[{descriptor}] running pass...");
    let mut process = launcher
        .launch(descriptor)
        .with_context(|| format!("could not launch server for {descriptor}"))?;
    let exit_code = process.wait().context("could not wait for server")?;
    if exit_code != Some(0) {
        log::warn!("[{descriptor}] server exited with {exit_code:?}");
    }
    Ok(exit_code == Some(0))
}

fn wake(port: u16) {
    if let Err(err) = TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
        log::warn!("could not wake acceptor on port {port}: {err}");
    }
}

/// Runs one measured fork: binds a listener, starts the acceptor, launches the server with the descriptor built by
/// `descriptor`, waits for it to exit, then joins the acceptor.
///
/// # Errors
///
/// Returns why the fork produced no scores.
pub fn run_fork(
    launcher: &mut dyn Launcher,
    descriptor: impl FnOnce(u16) -> RunDescriptor,
) -> Result<Vec<f64>, FailureKind> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|err| FailureKind::Launch(format!("could not bind result listener: {err}")))?;
    let port = listener
        .local_addr()
        .map_err(|err| FailureKind::Launch(format!("could not get result port: {err}")))?
        .port();
    let descriptor = descriptor(port);

    let acceptor = thread::spawn(move || -> Result<Option<Message>, ReceiveError> {
        let (stream, _) = listener.accept()?;
        message::receive(stream)
    });

    let exit_code = match launcher.launch(&descriptor) {
        Ok(mut process) => process.wait(),
        Err(err) => {
            wake(port);
            let _ = acceptor.join();
            return Err(FailureKind::Launch(err.to_string()));
        }
    };
    // A child that exited without connecting leaves the acceptor blocked; an empty connection releases it.
    if !acceptor.is_finished() {
        wake(port);
    }
    let received = acceptor
        .join()
        .map_err(|_| FailureKind::Receive("result acceptor panicked".to_string()))?;

    match received {
        Ok(Some(Message::RunResult { scores })) => Ok(scores),
        Ok(Some(Message::BudgetExceeded)) => Err(FailureKind::BudgetExceeded),
        Ok(None) => Err(FailureKind::NoResult {
            exit_code: exit_code.ok().flatten(),
        }),
        Err(err) => Err(FailureKind::Receive(err.to_string())),
    }
}

/// Drives a batch against one server directory.
struct Coordinator<'a> {
    config: &'a Config,
    launcher: &'a mut dyn Launcher,
    level_path: PathBuf,
    benchmark_packs: BTreeSet<String>,
    done: u64,
    total: u64,
}

impl Coordinator<'_> {
    fn select(&self, active: Option<&str>) -> anyhow::Result<()> {
        if self.benchmark_packs.is_empty() {
            return Ok(());
        }
        let mut level = LevelStorage::load(&self.level_path)?;
        level.select_group(&self.benchmark_packs, active)?;
        level.save()?;
        log::debug!("enabled add-ons: {:?}", level.enabled());
        Ok(())
    }

    fn setup(&mut self, group: &Group, dry: bool) -> anyhow::Result<bool> {
        self.select(group.name.as_deref())?;
        let ok = run_pass(&mut *self.launcher, &RunDescriptor::Setup { dry })?;
        if !ok {
            log::warn!(
                "[{}] setup pass failed, continuing...",
                group.name.as_deref().unwrap_or("baseline")
            );
        }
        Ok(ok)
    }

    #[allow(clippy::cast_precision_loss)]
    fn run_benchmark(&mut self, group: &Group, benchmark: &str, last_in_group: bool) -> RunResult {
        let config = self.config;
        let forks = config.forks;
        let mut result = RunResult {
            group: group.name.clone(),
            benchmark: benchmark.to_string(),
            mode: group.mode,
            scores: Vec::new(),
            failures: Vec::new(),
        };

        for fork in 0..forks {
            let id = format!("{}/{benchmark}#{fork}", group.mode);
            let progress_percent = if self.total == 0 {
                0.0
            } else {
                self.done as f64 / self.total as f64 * 100.0
            };
            log::debug!("[{id}] running fork...");

            let iteration = |port| {
                RunDescriptor::Iteration(Iteration {
                    auto_start: config.auto_start,
                    // Only add-on groups have a teardown to run.
                    last_iteration_in_group: group.name.is_some() && last_in_group && fork + 1 == forks,
                    warmup_iterations: config.warmup_iterations,
                    measurement_iterations: config.measurement_iterations,
                    window_seconds: config.time,
                    forks,
                    fork,
                    port,
                    progress_percent,
                    mode: group.mode,
                    benchmark: benchmark.to_string(),
                })
            };
            match run_fork(&mut *self.launcher, iteration) {
                Ok(scores) => {
                    log::debug!("[{id}] fork finished with {} scores", scores.len());
                    log::trace!("[{id}] scores: {scores:?}");
                    result.scores.extend(scores);
                }
                Err(kind) => {
                    log::warn!("[{id}] {kind}, continuing...");
                    result.failures.push(ForkFailure { fork, kind });
                }
            }
            self.done += 1;
        }
        result
    }
}

fn prepare(
    config: &Config,
    directory: &Path,
    launcher: &mut dyn Launcher,
) -> anyhow::Result<(PathBuf, Vec<AddOn>)> {
    let properties = ServerProperties::load(directory).context("could not read server properties")?;
    let level_dir = properties.level_dir(directory);

    log::info!("running dry pass...");
    if !run_pass(launcher, &RunDescriptor::Dry)? {
        bail!("dry pass failed, check the server output above");
    }

    let datapacks = level_dir.join(DATAPACKS_DIR);
    let addons = if datapacks.is_dir() {
        benchmarks::find_all_addons(&datapacks)?
    } else {
        Vec::new()
    };
    if !config.function_benchmarks.is_empty() && addons.is_empty() {
        log::warn!("no add-ons found under {}", datapacks.display());
    }
    Ok((level_dir.join(level::FILE_NAME), addons))
}

/// Runs every configured benchmark with the given launcher.
///
/// # Errors
///
/// Fails if the dry pass fails, or if the level cannot be read or rewritten. Failures of single forks are recorded
/// in the results instead.
pub fn execute_with(
    config: &Config,
    directory: &Path,
    launcher: &mut dyn Launcher,
) -> anyhow::Result<Vec<RunResult>> {
    let (level_path, addons) = prepare(config, directory, launcher)?;
    let plan = Plan::build(config, &addons)?;
    let total = plan.total(config.forks);
    let mut coordinator = Coordinator {
        config,
        launcher,
        level_path,
        benchmark_packs: addons
            .iter()
            .filter(|addon| addon.is_benchmark())
            .map(|addon| addon.name.clone())
            .collect(),
        done: 0,
        total,
    };
    coordinator.select(None)?;

    log::info!(
        "running {} benchmarks in {} groups ({total} server processes)...",
        plan.groups.iter().map(|group| group.benchmarks.len()).sum::<usize>(),
        plan.groups.len(),
    );
    let mut results = Vec::new();
    for group in &plan.groups {
        if group.mode == Mode::Function {
            coordinator.setup(group, false)?;
        }
        for (index, benchmark) in group.benchmarks.iter().enumerate() {
            let last = index + 1 == group.benchmarks.len();
            let result = coordinator.run_benchmark(group, benchmark, last);
            log::info!(
                "[{}/{benchmark}] finished with {} scores and {} failed forks",
                group.mode,
                result.scores.len(),
                result.failures.len()
            );
            results.push(result);
        }
    }
    coordinator.select(None)?;

    Ok(results)
}

/// Runs every configured benchmark with the configured server executable.
///
/// # Errors
///
/// Fails if the server cannot be found, or for any reason [`execute_with`] fails.
pub fn execute_all(config: &Config, directory: &Path) -> anyhow::Result<Vec<RunResult>> {
    let server = config.locate_server(directory)?;
    let mut launcher = ServerLauncher::new(server, config.server_args.clone(), directory.to_path_buf());
    execute_with(config, directory, &mut launcher)
}

/// Checks that the server starts and every function group sets up and tears down, without measuring anything.
///
/// # Errors
///
/// Fails if the dry pass fails or any group's setup pass fails.
pub fn validate_with(config: &Config, directory: &Path, launcher: &mut dyn Launcher) -> anyhow::Result<()> {
    let (level_path, addons) = prepare(config, directory, launcher)?;
    let plan = Plan::build(config, &addons)?;
    let mut coordinator = Coordinator {
        config,
        launcher,
        level_path,
        benchmark_packs: addons
            .iter()
            .filter(|addon| addon.is_benchmark())
            .map(|addon| addon.name.clone())
            .collect(),
        done: 0,
        total: 0,
    };

    let mut failed = Vec::new();
    for group in plan.groups.iter().filter(|group| group.name.is_some()) {
        log::info!("[{}] validating group...", group.name.as_deref().unwrap_or_default());
        if !coordinator.setup(group, true)? {
            failed.extend(group.name.clone());
        }
    }
    coordinator.select(None)?;

    if !failed.is_empty() {
        bail!("setup failed for {}", failed.join(", "));
    }
    log::info!("everything looks good");
    Ok(())
}

/// [`validate_with`] using the configured server executable.
///
/// # Errors
///
/// Fails if the server cannot be found, or for any reason [`validate_with`] fails.
pub fn validate_all(config: &Config, directory: &Path) -> anyhow::Result<()> {
    let server = config.locate_server(directory)?;
    let mut launcher = ServerLauncher::new(server, config.server_args.clone(), directory.to_path_buf());
    validate_with(config, directory, &mut launcher)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread::JoinHandle,
        time::{Duration, Instant},
    };

    use super::*;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Report,
        Silent,
        BudgetExceeded,
    }

    #[derive(Default)]
    struct Log {
        lifetimes: Vec<(Instant, Instant)>,
        descriptors: Vec<RunDescriptor>,
    }

    struct FakeProcess {
        worker: Option<JoinHandle<Option<i32>>>,
        started: Instant,
        log: Arc<Mutex<Log>>,
    }

    impl Process for FakeProcess {
        fn wait(&mut self) -> io::Result<Option<i32>> {
            let code = self.worker.take().map_or(Some(0), |worker| worker.join().unwrap());
            self.log
                .lock()
                .unwrap()
                .lifetimes
                .push((self.started, Instant::now()));
            Ok(code)
        }
    }

    struct FakeLauncher {
        behaviour: Behaviour,
        log: Arc<Mutex<Log>>,
    }

    impl FakeLauncher {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                log: Arc::default(),
            }
        }
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self, descriptor: &RunDescriptor) -> io::Result<Box<dyn Process>> {
            self.log.lock().unwrap().descriptors.push(descriptor.clone());
            let started = Instant::now();
            let iteration = descriptor.iteration().cloned();
            let behaviour = self.behaviour;
            let worker = thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                let Some(iteration) = iteration else {
                    return Some(0);
                };
                let message = match behaviour {
                    Behaviour::Silent => return Some(1),
                    Behaviour::BudgetExceeded => Message::BudgetExceeded,
                    Behaviour::Report => Message::RunResult {
                        scores: vec![10.0; iteration.measurement_iterations as usize],
                    },
                };
                message::send(iteration.port, &message).unwrap();
                Some(0)
            });
            Ok(Box::new(FakeProcess {
                worker: Some(worker),
                started,
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn config() -> Config {
        Config {
            warmup_iterations: 0,
            measurement_iterations: 5,
            time: 1,
            forks: 3,
            execute_benchmarks: vec!["say a,b".to_string()],
            parsing_benchmarks: vec!["stop".to_string()],
            ..Config::default()
        }
    }

    #[test]
    fn forks_run_one_after_another() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = FakeLauncher::new(Behaviour::Report);
        let results = execute_with(&config(), dir.path(), &mut launcher).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].mode, Mode::Parsing);
        assert_eq!(results[1].benchmark, "say a,b");
        for result in &results {
            assert_eq!(result.scores, vec![10.0; 15]);
            assert!(result.failures.is_empty());
        }

        let log = launcher.log.lock().unwrap();
        // one dry pass plus two benchmarks with three forks each
        assert_eq!(log.lifetimes.len(), 7);
        assert_eq!(log.descriptors[0], RunDescriptor::Dry);
        let mut lifetimes = log.lifetimes.clone();
        lifetimes.sort();
        for pair in lifetimes.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "server processes overlapped");
        }
    }

    #[test]
    fn descriptors_count_forks_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = FakeLauncher::new(Behaviour::Report);
        execute_with(&config(), dir.path(), &mut launcher).unwrap();

        let log = launcher.log.lock().unwrap();
        let iterations: Vec<&Iteration> = log
            .descriptors
            .iter()
            .filter_map(RunDescriptor::iteration)
            .collect();
        assert_eq!(iterations.len(), 6);
        assert_eq!(
            iterations.iter().map(|i| i.fork).collect::<Vec<_>>(),
            [0, 1, 2, 0, 1, 2]
        );
        assert!(iterations[0].progress_percent.abs() < f64::EPSILON);
        assert!((iterations[3].progress_percent - 50.0).abs() < 1e-9);
        assert!(iterations.iter().all(|i| !i.last_iteration_in_group));
    }

    #[test]
    fn only_the_final_fork_of_an_addon_group_ends_it() {
        let dir = tempfile::tempdir().unwrap();
        let level_dir = dir.path().join("world");
        let pack = level_dir.join(DATAPACKS_DIR).join("bench");
        std::fs::create_dir_all(pack.join("data/b/functions")).unwrap();
        std::fs::write(pack.join("pack.mcmeta"), r#"{"pack": {"mch": true}}"#).unwrap();
        for name in ["f", "g"] {
            std::fs::write(
                pack.join(format!("data/b/functions/{name}.mcfunction")),
                "# @benchmark\nsay hi\n",
            )
            .unwrap();
        }
        LevelStorage::create(
            &level_dir.join(level::FILE_NAME),
            &["vanilla".to_string(), "file/bench".to_string()],
            65_536,
        )
        .save()
        .unwrap();

        let config = Config {
            parsing_benchmarks: Vec::new(),
            execute_benchmarks: Vec::new(),
            function_benchmarks: vec!["file/bench".to_string()],
            ..config()
        };
        let mut launcher = FakeLauncher::new(Behaviour::Report);
        let results = execute_with(&config, dir.path(), &mut launcher).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].benchmark, BASELINE_BENCHMARK);

        let log = launcher.log.lock().unwrap();
        let iterations: Vec<&Iteration> = log
            .descriptors
            .iter()
            .filter_map(RunDescriptor::iteration)
            .collect();
        // the baseline and two benchmarks, three forks each
        assert_eq!(iterations.len(), 9);
        let ending: Vec<&Iteration> = iterations
            .iter()
            .copied()
            .filter(|i| i.last_iteration_in_group)
            .collect();
        assert_eq!(ending.len(), 1);
        assert_eq!(ending[0].fork, 2);
        assert_eq!(ending[0].benchmark, results[2].benchmark);
        assert!(std::ptr::eq(ending[0], *iterations.last().unwrap()));
    }

    #[test]
    fn silent_and_failing_forks_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = FakeLauncher::new(Behaviour::Silent);
        let results = execute_with(&config(), dir.path(), &mut launcher).unwrap();
        assert!(results[0].scores.is_empty());
        assert_eq!(
            results[0].failures[0],
            ForkFailure {
                fork: 0,
                kind: FailureKind::NoResult { exit_code: Some(1) }
            }
        );

        let mut launcher = FakeLauncher::new(Behaviour::BudgetExceeded);
        let results = execute_with(&config(), dir.path(), &mut launcher).unwrap();
        assert_eq!(results[1].failures.len(), 3);
        assert!(results[1]
            .failures
            .iter()
            .all(|failure| failure.kind == FailureKind::BudgetExceeded));
    }

    #[test]
    fn plan_puts_baseline_before_function_groups() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("bench");
        std::fs::create_dir_all(pack.join("data/b/functions")).unwrap();
        std::fs::write(pack.join("pack.mcmeta"), r#"{"pack": {"mch": true}}"#).unwrap();
        std::fs::write(pack.join("data/b/functions/f.mcfunction"), "# @benchmark\nsay f\n").unwrap();
        let addons = benchmarks::find_all_addons(dir.path()).unwrap();

        let config = Config {
            function_benchmarks: vec!["file/bench".to_string(), "file/missing".to_string()],
            ..config()
        };
        let plan = Plan::build(&config, &addons).unwrap();
        let names: Vec<(Option<&str>, Mode, &[String])> = plan
            .groups
            .iter()
            .map(|group| (group.name.as_deref(), group.mode, group.benchmarks.as_slice()))
            .collect();
        assert_eq!(
            names,
            [
                (None, Mode::Parsing, &["stop".to_string()][..]),
                (None, Mode::Execute, &["say a,b".to_string()][..]),
                (None, Mode::Function, &[BASELINE_BENCHMARK.to_string()][..]),
                (Some("file/bench"), Mode::Function, &["b:f".to_string()][..]),
            ]
        );
        assert_eq!(plan.total(3), 12);
    }

    #[test]
    fn launch_failure_does_not_hang() {
        struct Broken;
        impl Launcher for Broken {
            fn launch(&mut self, _: &RunDescriptor) -> io::Result<Box<dyn Process>> {
                Err(io::Error::new(io::ErrorKind::NotFound, "no such server"))
            }
        }
        let result = run_fork(&mut Broken, |_| RunDescriptor::Dry);
        assert!(matches!(result, Err(FailureKind::Launch(_))));
    }
}
