//! The iteration engine, the part of the harness that lives inside the benchmarked server.
//!
//! The host drives it through six entry points, all invoked synchronously from its own command execution:
//!
//! - [`IterationEngine::on_limit`] and [`IterationEngine::on_setup`] at the top of the load chain,
//! - [`IterationEngine::on_start`] once the world is ready,
//! - [`IterationEngine::on_check`] right after start, as a canary for the per-chain command budget,
//! - [`IterationEngine::on_loop_tick`] once per tick while a function benchmark runs,
//! - [`IterationEngine::on_post`] once the engine has reported [`Flow::Finished`].
//!
//! The engine never owns the host. Every entry point that needs to run commands borrows it through the [`Dispatcher`]
//! trait, so the same state machine drives the bundled `mch-server` and the fakes in the tests.

use std::{
    fmt::Display,
    hint::black_box,
    io,
    time::Instant,
};

use crate::{
    descriptor::{Iteration, Mode, RunDescriptor},
    message::{self, Message},
};

pub mod session;

use session::{IterationSession, Window};

/// Command that lifts the host's per-chain command budget.
pub const RAISE_BUDGET: &str = "gamerule maxCommandChainLength 2147483647";

/// Function tag run before a group's benchmarks.
pub const SETUP_TAG: &str = "#mch:setup";
/// Function tag run after a group's benchmarks.
pub const TEARDOWN_TAG: &str = "#mch:teardown";
/// Function tag run before every function-mode window.
pub const SETUP_ITERATION_TAG: &str = "#mch:setup.iteration";
/// Function tag run after every function-mode window.
pub const TEARDOWN_ITERATION_TAG: &str = "#mch:teardown.iteration";

/// The host's command processor, as seen by the engine.
pub trait Dispatcher {
    /// A parsed command, ready to run any number of times.
    type Command;
    /// Parse or execution failure.
    type Error: Display;

    /// Parses one command line.
    ///
    /// # Errors
    ///
    /// Fails on unknown commands and bad syntax.
    fn parse(&mut self, input: &str) -> Result<Self::Command, Self::Error>;

    /// Runs a parsed command, returning its result value.
    ///
    /// # Errors
    ///
    /// Fails if the command fails.
    fn execute(&mut self, command: &Self::Command) -> Result<i32, Self::Error>;
}

/// Source of timestamps, in nanoseconds from an arbitrary origin.
pub trait Clock {
    /// Current timestamp.
    fn now(&self) -> u64;
}

/// Wall clock backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// A clock whose origin is the moment it was created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// What the host should do once an entry point returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Carry on with the current chain.
    Continue,
    /// Carry on, and invoke [`IterationEngine::on_loop_tick`] again next tick.
    Reschedule,
    /// The run is over; invoke [`IterationEngine::on_post`] once the current chain completes.
    Finished,
    /// Drop the rest of the current chain.
    Halt,
}

struct FunctionHooks<C> {
    run: Option<C>,
    setup_iteration: Option<C>,
    teardown_iteration: Option<C>,
}

/// The harness state machine for one server process.
pub struct IterationEngine<D: Dispatcher, C: Clock = MonotonicClock> {
    descriptor: RunDescriptor,
    clock: C,
    session: Option<IterationSession>,
    hooks: Option<FunctionHooks<D::Command>>,
    limit_calls: u32,
    started: bool,
    checked: bool,
    posted: bool,
    failures: u64,
}

impl<D: Dispatcher> IterationEngine<D> {
    /// An engine timed by the wall clock.
    #[must_use]
    pub fn new(descriptor: RunDescriptor) -> Self {
        Self::with_clock(descriptor, MonotonicClock::new())
    }
}

impl<D: Dispatcher, C: Clock> IterationEngine<D, C> {
    /// An engine for `descriptor` that reads time from `clock`.
    #[must_use]
    pub fn with_clock(descriptor: RunDescriptor, clock: C) -> Self {
        let session = descriptor.iteration().map(|iteration| {
            IterationSession::new(
                iteration.warmup_iterations,
                iteration.measurement_iterations,
                iteration.window(),
            )
        });
        Self {
            descriptor,
            clock,
            session,
            hooks: None,
            limit_calls: 0,
            started: false,
            checked: false,
            posted: false,
            failures: 0,
        }
    }

    /// The descriptor the engine was armed with.
    #[must_use]
    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    /// The window bookkeeping, for measured runs.
    #[must_use]
    pub fn session(&self) -> Option<&IterationSession> {
        self.session.as_ref()
    }

    /// Whether a measured run is in progress, i.e. the host should tick without pausing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started && !self.posted
    }

    /// Whether the result has been posted.
    #[must_use]
    pub fn is_posted(&self) -> bool {
        self.posted
    }

    /// Benchmark operations that failed and were skipped.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Decides the per-chain command budget for the run.
    ///
    /// A function benchmark without auto start stalls the first load, so the operator can start it by hand under the
    /// world's own budget. Everything else lifts the budget.
    pub fn on_limit(&mut self, dispatcher: &mut D) -> Flow {
        self.limit_calls += 1;
        if let Some(iteration) = self.descriptor.iteration() {
            if iteration.mode == Mode::Function && !iteration.auto_start {
                if self.limit_calls == 1 {
                    log::info!("run `function mch:load` to start the benchmark");
                    return Flow::Halt;
                }
                return Flow::Continue;
            }
        }
        run_line(dispatcher, RAISE_BUDGET);
        Flow::Continue
    }

    /// Runs the group setup hooks for setup runs.
    pub fn on_setup(&mut self, dispatcher: &mut D) -> Flow {
        if let RunDescriptor::Setup { dry } = self.descriptor {
            log::debug!("running {SETUP_TAG}...");
            run_line(dispatcher, &format!("function {SETUP_TAG}"));
            if dry {
                log::debug!("running {TEARDOWN_TAG}...");
                run_line(dispatcher, &format!("function {TEARDOWN_TAG}"));
            }
        }
        Flow::Continue
    }

    /// Starts the run.
    ///
    /// Parsing and execute benchmarks run every window right here and return [`Flow::Finished`]. Function benchmarks
    /// run one call and return [`Flow::Reschedule`]; the rest happens in [`IterationEngine::on_loop_tick`].
    pub fn on_start(&mut self, dispatcher: &mut D) -> Flow {
        let Some(iteration) = self.descriptor.iteration().cloned() else {
            self.started = true;
            return Flow::Finished;
        };
        if self.started {
            log::warn!("benchmark already started, ignoring...");
            return Flow::Continue;
        }
        self.started = true;

        let percent = iteration.progress_percent;
        log::info!(
            "{} {} {}/{} ({percent:.2}%)",
            iteration.mode,
            iteration.benchmark,
            iteration.fork + 1,
            iteration.forks,
        );

        match iteration.mode {
            Mode::Parsing => self.run_parsing(dispatcher, &iteration),
            Mode::Execute => self.run_execute(dispatcher, &iteration),
            Mode::Function => self.start_function(dispatcher, &iteration),
        }
    }

    /// Marks that the load chain got past the benchmark's first call.
    pub fn on_check(&mut self) -> Flow {
        self.checked = true;
        Flow::Continue
    }

    /// Advances a function benchmark by one tick.
    pub fn on_loop_tick(&mut self, dispatcher: &mut D) -> Flow {
        let (Some(session), Some(hooks)) = (self.session.as_mut(), self.hooks.as_ref()) else {
            return Flow::Continue;
        };
        if self.posted || session.is_done() {
            return Flow::Continue;
        }

        if let Some(window) = session.poll(self.clock.now()) {
            if let Some(teardown) = &hooks.teardown_iteration {
                execute_logged(dispatcher, teardown);
            }
            log_window(&window);
            if session.is_done() {
                return Flow::Finished;
            }
            if let Some(setup) = &hooks.setup_iteration {
                execute_logged(dispatcher, setup);
            }
            session.begin_window(self.clock.now());
        }

        if let Some(run) = &hooks.run {
            if let Err(err) = dispatcher.execute(run) {
                log::trace!("benchmark call failed: {err}, continuing...");
                self.failures += 1;
            }
        }
        session.record_operation();
        Flow::Reschedule
    }

    /// Reports the outcome to the orchestrator. Only the first call has any effect.
    ///
    /// # Errors
    ///
    /// Fails if the result cannot be delivered.
    pub fn on_post(&mut self, dispatcher: &mut D) -> io::Result<()> {
        if self.posted {
            return Ok(());
        }
        self.posted = true;

        let Some(iteration) = self.descriptor.iteration().cloned() else {
            return Ok(());
        };
        if iteration.last_iteration_in_group {
            log::debug!("running {TEARDOWN_TAG}...");
            run_line(dispatcher, &format!("function {TEARDOWN_TAG}"));
        }
        if self.failures > 0 {
            log::warn!("{} benchmark operations failed", self.failures);
        }

        let message = self.outcome(&iteration);
        log::debug!("posting {message:?} to port {}...", iteration.port);
        message::send(iteration.port, &message)
    }

    /// The message [`IterationEngine::on_post`] sends.
    #[must_use]
    pub fn outcome(&self, iteration: &Iteration) -> Message {
        if iteration.mode == Mode::Function && !self.checked {
            log::warn!("maxCommandChainLength exceeded!");
            return Message::BudgetExceeded;
        }
        Message::RunResult {
            scores: self
                .session
                .as_ref()
                .map(|session| session.scores().to_vec())
                .unwrap_or_default(),
        }
    }

    fn run_parsing(&mut self, dispatcher: &mut D, iteration: &Iteration) -> Flow {
        let Some(session) = self.session.as_mut() else {
            return Flow::Finished;
        };
        session.begin(self.clock.now());
        while !session.is_done() {
            // The parse result is discarded; only its cost matters.
            let _ = black_box(dispatcher.parse(black_box(&iteration.benchmark)));
            session.record_operation();
            if let Some(window) = session.poll(self.clock.now()) {
                log_window(&window);
            }
        }
        Flow::Finished
    }

    fn run_execute(&mut self, dispatcher: &mut D, iteration: &Iteration) -> Flow {
        let Some(session) = self.session.as_mut() else {
            return Flow::Finished;
        };
        let command = match dispatcher.parse(&iteration.benchmark) {
            Ok(command) => Some(command),
            Err(err) => {
                log::warn!("could not parse benchmark command: {err}, continuing...");
                None
            }
        };

        session.begin(self.clock.now());
        while !session.is_done() {
            let result = command.as_ref().map(|command| dispatcher.execute(command));
            if !matches!(result, Some(Ok(_))) {
                self.failures += 1;
            }
            session.record_operation();
            if let Some(window) = session.poll(self.clock.now()) {
                log_window(&window);
            }
        }
        Flow::Finished
    }

    fn start_function(&mut self, dispatcher: &mut D, iteration: &Iteration) -> Flow {
        let mut parse = |line: String| match dispatcher.parse(&line) {
            Ok(command) => Some(command),
            Err(err) => {
                log::warn!("could not parse `{line}`: {err}, skipping...");
                None
            }
        };
        let hooks = FunctionHooks {
            run: parse(format!("function {}", iteration.benchmark)),
            setup_iteration: parse(format!("function {SETUP_ITERATION_TAG}")),
            teardown_iteration: parse(format!("function {TEARDOWN_ITERATION_TAG}")),
        };
        if hooks.run.is_none() {
            log::error!("benchmark function {} is unavailable", iteration.benchmark);
            self.hooks = Some(hooks);
            self.checked = true;
            return Flow::Finished;
        }

        if let Some(setup) = &hooks.setup_iteration {
            execute_logged(dispatcher, setup);
        }
        let Some(session) = self.session.as_mut() else {
            return Flow::Finished;
        };
        session.begin(self.clock.now());
        if let Some(run) = &hooks.run {
            if let Err(err) = dispatcher.execute(run) {
                log::trace!("benchmark call failed: {err}, continuing...");
                self.failures += 1;
            }
        }
        session.record_operation();
        self.hooks = Some(hooks);
        Flow::Reschedule
    }
}

fn log_window(window: &Window) {
    match window {
        Window::Warmup { score, .. } => log::info!("warmup iteration: {score} ns/op"),
        Window::Measurement { score, .. } => log::info!("measurement iteration: {score} ns/op"),
    }
}

fn execute_logged<D: Dispatcher>(dispatcher: &mut D, command: &D::Command) {
    if let Err(err) = dispatcher.execute(command) {
        log::warn!("hook failed: {err}, continuing...");
    }
}

fn run_line<D: Dispatcher>(dispatcher: &mut D, line: &str) {
    match dispatcher.parse(line) {
        Ok(command) => execute_logged(dispatcher, &command),
        Err(err) => log::warn!("could not parse `{line}`: {err}, continuing..."),
    }
}
