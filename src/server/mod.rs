//! A small tick-driven command server that hosts the iteration engine.
//!
//! It stands in for the real host: it loads a level and its enabled add-ons, runs functions and tags, enforces a
//! per-chain command budget, and invokes the harness hooks when `mch:*` commands run.
//!
//! Every top-level chain (the load tag, a scheduled function, a console line) starts with a budget of
//! `maxCommandChainLength` commands. Nested function calls draw from the same budget; once it is spent, the rest of
//! the chain is dropped. A limit of `i32::MAX` is treated as unlimited.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    rc::Rc,
    sync::mpsc::Receiver,
    thread,
    time::Duration,
};

use anyhow::Context;

use crate::{
    benchmarks::{self, AddOn, DATAPACKS_DIR},
    descriptor::RunDescriptor,
    engine::{Dispatcher, Flow, IterationEngine},
    level::{self, LevelStorage, VANILLA_PACK},
    resource::ResourceLocation,
};

pub mod command;

pub use command::{Command, CommandError, Hook, ScoreOperation, Target, CHAIN_LENGTH_RULE};

/// Chain budget of a freshly created level.
pub const DEFAULT_CHAIN_LENGTH: i32 = 65_536;

/// Pause between ticks while no benchmark is running.
pub const IDLE_TICK: Duration = Duration::from_millis(50);

/// Deepest nesting of function calls.
pub const MAX_CALL_DEPTH: usize = 256;

const UNLIMITED: u64 = u64::MAX;

fn budget(limit: i32) -> u64 {
    if limit == i32::MAX {
        UNLIMITED
    } else {
        u64::try_from(limit).unwrap_or(0)
    }
}

fn location(id: &str) -> ResourceLocation {
    id.parse()
        .unwrap_or_else(|_| unreachable!("built-in id {id} is valid"))
}

/// The reference host.
pub struct Server {
    level: LevelStorage,
    functions: HashMap<ResourceLocation, Rc<[Command]>>,
    tags: HashMap<ResourceLocation, Vec<Target>>,
    chain_limit: i32,
    chain_remaining: u64,
    depth: usize,
    scores: HashMap<(String, String), i32>,
    schedule: BTreeMap<u64, Vec<ResourceLocation>>,
    tick: u64,
    running: bool,
    harness: Option<IterationEngine<Server>>,
    post_pending: bool,
    console: Option<Receiver<String>>,
}

impl Server {
    /// Loads the level in `level_dir`, creating it if needed, together with every enabled add-on.
    ///
    /// With a descriptor, the harness is armed and `mch:load` runs the benchmark on startup.
    ///
    /// # Errors
    ///
    /// Fails if the level cannot be created, read or updated.
    pub fn open(level_dir: &Path, descriptor: Option<RunDescriptor>) -> anyhow::Result<Self> {
        fs::create_dir_all(level_dir)
            .with_context(|| format!("could not create level directory {}", level_dir.display()))?;
        let datapacks = level_dir.join(DATAPACKS_DIR);
        let addons = if datapacks.is_dir() {
            benchmarks::find_all_addons(&datapacks)?
        } else {
            Vec::new()
        };

        let level_path = level_dir.join(level::FILE_NAME);
        let mut level = if level_path.exists() {
            LevelStorage::load(&level_path)?
        } else {
            log::info!("creating {}...", level_path.display());
            let enabled: Vec<String> = std::iter::once(VANILLA_PACK.to_string())
                .chain(addons.iter().map(|addon| addon.name.clone()))
                .collect();
            let level = LevelStorage::create(&level_path, &enabled, DEFAULT_CHAIN_LENGTH);
            level.save()?;
            level
        };
        if level.adopt_new_packs(addons.iter().map(|addon| addon.name.as_str()))? {
            log::info!("found new add-ons, updating {}...", level_path.display());
            level.save()?;
        }

        let chain_limit = level
            .game_rule(CHAIN_LENGTH_RULE)
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_CHAIN_LENGTH);
        let mut server = Self {
            level,
            functions: HashMap::new(),
            tags: HashMap::new(),
            chain_limit,
            chain_remaining: budget(chain_limit),
            depth: 0,
            scores: HashMap::new(),
            schedule: BTreeMap::new(),
            tick: 0,
            running: false,
            harness: descriptor.map(IterationEngine::new),
            post_pending: false,
            console: None,
        };

        for pack in server.level.enabled() {
            match addons.iter().find(|addon| addon.name == pack) {
                Some(addon) => server.load_addon(addon)?,
                None if pack == VANILLA_PACK => {}
                None => log::warn!("enabled add-on {pack} was not found, skipping..."),
            }
        }
        server.install_builtins();
        log::debug!(
            "loaded {} functions and {} tags",
            server.functions.len(),
            server.tags.len()
        );

        Ok(server)
    }

    fn load_addon(&mut self, addon: &AddOn) -> anyhow::Result<()> {
        log::debug!("[{}] loading add-on...", addon.name);
        for (id, path) in benchmarks::function_files(&addon.path)? {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("could not read function {id}"))?;
            let body: Vec<Command> = source
                .lines()
                .map(str::trim)
                .enumerate()
                .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
                .filter_map(|(number, line)| {
                    line.parse::<Command>()
                        .map_err(|err| {
                            log::warn!("[{id}:{}] {err}, skipping line...", number + 1);
                        })
                        .ok()
                })
                .collect();
            self.functions.insert(id, body.into());
        }

        for (id, tag) in benchmarks::function_tags(&addon.path)? {
            let entries = self.tags.entry(id.clone()).or_default();
            if tag.replace {
                entries.clear();
            }
            entries.extend(tag.values.iter().filter_map(|value| {
                let target = match value.strip_prefix('#') {
                    Some(tag) => tag.parse().map(Target::Tag),
                    None => value.parse().map(Target::Function),
                };
                target
                    .map_err(|err| log::warn!("[#{id}] {err}, skipping..."))
                    .ok()
            }));
        }
        Ok(())
    }

    fn install_builtins(&mut self) {
        let hooks = |hooks: &[Hook]| -> Rc<[Command]> {
            hooks.iter().copied().map(Command::Hook).collect()
        };
        self.functions.insert(
            location("mch:load"),
            hooks(&[Hook::Limit, Hook::Setup, Hook::Start, Hook::Check]),
        );
        self.functions.insert(location("mch:tick"), hooks(&[Hook::Loop]));
        self.functions
            .insert(location("mch:baseline"), Rc::from(Vec::new()));

        for tag in [
            "mch:setup",
            "mch:teardown",
            "mch:setup.iteration",
            "mch:teardown.iteration",
            "minecraft:tick",
        ] {
            self.tags.entry(location(tag)).or_default();
        }
        self.tags
            .entry(location("minecraft:load"))
            .or_default()
            .push(Target::Function(location("mch:load")));
    }

    /// Feeds lines typed by an operator into the server; they run at the start of each tick.
    pub fn attach_console(&mut self, lines: Receiver<String>) {
        self.console = Some(lines);
    }

    /// Runs the load tag, then ticks until stopped.
    pub fn serve(&mut self) {
        self.running = true;
        log::info!("done, running #minecraft:load...");
        self.run_chain(&Command::Function(Target::Tag(location("minecraft:load"))));
        while self.running {
            self.tick_once();
            let busy = self.harness.as_ref().is_some_and(|engine| engine.is_running());
            if self.running && !busy {
                thread::sleep(IDLE_TICK);
            }
        }
        log::info!("stopped after {} ticks", self.tick);
    }

    /// Runs one tick: console lines, then due scheduled functions, then the tick tag.
    pub fn tick_once(&mut self) {
        self.tick += 1;

        let lines: Vec<String> = self
            .console
            .as_ref()
            .map(|console| console.try_iter().collect())
            .unwrap_or_default();
        for line in lines {
            if !self.running {
                return;
            }
            self.run_line(&line);
        }

        for function in self.schedule.remove(&self.tick).unwrap_or_default() {
            if !self.running {
                return;
            }
            self.run_chain(&Command::Function(Target::Function(function)));
        }

        let tick_tag = location("minecraft:tick");
        if self.running && self.tags.get(&tick_tag).is_some_and(|tag| !tag.is_empty()) {
            self.run_chain(&Command::Function(Target::Tag(tick_tag)));
        }
    }

    /// Parses and runs one console line as its own chain.
    pub fn run_line(&mut self, line: &str) {
        match self.parse(line) {
            Ok(command) => self.run_chain(&command),
            Err(err) => log::warn!("{err}"),
        }
    }

    /// Runs `command` as a top-level chain with a fresh budget, then posts the result if the harness finished.
    pub fn run_chain(&mut self, command: &Command) {
        self.chain_remaining = budget(self.chain_limit);
        match self.dispatch(command) {
            Ok(_) => {}
            Err(CommandError::ChainLimit) => {
                log::debug!("[{command}] chain length limit reached, dropping the rest of the chain...");
            }
            Err(err) => log::warn!("[{command}] {err}"),
        }
        if self.post_pending {
            self.post();
        }
    }

    fn post(&mut self) {
        self.post_pending = false;
        if let Some(mut engine) = self.harness.take() {
            self.chain_remaining = budget(self.chain_limit);
            if let Err(err) = engine.on_post(self) {
                log::error!("could not post result: {err}");
            }
            self.harness = Some(engine);
        }
        log::info!("stopping server...");
        self.running = false;
    }

    fn dispatch(&mut self, command: &Command) -> Result<i32, CommandError> {
        if self.chain_remaining == 0 {
            return Err(CommandError::ChainLimit);
        }
        if self.chain_remaining != UNLIMITED {
            self.chain_remaining -= 1;
        }

        match command {
            Command::Function(target) => self.call(target),
            Command::Schedule { function, ticks } => {
                let due = self
                    .tick
                    .checked_add(*ticks)
                    .ok_or_else(|| CommandError::Syntax {
                        command: command.to_string(),
                        reason: "delay is too long".to_string(),
                    })?;
                self.schedule.entry(due).or_default().push(function.clone());
                Ok(0)
            }
            Command::GameRule { value: None } => {
                log::info!("{CHAIN_LENGTH_RULE} is {}", self.chain_limit);
                Ok(self.chain_limit)
            }
            Command::GameRule { value: Some(value) } => {
                self.set_chain_limit(*value);
                Ok(0)
            }
            Command::Scoreboard {
                holder,
                objective,
                operation,
            } => self.scoreboard(holder, objective, *operation),
            Command::Say(text) => {
                log::info!("[Server] {text}");
                Ok(0)
            }
            Command::Stop => {
                log::info!("stopping server...");
                self.running = false;
                Ok(0)
            }
            Command::Hook(hook) => Ok(self.hook(*hook)),
        }
    }

    fn set_chain_limit(&mut self, value: i32) {
        self.chain_limit = value;
        // The new limit also governs the rest of the chain that set it.
        self.chain_remaining = budget(value);
        if let Err(err) = self.level.set_game_rule(CHAIN_LENGTH_RULE, &value.to_string()) {
            log::warn!("could not record game rule: {err}");
        }
    }

    fn scoreboard(
        &mut self,
        holder: &str,
        objective: &str,
        operation: ScoreOperation,
    ) -> Result<i32, CommandError> {
        let key = (holder.to_string(), objective.to_string());
        let value = match operation {
            ScoreOperation::Get => {
                return self
                    .scores
                    .get(&key)
                    .copied()
                    .ok_or(CommandError::UnknownScore {
                        holder: key.0,
                        objective: key.1,
                    });
            }
            ScoreOperation::Set(n) => n,
            ScoreOperation::Add(n) => self.scores.get(&key).copied().unwrap_or(0).wrapping_add(n),
            ScoreOperation::Remove(n) => self.scores.get(&key).copied().unwrap_or(0).wrapping_sub(n),
        };
        self.scores.insert(key, value);
        Ok(value)
    }

    fn hook(&mut self, hook: Hook) -> i32 {
        if hook == Hook::Post {
            self.post_pending = true;
            return 0;
        }
        let Some(mut engine) = self.harness.take() else {
            return 0;
        };
        let flow = match hook {
            Hook::Limit => engine.on_limit(self),
            Hook::Setup => engine.on_setup(self),
            Hook::Start => engine.on_start(self),
            Hook::Check => engine.on_check(),
            Hook::Loop => engine.on_loop_tick(self),
            Hook::Post | Hook::Noop => Flow::Continue,
        };
        self.harness = Some(engine);

        match flow {
            Flow::Continue => {}
            Flow::Reschedule => self
                .schedule
                .entry(self.tick + 1)
                .or_default()
                .push(location("mch:tick")),
            Flow::Finished => self.post_pending = true,
            Flow::Halt => self.chain_remaining = 0,
        }
        0
    }

    fn call(&mut self, target: &Target) -> Result<i32, CommandError> {
        let bodies = match target {
            Target::Function(id) => vec![self
                .functions
                .get(id)
                .cloned()
                .ok_or_else(|| CommandError::UnknownFunction(id.clone()))?],
            Target::Tag(id) => {
                let mut bodies = Vec::new();
                self.resolve_tag(id, &mut HashSet::new(), &mut bodies)?;
                bodies
            }
        };

        if self.depth >= MAX_CALL_DEPTH {
            return Err(CommandError::ChainLimit);
        }
        self.depth += 1;
        let result = self.run_bodies(&bodies);
        self.depth -= 1;
        result
    }

    fn run_bodies(&mut self, bodies: &[Rc<[Command]>]) -> Result<i32, CommandError> {
        let mut count = 0;
        for body in bodies {
            for command in body.iter() {
                match self.dispatch(command) {
                    Ok(_) => count += 1,
                    Err(CommandError::ChainLimit) => return Err(CommandError::ChainLimit),
                    Err(err) => log::debug!("[{command}] {err}, continuing..."),
                }
            }
        }
        Ok(count)
    }

    fn resolve_tag(
        &self,
        id: &ResourceLocation,
        seen: &mut HashSet<ResourceLocation>,
        bodies: &mut Vec<Rc<[Command]>>,
    ) -> Result<(), CommandError> {
        let entries = self
            .tags
            .get(id)
            .ok_or_else(|| CommandError::UnknownTag(id.clone()))?;
        if !seen.insert(id.clone()) {
            return Ok(());
        }
        for entry in entries {
            match entry {
                Target::Function(function) => match self.functions.get(function) {
                    Some(body) => bodies.push(Rc::clone(body)),
                    None => log::warn!("[#{id}] unknown function {function}, skipping..."),
                },
                Target::Tag(tag) => {
                    if let Err(err) = self.resolve_tag(tag, seen, bodies) {
                        log::warn!("[#{id}] {err}, skipping...");
                    }
                }
            }
        }
        Ok(())
    }

    /// Current tick number.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The world's current `maxCommandChainLength`.
    #[must_use]
    pub fn chain_limit(&self) -> i32 {
        self.chain_limit
    }

    /// Whether the server is still ticking.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The level the server was opened on.
    #[must_use]
    pub fn level(&self) -> &LevelStorage {
        &self.level
    }

    /// Score of `holder` in `objective`, if one was set.
    #[must_use]
    pub fn score(&self, holder: &str, objective: &str) -> Option<i32> {
        self.scores
            .get(&(holder.to_string(), objective.to_string()))
            .copied()
    }

    /// Whether a function with this id is loaded.
    #[must_use]
    pub fn has_function(&self, id: &str) -> bool {
        id.parse()
            .is_ok_and(|id: ResourceLocation| self.functions.contains_key(&id))
    }

    /// The armed harness, if the server was started with a descriptor.
    #[must_use]
    pub fn harness(&self) -> Option<&IterationEngine<Server>> {
        self.harness.as_ref()
    }
}

impl Dispatcher for Server {
    type Command = Command;
    type Error = CommandError;

    fn parse(&mut self, input: &str) -> Result<Command, CommandError> {
        let command: Command = input.parse()?;
        match &command {
            Command::Function(Target::Function(id)) | Command::Schedule { function: id, .. }
                if !self.functions.contains_key(id) =>
            {
                Err(CommandError::UnknownFunction(id.clone()))
            }
            Command::Function(Target::Tag(id)) if !self.tags.contains_key(id) => {
                Err(CommandError::UnknownTag(id.clone()))
            }
            _ => Ok(command),
        }
    }

    fn execute(&mut self, command: &Command) -> Result<i32, CommandError> {
        self.dispatch(command)
    }
}
