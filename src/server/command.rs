//! The reference server's command language.
//!
//! ```text
//! function <id> | function #<tag>
//! schedule function <id> <n>t
//! gamerule maxCommandChainLength [<n>]
//! scoreboard players (set|add|remove) <holder> <objective> <n>
//! scoreboard players get <holder> <objective>
//! say <text>
//! stop
//! mch:(limit|setup|start|check|loop|post|noop)
//! ```

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use thiserror::Error;

use crate::resource::ResourceLocation;

/// Game rule that bounds how many commands one chain may run.
pub const CHAIN_LENGTH_RULE: &str = "maxCommandChainLength";

/// Errors produced while parsing or running a command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The first word is not a command.
    #[error("unknown command '{0}'")]
    Unknown(String),
    /// The command exists but its arguments are wrong.
    #[error("invalid `{command}`: {reason}")]
    Syntax {
        /// The whole command line.
        command: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A function id that is not loaded.
    #[error("unknown function {0}")]
    UnknownFunction(ResourceLocation),
    /// A function tag id that is not loaded.
    #[error("unknown function tag #{0}")]
    UnknownTag(ResourceLocation),
    /// A score that was never set.
    #[error("no score for {holder} in {objective}")]
    UnknownScore {
        /// Score holder.
        holder: String,
        /// Objective name.
        objective: String,
    },
    /// The current chain ran out of its command budget.
    #[error("command chain length limit reached")]
    ChainLimit,
}

/// Harness entry points, invoked as `mch:<name>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    /// Sets the chain budget for the run.
    Limit,
    /// Runs the group setup hooks for setup runs.
    Setup,
    /// Starts the run.
    Start,
    /// Marks that the load chain got past the benchmark's first call.
    Check,
    /// Advances a function benchmark by one tick.
    Loop,
    /// Sends the result and stops the server.
    Post,
    /// Does nothing.
    Noop,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::Limit => "limit",
            Hook::Setup => "setup",
            Hook::Start => "start",
            Hook::Check => "check",
            Hook::Loop => "loop",
            Hook::Post => "post",
            Hook::Noop => "noop",
        }
    }
}

/// What `function` refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A single function.
    Function(ResourceLocation),
    /// Every function in a tag.
    Tag(ResourceLocation),
}

/// Scoreboard operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreOperation {
    /// `set <n>`
    Set(i32),
    /// `add <n>`, wrapping on overflow.
    Add(i32),
    /// `remove <n>`, wrapping on overflow.
    Remove(i32),
    /// `get`
    Get,
}

/// A parsed command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `function <id>` or `function #<tag>`
    Function(Target),
    /// `schedule function <id> <n>t`
    Schedule {
        /// Function to run.
        function: ResourceLocation,
        /// Delay from the current tick, at least one.
        ticks: u64,
    },
    /// `gamerule maxCommandChainLength [<n>]`; without a value, queries it.
    GameRule {
        /// New limit.
        value: Option<i32>,
    },
    /// `scoreboard players ...`
    Scoreboard {
        /// Score holder.
        holder: String,
        /// Objective name.
        objective: String,
        /// What to do with the score.
        operation: ScoreOperation,
    },
    /// `say <text>`
    Say(String),
    /// `stop`
    Stop,
    /// `mch:<hook>`
    Hook(Hook),
}

fn syntax(command: &str, reason: impl Into<String>) -> CommandError {
    CommandError::Syntax {
        command: command.to_string(),
        reason: reason.into(),
    }
}

fn location(line: &str, id: &str) -> Result<ResourceLocation, CommandError> {
    id.parse().map_err(|err| syntax(line, format!("{err}")))
}

fn number<T: FromStr>(line: &str, value: &str) -> Result<T, CommandError> {
    value
        .parse()
        .map_err(|_| syntax(line, format!("'{value}' is not a valid number")))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim().trim_start_matches('/');
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Err(CommandError::Unknown(String::new()));
        };

        match name {
            "function" => match args {
                [target] => Ok(Command::Function(match target.strip_prefix('#') {
                    Some(tag) => Target::Tag(location(line, tag)?),
                    None => Target::Function(location(line, target)?),
                })),
                _ => Err(syntax(line, "expected one function or tag")),
            },
            "schedule" => match args {
                ["function", id, time] => {
                    let ticks = time
                        .strip_suffix('t')
                        .ok_or_else(|| syntax(line, "time must be given in ticks, like `1t`"))?;
                    let ticks: u64 = number(line, ticks)?;
                    if ticks == 0 {
                        return Err(syntax(line, "time must be positive"));
                    }
                    Ok(Command::Schedule {
                        function: location(line, id)?,
                        ticks,
                    })
                }
                _ => Err(syntax(line, "expected `schedule function <id> <n>t`")),
            },
            "gamerule" => match args {
                [CHAIN_LENGTH_RULE] => Ok(Command::GameRule { value: None }),
                [CHAIN_LENGTH_RULE, value] => Ok(Command::GameRule {
                    value: Some(number(line, value)?),
                }),
                [rule, ..] => Err(syntax(line, format!("unsupported game rule '{rule}'"))),
                [] => Err(syntax(line, "expected a game rule")),
            },
            "scoreboard" => {
                let (operation, holder, objective) = match args {
                    ["players", "set", holder, objective, n] => {
                        (ScoreOperation::Set(number(line, n)?), holder, objective)
                    }
                    ["players", "add", holder, objective, n] => {
                        (ScoreOperation::Add(number(line, n)?), holder, objective)
                    }
                    ["players", "remove", holder, objective, n] => {
                        (ScoreOperation::Remove(number(line, n)?), holder, objective)
                    }
                    ["players", "get", holder, objective] => (ScoreOperation::Get, holder, objective),
                    _ => return Err(syntax(line, "unsupported scoreboard command")),
                };
                Ok(Command::Scoreboard {
                    holder: (*holder).to_string(),
                    objective: (*objective).to_string(),
                    operation,
                })
            }
            "say" => {
                let text = line["say".len()..].trim();
                if text.is_empty() {
                    return Err(syntax(line, "expected a message"));
                }
                Ok(Command::Say(text.to_string()))
            }
            "stop" if args.is_empty() => Ok(Command::Stop),
            "stop" => Err(syntax(line, "`stop` takes no arguments")),
            _ => {
                let hook = match name.strip_prefix("mch:") {
                    Some("limit") => Hook::Limit,
                    Some("setup") => Hook::Setup,
                    Some("start") => Hook::Start,
                    Some("check") => Hook::Check,
                    Some("loop") => Hook::Loop,
                    Some("post") => Hook::Post,
                    Some("noop") => Hook::Noop,
                    _ => return Err(CommandError::Unknown(name.to_string())),
                };
                if !args.is_empty() {
                    return Err(syntax(line, "harness hooks take no arguments"));
                }
                Ok(Command::Hook(hook))
            }
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Command::Function(Target::Function(id)) => write!(f, "function {id}"),
            Command::Function(Target::Tag(id)) => write!(f, "function #{id}"),
            Command::Schedule { function, ticks } => write!(f, "schedule function {function} {ticks}t"),
            Command::GameRule { value: None } => write!(f, "gamerule {CHAIN_LENGTH_RULE}"),
            Command::GameRule { value: Some(n) } => write!(f, "gamerule {CHAIN_LENGTH_RULE} {n}"),
            Command::Scoreboard {
                holder,
                objective,
                operation,
            } => match operation {
                ScoreOperation::Set(n) => write!(f, "scoreboard players set {holder} {objective} {n}"),
                ScoreOperation::Add(n) => write!(f, "scoreboard players add {holder} {objective} {n}"),
                ScoreOperation::Remove(n) => {
                    write!(f, "scoreboard players remove {holder} {objective} {n}")
                }
                ScoreOperation::Get => write!(f, "scoreboard players get {holder} {objective}"),
            },
            Command::Say(text) => write!(f, "say {text}"),
            Command::Stop => f.write_str("stop"),
            Command::Hook(hook) => write!(f, "mch:{}", hook.name()),
        }
    }
}
