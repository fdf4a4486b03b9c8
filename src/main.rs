use std::{path::PathBuf, process};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;

use mch::{
    config::{Config, CONFIG_FILE},
    execute_all,
    report::{Format, HostInfo, Metadata, Report},
    stats::TimeUnit,
    validate_all,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file; a missing file means defaults
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Directory the server runs in, containing server.properties and the level
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Only check that the server starts and every function group sets up and tears down
    #[arg(long)]
    validate: bool,

    /// Start function benchmarks without waiting for `function mch:load` on the server console
    #[arg(long)]
    auto_start: Option<bool>,

    /// Warmup windows per fork
    #[arg(short, long)]
    warmup_iterations: Option<u32>,

    /// Measurement windows per fork
    #[arg(short, long)]
    measurement_iterations: Option<u32>,

    /// Window length in seconds
    #[arg(short, long)]
    time: Option<u32>,

    /// Server processes per benchmark
    #[arg(short, long)]
    forks: Option<u32>,

    /// Unit scores are reported in (ns, us, ms, s, m)
    #[arg(long)]
    time_unit: Option<TimeUnit>,

    /// Server executable
    #[arg(long)]
    server: Option<PathBuf>,

    /// Argument passed to the server executable, repeatable
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Report path, without extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report formats to write (json, md), comma-separated
    #[arg(long, value_delimiter = ',')]
    formats: Vec<Format>,

    /// Command to measure parsing of, repeatable
    #[arg(long = "parsing")]
    parsing_benchmarks: Vec<String>,

    /// Command to measure execution of, repeatable
    #[arg(long = "execute")]
    execute_benchmarks: Vec<String>,

    /// Add-on group to measure the functions of, like `file/my_pack`, repeatable
    #[arg(long = "function")]
    function_benchmarks: Vec<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        macro_rules! set {
            ($($field:ident),*) => {$(
                if let Some(value) = self.$field {
                    config.$field = value;
                }
            )*};
        }
        set!(
            auto_start,
            warmup_iterations,
            measurement_iterations,
            time,
            forks,
            time_unit,
            server,
            output
        );

        for (flags, field) in [
            (self.server_args, &mut config.server_args),
            (self.parsing_benchmarks, &mut config.parsing_benchmarks),
            (self.execute_benchmarks, &mut config.execute_benchmarks),
            (self.function_benchmarks, &mut config.function_benchmarks),
        ] {
            if !flags.is_empty() {
                *field = flags;
            }
        }
        if !self.formats.is_empty() {
            config.formats = self.formats;
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let start_time = Utc::now();

    let directory = args
        .directory
        .canonicalize()
        .with_context(|| format!("could not find server directory {}", args.directory.display()))?;
    let mut config = Config::load(&args.config)?;
    let validate = args.validate;
    args.apply(&mut config);
    config.validate(&directory)?;
    log::debug!("config: {config:#?}");

    if validate {
        return validate_all(&config, &directory);
    }
    if config.is_empty() {
        log::warn!("no benchmarks configured");
    }

    let results = execute_all(&config, &directory)?;
    let report = Report::new(
        Metadata::new(&config, start_time, HostInfo::collect()),
        &results,
    );
    log::info!("results:\n{}", report.to_markdown());
    report.write(&config.output, &config.formats)?;

    Ok(())
}

fn main() {
    human_panic::setup_panic!();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}
