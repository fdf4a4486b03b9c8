use std::{
    io::{self, BufRead},
    path::PathBuf,
    process,
    sync::mpsc,
    thread,
};

use clap::Parser;

use mch::{
    descriptor::{RunDescriptor, ENV_VAR},
    properties::ServerProperties,
    server::Server,
};

/// Reference command server for the mch benchmark harness
#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Directory the server runs in, containing server.properties
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Level directory, overriding `level-name` from server.properties
    #[arg(short, long)]
    level: Option<PathBuf>,
}

fn run(args: Args, descriptor: Option<RunDescriptor>) -> anyhow::Result<()> {
    let level = match args.level {
        Some(level) => level,
        None => ServerProperties::load(&args.directory)?.level_dir(&args.directory),
    };
    log::info!("starting server for level {}...", level.display());
    let mut server = Server::open(&level, descriptor)?;

    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    server.attach_console(receiver);
    server.serve();

    Ok(())
}

fn main() {
    human_panic::setup_panic!();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // A bad descriptor is fatal before the level is touched or any socket is opened.
    let descriptor = match RunDescriptor::from_env() {
        Ok(descriptor) => descriptor,
        Err(err) => {
            eprintln!("error: invalid {ENV_VAR}: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = run(Args::parse(), descriptor) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}
