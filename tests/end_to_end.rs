use std::{
    fs, io,
    net::{Ipv4Addr, TcpListener},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::mpsc,
    thread,
};

use mch::{
    config::Config,
    descriptor::{Iteration, Mode, RunDescriptor, ENV_VAR},
    level::{self, LevelStorage},
    message::{self, Message},
    runs::{self, FailureKind, Launcher, Process, ServerLauncher},
    server::{Server, CHAIN_LENGTH_RULE},
};

const SERVER: &str = env!("CARGO_BIN_EXE_mch-server");

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn bench_pack(level: &Path) {
    let pack = level.join("datapacks/bench");
    write(&pack.join("pack.mcmeta"), r#"{"pack": {"pack_format": 15, "mch": true}}"#);
    write(
        &pack.join("data/b/functions/count.mcfunction"),
        "# @benchmark\nscoreboard players add n x 1\nscoreboard players add n x 1\n",
    );
    write(
        &pack.join("data/b/functions/deep.mcfunction"),
        &format!("# @benchmark\n{}", "scoreboard players add n x 1\n".repeat(20)),
    );
    write(
        &pack.join("data/b/functions/reset.mcfunction"),
        "scoreboard players set n x 0\n",
    );
    write(
        &pack.join("data/mch/tags/functions/setup.json"),
        r#"{"values": ["b:reset"]}"#,
    );
}

fn quick_config() -> Config {
    Config {
        warmup_iterations: 0,
        measurement_iterations: 2,
        time: 1,
        forks: 1,
        server: PathBuf::from(SERVER),
        ..Config::default()
    }
}

fn launcher(directory: &Path) -> ServerLauncher {
    ServerLauncher::new(PathBuf::from(SERVER), Vec::new(), directory.to_path_buf())
}

#[test]
fn parsing_and_execute_benchmarks_report_scores() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        parsing_benchmarks: vec!["say a,b".to_string()],
        execute_benchmarks: vec!["scoreboard players add n x 1".to_string()],
        ..quick_config()
    };
    config.validate(dir.path()).unwrap();

    let results = runs::execute_with(&config, dir.path(), &mut launcher(dir.path())).unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.failures.is_empty(), "{:?}", result.failures);
        assert_eq!(result.scores.len(), 2);
        assert!(result.scores.iter().all(|score| *score > 0.0));
    }
    assert_eq!(results[1].benchmark, "scoreboard players add n x 1");
    assert!(dir.path().join("world").join(level::FILE_NAME).exists());
}

#[test]
fn function_groups_run_after_the_baseline() {
    let dir = tempfile::tempdir().unwrap();
    bench_pack(&dir.path().join("world"));
    // Keep the group small so the test stays quick.
    fs::remove_file(dir.path().join("world/datapacks/bench/data/b/functions/deep.mcfunction")).unwrap();
    let config = Config {
        function_benchmarks: vec!["file/bench".to_string()],
        ..quick_config()
    };

    let results = runs::execute_with(&config, dir.path(), &mut launcher(dir.path())).unwrap();
    let names: Vec<(Option<&str>, &str)> = results
        .iter()
        .map(|result| (result.group.as_deref(), result.benchmark.as_str()))
        .collect();
    assert_eq!(names, [(None, "mch:baseline"), (Some("file/bench"), "b:count")]);
    for result in &results {
        assert_eq!(result.mode, Mode::Function);
        assert!(result.failures.is_empty(), "{:?}", result.failures);
        assert_eq!(result.scores.len(), 2);
    }

    // Every benchmark add-on is disabled again afterwards.
    let level = LevelStorage::load(&dir.path().join("world").join(level::FILE_NAME)).unwrap();
    assert_eq!(level.enabled(), ["vanilla"]);
    assert_eq!(level.disabled(), ["file/bench"]);
}

#[test]
fn validation_sets_up_every_group() {
    let dir = tempfile::tempdir().unwrap();
    bench_pack(&dir.path().join("world"));
    let config = Config {
        function_benchmarks: vec!["file/bench".to_string()],
        ..quick_config()
    };
    runs::validate_with(&config, dir.path(), &mut launcher(dir.path())).unwrap();
}

#[test]
fn malformed_descriptor_aborts_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let status = Command::new(SERVER)
        .current_dir(dir.path())
        .env(ENV_VAR, "iteration,true,false,0,5")
        .stdin(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(!dir.path().join("world").exists());
}

#[test]
fn silent_child_is_recorded_without_hanging() {
    struct Garbled(PathBuf);

    impl Launcher for Garbled {
        fn launch(&mut self, _: &RunDescriptor) -> io::Result<Box<dyn Process>> {
            let child = Command::new(SERVER)
                .current_dir(&self.0)
                .env(ENV_VAR, "iteration,true,false,0,5,1,1,0,not-a-port,0,execute,stop")
                .stdin(Stdio::null())
                .spawn()?;
            Ok(Box::new(child))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let result = runs::run_fork(&mut Garbled(dir.path().to_path_buf()), |_| RunDescriptor::Dry);
    assert_eq!(result, Err(FailureKind::NoResult { exit_code: Some(1) }));
}

#[test]
fn manual_start_under_a_small_budget_reports_budget_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let level_dir = dir.path().join("world");
    bench_pack(&level_dir);

    // First load creates the level; then shrink the chain budget below what one call of b:deep needs.
    drop(Server::open(&level_dir, None).unwrap());
    let level_path = level_dir.join(level::FILE_NAME);
    let mut level = LevelStorage::load(&level_path).unwrap();
    level.set_game_rule(CHAIN_LENGTH_RULE, "6").unwrap();
    level.save().unwrap();

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let descriptor = RunDescriptor::Iteration(Iteration {
        auto_start: false,
        last_iteration_in_group: false,
        warmup_iterations: 0,
        measurement_iterations: 2,
        window_seconds: 1,
        forks: 1,
        fork: 0,
        port,
        progress_percent: 0.0,
        mode: Mode::Function,
        benchmark: "b:deep".to_string(),
    });

    let (console, lines) = mpsc::channel();
    console.send("function mch:load".to_string()).unwrap();
    let server = thread::spawn(move || {
        let mut server = Server::open(&level_dir, Some(descriptor)).unwrap();
        server.attach_console(lines);
        server.serve();
        server.chain_limit()
    });

    let (stream, _) = listener.accept().unwrap();
    assert_eq!(message::receive(stream).unwrap(), Some(Message::BudgetExceeded));
    // The manual start never lifts the world's budget.
    assert_eq!(server.join().unwrap(), 6);
}
