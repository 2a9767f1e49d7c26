//! stfl: command-line front end for the state engine.
//!
//! # Usage
//!
//! ```text
//! stfl get lights
//! stfl set lights '{"brightness": 40}'
//! stfl shell
//! ```

mod engine;
mod modules;
mod parse;
mod shell;

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use stateful_core::EngineConfig;
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::parse::{parse_args, Command, USAGE};


fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let cmd = match parse_args(&arg_refs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("stfl: {}", e);
            process::exit(1);
        }
    };

    if matches!(cmd, Command::Help) {
        println!("{}", USAGE);
        return;
    }

    let config_dir = resolve_config_dir();
    let config = match load_config(&config_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("stfl: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = execute(&config, cmd) {
        eprintln!("stfl error: {}", e);
        process::exit(1);
    }
}


fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}


fn resolve_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STFL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("stateful")
}


/// Read `engine.yaml` from the config dir. A relative `root_dir` is taken
/// relative to the config dir, which is created if needed.
fn load_config(config_dir: &Path) -> Result<EngineConfig, String> {
    let mut config =
        EngineConfig::load_or_default(&config_dir.join("engine.yaml")).map_err(|e| e.to_string())?;
    if config.root_dir.is_relative() {
        config.root_dir = config_dir.join(&config.root_dir);
    }
    std::fs::create_dir_all(&config.root_dir)
        .map_err(|e| format!("cannot create {}: {}", config.root_dir.display(), e))?;
    tracing::debug!(root = %config.root_dir.display(), delayed = config.delayed_writing, "config loaded");
    Ok(config)
}


fn execute(config: &EngineConfig, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Get { module } => {
            let engine = Engine::open(config, false).map_err(|e| e.to_string())?;
            println!("{}", engine.get(module)?);
        }
        Command::Set { module, json } => {
            // A one-shot process cannot wait for a commit, so write through.
            let engine = Engine::open(config, false).map_err(|e| e.to_string())?;
            let result = engine.set(module, &json, "cli")?;
            println!("{}", result);
        }
        Command::Shell => {
            let engine =
                Engine::open(config, config.delayed_writing).map_err(|e| e.to_string())?;
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            shell::run_shell(&engine, stdin.lock(), &mut stdout, "cli")
                .map_err(|e| e.to_string())?;
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}
