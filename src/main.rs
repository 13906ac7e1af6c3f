//! CLI entry point (§10.5): a single binary plays either role. Invoked with
//! exactly five bare positional arguments it is a spawned agent (§6); any
//! other shape is the root, which parses `-o Key=Value` configuration
//! options (optionally preceded by an option-file path) and `--`-trailing
//! task argv.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use log::LevelFilter;
use spawn_config::Config;
use spawn_error::{Error, Result};

fn main() {
    spawn_error::logging::init(LevelFilter::Info);

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args[1..]) {
        log::error!("fatal: {e}");
        eprintln!("spawn: {e}");
        std::process::exit(1);
    }
}

fn run(argv: &[String]) -> Result<()> {
    let agent_exe = std::env::current_exe().map_err(|e| Error::io("resolving own executable path", e))?;

    if looks_like_agent_invocation(argv) {
        run_agent(argv, agent_exe)
    } else {
        run_root(argv, agent_exe)
    }
}

/// The agent-invocation shape (§6) is exactly five positional arguments,
/// none of them looking like an option flag.
fn looks_like_agent_invocation(argv: &[String]) -> bool {
    argv.len() == 5 && argv.iter().all(|a| !a.starts_with('-'))
}

fn run_agent(argv: &[String], agent_exe: PathBuf) -> Result<()> {
    let parent_ip: Ipv4Addr =
        argv[0].parse().map_err(|_| Error::Invalid(format!("invalid parent ip {:?}", argv[0])))?;
    let parent_port: u16 =
        argv[1].parse().map_err(|_| Error::Invalid(format!("invalid parent port {:?}", argv[1])))?;
    let parent_id: u16 = argv[2].parse().map_err(|_| Error::Invalid(format!("invalid parent id {:?}", argv[2])))?;
    let size: u16 = argv[3].parse().map_err(|_| Error::Invalid(format!("invalid total size {:?}", argv[3])))?;
    let here: u16 = argv[4].parse().map_err(|_| Error::Invalid(format!("invalid child id {:?}", argv[4])))?;

    if size == 0 {
        return Err(Error::Invalid("total size must be nonzero".into()));
    }
    if here == 0 {
        return Err(Error::Invalid("child id must be nonzero".into()));
    }

    spawn_job::agent_main(parent_ip, parent_port, parent_id, size, here, agent_exe)
}

fn run_root(argv: &[String], agent_exe: PathBuf) -> Result<()> {
    let (option_file, rest) = split_leading_option_file(argv);
    let config = Config::load(option_file.as_deref(), &rest)?;
    spawn_job::root_main(config, agent_exe)
}

/// A bare leading token (not `-o`, not `--`) is the option-file path;
/// everything else is handed to [`Config::load`] as-is (§10.3).
fn split_leading_option_file(argv: &[String]) -> (Option<PathBuf>, Vec<String>) {
    match argv.first() {
        Some(first) if !first.starts_with('-') => (Some(PathBuf::from(first)), argv[1..].to_vec()),
        _ => (None, argv.to_vec()),
    }
}
