//! Option-file and argv parsing (§6, §10.3): a file of `Key=Value` lines,
//! overridden by `-o Key=Value` arguments on argv up to a literal `--`, with
//! typed accessors for the options the launcher recognizes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use spawn_error::{Error, Result};
use spawn_wire::OptPool;

use crate::hostlist;

const DEFAULT_TREE_WIDTH: u16 = 4;
const DEFAULT_BACKLOG: u32 = 128;
const DEFAULT_WATCHDOG_TIMEOUT_SECS: u64 = 10;

/// The launcher's resolved configuration: an [`OptPool`] plus any argv
/// tokens captured after `--` (used as `TaskArgv` when that key is absent).
pub struct Config {
    opts: OptPool,
    trailing_argv: Vec<String>,
}

fn cli() -> Command {
    Command::new("spawn")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("opt").short('o').action(ArgAction::Append).value_name("Key=Value"))
        .arg(Arg::new("rest").trailing_var_arg(true).num_args(0..).allow_hyphen_values(true))
}

impl Config {
    /// Loads options from an optional file, then applies `-o Key=Value`
    /// overrides parsed out of `argv` (argv[0] excluded).
    pub fn load(option_file: Option<&Path>, argv: &[String]) -> Result<Self> {
        let mut opts = match option_file {
            Some(path) => load_option_file(path)?,
            None => OptPool::new(),
        };

        let matches = cli()
            .try_get_matches_from(std::iter::once("spawn".to_string()).chain(argv.iter().cloned()))
            .map_err(|e| Error::Invalid(format!("argv parse error: {e}")))?;

        if let Some(values) = matches.get_many::<String>("opt") {
            for raw in values {
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| Error::Invalid(format!("-o argument {raw:?} is not Key=Value")))?;
                opts.set(key, value);
            }
        }

        let trailing_argv = matches
            .get_many::<String>("rest")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Ok(Config { opts, trailing_argv })
    }

    pub fn opts(&self) -> &OptPool {
        &self.opts
    }

    /// The `Hosts` option, expanded from its compressed form. Required.
    pub fn hosts(&self) -> Result<Vec<String>> {
        let raw = self.opts.get("Hosts").ok_or_else(|| Error::Invalid("missing required option Hosts".into()))?;
        hostlist::expand(raw)
    }

    pub fn tree_width(&self) -> Result<u16> {
        match self.opts.get("TreeWidth") {
            Some(raw) => raw.parse().map_err(|_| Error::Invalid(format!("TreeWidth {raw:?} is not a u16"))),
            None => Ok(DEFAULT_TREE_WIDTH),
        }
    }

    /// Parallelism used while spawning; defaults to [`Self::tree_width`].
    pub fn fanout(&self) -> Result<usize> {
        match self.opts.get("Fanout") {
            Some(raw) => raw.parse().map_err(|_| Error::Invalid(format!("Fanout {raw:?} is not a usize"))),
            None => Ok(self.tree_width()? as usize),
        }
    }

    pub fn backlog(&self) -> Result<u32> {
        match self.opts.get("TreeSockBacklog") {
            Some(raw) => raw.parse().map_err(|_| Error::Invalid(format!("TreeSockBacklog {raw:?} is not a u32"))),
            None => Ok(DEFAULT_BACKLOG),
        }
    }

    pub fn watchdog_timeout(&self) -> Result<Duration> {
        match self.opts.get("WatchdogTimeout") {
            Some(raw) => {
                let secs: u64 =
                    raw.parse().map_err(|_| Error::Invalid(format!("WatchdogTimeout {raw:?} is not a u64")))?;
                Ok(Duration::from_secs(secs))
            }
            None => Ok(Duration::from_secs(DEFAULT_WATCHDOG_TIMEOUT_SECS)),
        }
    }

    /// Required on the root (§6); absence is only an error once the caller
    /// actually needs the path (the root checks it, agents never do).
    pub fn exec_plugin_path(&self) -> Result<PathBuf> {
        self.opts
            .get("ExecPlugin")
            .map(PathBuf::from)
            .ok_or_else(|| Error::Invalid("missing required option ExecPlugin".into()))
    }

    /// Required everywhere a task will run.
    pub fn task_plugin_path(&self) -> Result<PathBuf> {
        self.opts
            .get("TaskPlugin")
            .map(PathBuf::from)
            .ok_or_else(|| Error::Invalid("missing required option TaskPlugin".into()))
    }

    /// Whitespace-separated argv for the task, from the `TaskArgv` option if
    /// present, else from anything captured after `--` on the command line.
    pub fn task_argv(&self) -> Vec<String> {
        match self.opts.get("TaskArgv") {
            Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
            None => self.trailing_argv.clone(),
        }
    }
}

fn load_option_file(path: &Path) -> Result<OptPool> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(format!("reading option file {path:?}"), e))?;
    let mut opts = OptPool::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::Invalid(format!("{}:{}: expected Key=Value", path.display(), lineno + 1)))?;
        opts.set(key.trim(), value.trim());
    }
    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_overrides_win_over_file() {
        let tmp = std::env::temp_dir().join(format!("spawn-config-test-{}.opts", std::process::id()));
        std::fs::write(&tmp, "Hosts=a01\nTreeWidth=2\n").unwrap();

        let argv = vec!["-o".to_string(), "TreeWidth=8".to_string()];
        let config = Config::load(Some(&tmp), &argv).unwrap();
        assert_eq!(config.hosts().unwrap(), vec!["a01"]);
        assert_eq!(config.tree_width().unwrap(), 8);

        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn fanout_defaults_to_tree_width() {
        let config = Config::load(None, &["-o".to_string(), "TreeWidth=6".to_string()]).unwrap();
        assert_eq!(config.fanout().unwrap(), 6);
    }

    #[test]
    fn missing_required_option_is_invalid() {
        let config = Config::load(None, &[]).unwrap();
        assert!(config.hosts().is_err());
        assert!(config.exec_plugin_path().is_err());
    }

    #[test]
    fn trailing_argv_feeds_task_argv_when_no_explicit_option() {
        let argv = vec!["--".to_string(), "--flag".to_string(), "value".to_string()];
        let config = Config::load(None, &argv).unwrap();
        assert_eq!(config.task_argv(), vec!["--flag", "value"]);
    }
}
