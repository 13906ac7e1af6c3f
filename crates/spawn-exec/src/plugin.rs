//! The remote-launch plugin contract (§6): out of scope to implement for
//! real (ssh/slurm), but its shape is part of this crate's surface so C7 can
//! be exercised without one.

/// Launches `argv` on `host`, returning 0 on success (mirrors the source's
/// `fork`+`execve`+`waitpid` convention, collapsed to a single return code).
pub trait ExecPlugin: Send + Sync {
    fn exec(&self, host: &str, argv: &[String]) -> i32;
}

/// A reference implementation that runs the command locally instead of on a
/// remote host, for tests and single-machine demos. `host` is accepted but
/// ignored; ssh/slurm plugins are out of scope (§1).
pub struct LocalExecPlugin;

impl ExecPlugin for LocalExecPlugin {
    fn exec(&self, _host: &str, argv: &[String]) -> i32 {
        let Some((program, rest)) = argv.split_first() else {
            log::warn!("exec requested with empty argv");
            return -1;
        };
        match std::process::Command::new(program).args(rest).status() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                log::warn!("local exec of {program:?} failed to start: {e}");
                -1
            }
        }
    }
}
