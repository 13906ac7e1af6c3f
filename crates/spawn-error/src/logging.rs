//! Structured logging setup.
//!
//! Renders every line as `ISO8601.usec [pid,tid] (target, file:line): level: msg`,
//! the format mandated by the source's error/warning/log output. Call [`init`]
//! once, early in `main`.

use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

/// Returns the OS thread id on Linux, falling back to a debug-formatted
/// [`std::thread::ThreadId`] elsewhere. `std` has no portable "tid" accessor.
fn tid() -> u64 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid() takes no arguments and has no preconditions.
        unsafe { libc::syscall(libc::SYS_gettid) as u64 }
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish()
    }
}

/// Installs the process-wide logger. `default_level` is used unless overridden
/// by the `RUST_LOG` environment variable, matching `env_logger` convention.
pub fn init(default_level: LevelFilter) {
    let pid = std::process::id();

    let mut builder = Builder::new();
    builder.filter_level(default_level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.format(move |buf, record| {
        let now = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
        let target = record.target();
        let file = record.file().unwrap_or("?");
        let line = record.line().unwrap_or(0);
        writeln!(
            buf,
            "{now} [{pid},{tid}] ({target}, {file}:{line}): {level}: {args}",
            now = now,
            pid = pid,
            tid = tid(),
            target = target,
            file = file,
            line = line,
            level = record.level(),
            args = record.args(),
        )
    });
    let _ = builder.try_init();
}
