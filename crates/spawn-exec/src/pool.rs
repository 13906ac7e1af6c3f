//! The bounded worker pool (C7): O(k) threads sharing one work queue, used
//! by the root so launching children never blocks the main loop on a slow
//! `ssh`/`srun` startup (§4.7).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use spawn_error::{Error, Result};

use crate::plugin::ExecPlugin;

/// Workers observe `done` within this interval (§4.7: "≈1 ms").
const WAKE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct ExecWorkItem {
    pub host: String,
    pub argv: Vec<String>,
    pub requester_id: u16,
}

struct Shared {
    queue: Mutex<VecDeque<ExecWorkItem>>,
    cond: Condvar,
    done: AtomicBool,
}

/// A fixed-size pool of threads serially invoking [`ExecPlugin::exec`] for
/// queued [`ExecWorkItem`]s. Completion order across items is unspecified
/// (§4.7).
pub struct ExecWorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl ExecWorkerPool {
    /// Spawns `nworkers` threads (typically the configured tree width),
    /// each invoking `plugin.exec` for items pulled off the shared queue.
    pub fn start(nworkers: usize, plugin: Arc<dyn ExecPlugin>) -> Result<Self> {
        let nworkers = nworkers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            done: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(nworkers);
        for idx in 0..nworkers {
            let shared = shared.clone();
            let plugin = plugin.clone();
            let handle = std::thread::Builder::new()
                .name(format!("spawn:exec-{idx}"))
                .spawn(move || worker_loop(shared, plugin))
                .map_err(|e| Error::io("spawning exec worker thread", e))?;
            threads.push(handle);
        }

        Ok(ExecWorkerPool { shared, threads })
    }

    /// Enqueues a host to launch. Never blocks.
    pub fn submit(&self, item: ExecWorkItem) {
        self.shared.queue.lock().push_back(item);
        self.shared.cond.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Signals every worker to stop after its current item and joins them.
    pub fn shutdown(mut self) {
        self.shared.done.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, plugin: Arc<dyn ExecPlugin>) {
    loop {
        let item = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(item) = queue.pop_front() {
                    break Some(item);
                }
                if shared.done.load(Ordering::Acquire) {
                    break None;
                }
                shared.cond.wait_for(&mut queue, WAKE_INTERVAL);
                if shared.done.load(Ordering::Acquire) && queue.is_empty() {
                    break None;
                }
            }
        };

        let Some(item) = item else { return };
        let rc = plugin.exec(&item.host, &item.argv);
        if rc != 0 {
            log::warn!(
                "exec of host {} (requested by participant {}) returned {}",
                item.host,
                item.requester_id,
                rc
            );
        }
    }
}
