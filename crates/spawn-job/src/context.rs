//! The per-node context threaded through every job's `work` call (§9 design
//! note: "back-references without ownership cycles" — jobs borrow the node,
//! they never own it).

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use spawn_comm::Comm;
use spawn_exec::ExecWorkerPool;
use spawn_net::Network;
use spawn_task::TaskPlugin;
use spawn_wire::{Envelope, Message, OptPool};

pub struct Context {
    pub here: u16,
    pub size: u16,
    pub tree_width: u16,
    pub parent_id: Option<u16>,
    /// The full, flat host list (§6 `Hosts` option, expanded). Every
    /// participant carries the same list; `REQUEST_BUILD_TREE` only ever
    /// needs to ship participant ids because `all_hosts[id]` recovers
    /// the hostname for any id (ids are dense indices into this same list,
    /// §4.6; the root's own entry at index 0 goes unused).
    pub all_hosts: Vec<String>,
    /// The resolved configuration, carried as an option pool and forwarded
    /// unchanged in every `RESPONSE_JOIN` (§4.9) so a freshly spawned agent
    /// recovers the same `Hosts`/`TreeWidth`/`TaskPlugin`/`TaskArgv` the
    /// root started with, without re-reading any option file of its own.
    pub opts: OptPool,
    pub network: Arc<Network>,
    pub comm: Arc<Comm>,
    pub exec_pool: Arc<ExecWorkerPool>,
    pub task_plugin: Arc<dyn TaskPlugin>,
    pub task_argv: Vec<String>,
    pub agent_exe: PathBuf,
    /// Set for the lifetime of the dedicated task thread (§5: "per running
    /// task, one task thread"), so the Exit job can hold off sending
    /// `RESPONSE_EXIT` until any in-flight task has actually finished
    /// (§8 scenario 6: "runs any pending Task to completion").
    pub active_task: Arc<AtomicBool>,
}

impl Context {
    pub fn is_root(&self) -> bool {
        self.here == 0
    }

    /// Frames and enqueues `message` addressed to `dst` on the send queue.
    /// A full send queue surfaces as [`spawn_error::Error::NoMem`] (§7).
    pub fn send(&self, dst: u16, channel: u16, message: &Message) -> spawn_error::Result<()> {
        let envelope = Envelope::unicast(self.here, dst, channel);
        let buf = spawn_wire::pack(&envelope, message)?;
        self.comm.sendq().enqueue(self.comm.pool().adopt(buf))
    }

    /// Frames and enqueues a broadcast.
    pub fn broadcast(&self, channel: u16, message: &Message) -> spawn_error::Result<()> {
        let envelope = Envelope::broadcast(self.here, channel);
        let buf = spawn_wire::pack(&envelope, message)?;
        self.comm.sendq().enqueue(self.comm.pool().adopt(buf))
    }
}

/// Test-only helper for building a [`Context`] without a live overlay: a real
/// `Network`/`Comm`/`ExecWorkerPool` pair so `ctx.send`/`ctx.broadcast`
/// enqueue successfully, but with no ports or listeners registered, so no
/// bytes actually cross any socket.
#[cfg(test)]
pub(crate) fn test_context(here: u16, size: u16, parent_id: Option<u16>) -> Context {
    use spawn_bytes::BufferPool;
    use spawn_exec::{ExecPlugin, ExecWorkerPool};
    use spawn_task::NoopTask;

    struct NeverExec;
    impl ExecPlugin for NeverExec {
        fn exec(&self, _host: &str, _argv: &[String]) -> i32 {
            0
        }
    }

    let network = Arc::new(Network::new(here));
    network.lock().resize_lft(size as usize);
    let pool = BufferPool::new(4, spawn_bytes::DEFAULT_CAPACITY);
    let comm = Arc::new(Comm::new(network.clone(), pool, 16, 16));
    comm.start_processing().expect("comm thread starts on a context built for tests");
    let exec_pool = Arc::new(ExecWorkerPool::start(1, Arc::new(NeverExec)).expect("exec pool starts for tests"));

    Context {
        here,
        size,
        tree_width: 2,
        parent_id,
        all_hosts: (1..size).map(|id| format!("h{id}")).collect(),
        opts: OptPool::new(),
        network,
        comm,
        exec_pool,
        task_plugin: Arc::new(NoopTask),
        task_argv: Vec::new(),
        agent_exe: PathBuf::from("/usr/bin/spawn"),
        active_task: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    }
}
