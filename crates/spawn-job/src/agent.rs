//! The spawned-agent entry point (§10.5, §6): parses the fixed five-argument
//! invocation shape is done by the caller; this module runs the join
//! handshake (C9) against the parent, recovers configuration from the
//! option pool `RESPONSE_JOIN` carries, and then enters the same main loop
//! the root runs.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use spawn_bytes::BufferPool;
use spawn_comm::Comm;
use spawn_error::{Error, Result};
use spawn_exec::{ExecWorkerPool, LocalExecPlugin};
use spawn_net::Network;

use crate::context::Context;
use crate::job::JobEngine;
use crate::join;
use crate::mainloop;
use crate::plugins::select_task_plugin;

const QUEUE_CAPACITY: usize = 256;
const INITIAL_BUFFER_COUNT: usize = 16;

/// `parent_id`/`here`/`size` come straight from the agent-invocation argv
/// (§6); everything else rides down in the join handshake's option pool.
pub fn agent_main(
    parent_ip: Ipv4Addr,
    parent_port: u16,
    parent_id: u16,
    size: u16,
    here: u16,
    agent_exe: PathBuf,
) -> Result<()> {
    let network = Network::new(here);
    let opts = join::run(parent_ip, parent_port, here, size, &network)?;
    let network = Arc::new(network);

    let all_hosts: Vec<String> = opts
        .get("Hosts")
        .ok_or_else(|| Error::Malformed("RESPONSE_JOIN opts missing Hosts".into()))?
        .split(',')
        .map(str::to_string)
        .collect();
    let tree_width: u16 = opts
        .get("TreeWidth")
        .ok_or_else(|| Error::Malformed("RESPONSE_JOIN opts missing TreeWidth".into()))?
        .parse()
        .map_err(|_| Error::Malformed("RESPONSE_JOIN opts TreeWidth is not a u16".into()))?;
    let fanout: usize = opts
        .get("Fanout")
        .ok_or_else(|| Error::Malformed("RESPONSE_JOIN opts missing Fanout".into()))?
        .parse()
        .map_err(|_| Error::Malformed("RESPONSE_JOIN opts Fanout is not a usize".into()))?;
    let task_plugin_path = PathBuf::from(
        opts.get("TaskPlugin").ok_or_else(|| Error::Malformed("RESPONSE_JOIN opts missing TaskPlugin".into()))?,
    );
    let task_argv: Vec<String> =
        opts.get("TaskArgv").map(|raw| raw.split_whitespace().map(str::to_string).collect()).unwrap_or_default();
    let _watchdog_timeout: Duration = opts
        .get("WatchdogTimeout")
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(10));

    let pool = BufferPool::new(INITIAL_BUFFER_COUNT, spawn_bytes::DEFAULT_CAPACITY);
    let comm = Arc::new(Comm::new(network.clone(), pool, QUEUE_CAPACITY, QUEUE_CAPACITY));
    comm.start_processing()?;

    let exec_pool = Arc::new(ExecWorkerPool::start(fanout, Arc::new(LocalExecPlugin))?);
    let task_plugin = select_task_plugin(&task_plugin_path);

    let ctx = Context {
        here,
        size,
        tree_width,
        parent_id: Some(parent_id),
        all_hosts,
        opts,
        network,
        comm,
        exec_pool,
        task_plugin,
        task_argv,
        agent_exe,
        active_task: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    };

    // No job is seeded here: a leaf's BuildTree phase completes on its
    // parent without ever sending it a REQUEST_BUILD_TREE (§4.6 "zero-subtree
    // children skip directly to Ready"); an interior node instead gets its
    // BuildTree job from `dispatch`'s REQUEST_BUILD_TREE handler.
    let mut jobs = JobEngine::new();
    mainloop::run(&ctx, &mut jobs)
}
