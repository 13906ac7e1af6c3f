//! The root's entry point (§10.5): the only participant invoked with
//! configuration options rather than the fixed five-argument agent shape.

use std::path::PathBuf;
use std::sync::Arc;

use spawn_bytes::BufferPool;
use spawn_comm::Comm;
use spawn_config::Config;
use spawn_error::{Error, Result};
use spawn_exec::{ExecWorkerPool, LocalExecPlugin};
use spawn_net::Network;
use spawn_wire::OptPool;

use crate::build_tree::BuildTreeJob;
use crate::context::Context;
use crate::job::{Job, JobEngine};
use crate::mainloop;
use crate::plugins::select_task_plugin;

/// Initial per-queue capacity; grows are not needed at this scale but the
/// buffer pool itself still doubles under sustained pressure (§4.2).
const QUEUE_CAPACITY: usize = 256;
const INITIAL_BUFFER_COUNT: usize = 16;

pub fn root_main(config: Config, agent_exe: PathBuf) -> Result<()> {
    let all_hosts = config.hosts()?;
    let size = all_hosts.len() as u16;
    if size == 0 {
        return Err(Error::Invalid("Hosts expands to zero participants".into()));
    }
    let tree_width = config.tree_width()?;
    let fanout = config.fanout()?;
    // Only the `local` exec plugin is implemented (§1); the option is still
    // required so an operator's config that forgets it fails fast, matching
    // the source's root-side requirement (§6).
    config.exec_plugin_path()?;
    let task_plugin_path = config.task_plugin_path()?;
    let task_plugin = select_task_plugin(&task_plugin_path);
    let task_argv = config.task_argv();

    let mut opts = OptPool::new();
    opts.set("Hosts", all_hosts.join(","));
    opts.set("TreeWidth", tree_width.to_string());
    opts.set("Fanout", fanout.to_string());
    opts.set("TaskPlugin", task_plugin_path.to_string_lossy().into_owned());
    opts.set("TaskArgv", task_argv.join(" "));
    opts.set("WatchdogTimeout", config.watchdog_timeout()?.as_secs().to_string());

    let network = Arc::new(Network::new(0));
    network.lock().resize_lft(size as usize);

    let pool = BufferPool::new(INITIAL_BUFFER_COUNT, spawn_bytes::DEFAULT_CAPACITY);
    let comm = Arc::new(Comm::new(network.clone(), pool, QUEUE_CAPACITY, QUEUE_CAPACITY));
    comm.start_processing()?;

    let exec_pool = Arc::new(ExecWorkerPool::start(fanout, Arc::new(LocalExecPlugin))?);

    let ctx = Context {
        here: 0,
        size,
        tree_width,
        parent_id: None,
        all_hosts: all_hosts.clone(),
        opts,
        network,
        comm,
        exec_pool,
        task_plugin,
        task_argv,
        agent_exe,
        active_task: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    };

    let mut jobs = JobEngine::new();
    let ids: Vec<u16> = (1..size).collect();
    jobs.push(Job::BuildTree(BuildTreeJob::new(0, &ids, &ctx.all_hosts, tree_width)));

    mainloop::run(&ctx, &mut jobs)
}
