//! The build-tree job (C6, §4.6): per-child state machine that launches,
//! awaits join, and forwards each child its own sub-slice of the host list.
//!
//! `REQUEST_BUILD_TREE` only ships participant ids, not hostnames (§4.1);
//! every node independently resolves `all_hosts[id]` because ids are dense
//! indices into that same global list (§4.6 "contiguous DFS numbering") --
//! participant 0's own entry is present but unused, since the root never
//! execs itself -- and the global list itself rides down to every
//! participant inside `RESPONSE_JOIN`'s option pool (§4.9, §10.3).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use spawn_error::{Error, Result};
use spawn_exec::ExecWorkItem;
use spawn_net::TcpListener;
use spawn_wire::Message;

use crate::channels::CONTROL_CHANNEL;
use crate::context::Context;
use crate::job::{Advance, Job};
use crate::task::TaskJob;

/// Default per-child join timeout (§4.6: "default 60s").
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildState {
    Unborn,
    Unknown,
    Alive,
    Dead,
    Ready,
}

struct ChildSlot {
    id: u16,
    host: String,
    /// Participant ids of this child's own subtree (i.e. this child's id
    /// range minus the child's own first id), handed down in a
    /// `REQUEST_BUILD_TREE` once the child joins.
    subtree: Vec<u16>,
    state: ChildState,
    spawned_at: Instant,
    build_tree_sent: bool,
}

#[derive(PartialEq, Eq)]
enum Phase {
    Setup,
    AwaitJoin,
    AwaitReady,
}

/// Drives this node through launching its direct children, waiting for them
/// to join and build their own subtrees, and reporting back to the parent.
pub struct BuildTreeJob {
    here: u16,
    children: Vec<ChildSlot>,
    phase: Phase,
    deads: u32,
    join_timeout: Duration,
}

impl BuildTreeJob {
    /// `ids` is this node's own subtree, in DFS order: `ids[0]` is the first
    /// direct child's id, and so on. `all_hosts` is the global, flat host
    /// list; `all_hosts[id]` is the hostname for participant `id`.
    pub fn new(here: u16, ids: &[u16], all_hosts: &[String], tree_width: u16) -> Self {
        let h = ids.len();
        let nchildren = (tree_width as usize).min(h);
        let mut children = Vec::with_capacity(nchildren);

        if nchildren > 0 {
            let q = h / nchildren;
            let mut start = 0usize;
            for i in 0..nchildren {
                let end = if i == nchildren - 1 { h } else { start + q };
                let slice = &ids[start..end];
                let child_id = slice[0];
                let host = all_hosts.get(child_id as usize).cloned().unwrap_or_else(|| {
                    log::warn!("no hostname on record for participant {child_id}; falling back to its id");
                    child_id.to_string()
                });
                children.push(ChildSlot {
                    id: child_id,
                    host,
                    subtree: slice[1..].to_vec(),
                    state: ChildState::Unborn,
                    spawned_at: Instant::now(),
                    build_tree_sent: false,
                });
                start = end;
            }
        }

        BuildTreeJob { here, children, phase: Phase::Setup, deads: 0, join_timeout: DEFAULT_JOIN_TIMEOUT }
    }

    pub fn work(&mut self, ctx: &Context) -> Result<Advance> {
        match self.phase {
            Phase::Setup => self.setup(ctx),
            Phase::AwaitJoin => self.await_join(ctx),
            Phase::AwaitReady => self.await_ready(ctx),
        }
    }

    fn setup(&mut self, ctx: &Context) -> Result<Advance> {
        if self.children.is_empty() {
            self.phase = Phase::AwaitReady;
            return self.await_ready(ctx);
        }

        // Bind one shared listening endpoint for every child to connect back
        // to. Host/interface discovery is out of scope (§1); loopback is the
        // only address guaranteed reachable by the reference `local` exec
        // plugin this crate ships for tests and demos.
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).map_err(|e| Error::io("binding child listener", e))?;
        let local_addr = listener.local_addr().map_err(|e| Error::io("reading listener local address", e))?;

        ctx.comm.stop_processing();
        ctx.network.lock().add_listener(listener);
        ctx.comm.resume_processing();

        for child in &mut self.children {
            let argv = vec![
                ctx.agent_exe.to_string_lossy().into_owned(),
                local_addr.ip().to_string(),
                local_addr.port().to_string(),
                self.here.to_string(),
                ctx.size.to_string(),
                child.id.to_string(),
            ];
            ctx.exec_pool.submit(ExecWorkItem { host: child.host.clone(), argv, requester_id: self.here });
            child.state = ChildState::Unknown;
            child.spawned_at = Instant::now();
        }

        self.phase = Phase::AwaitJoin;
        Ok(Advance::Pending)
    }

    fn await_join(&mut self, ctx: &Context) -> Result<Advance> {
        for child in &mut self.children {
            if child.state == ChildState::Unknown && child.spawned_at.elapsed() > self.join_timeout {
                log::warn!(
                    "child {} (host {}) did not join within {:?}; marking dead",
                    child.id,
                    child.host,
                    self.join_timeout
                );
                child.state = ChildState::Dead;
                self.deads += 1;
            }
            if child.state == ChildState::Alive && !child.build_tree_sent {
                if child.subtree.is_empty() {
                    child.state = ChildState::Ready;
                } else {
                    let hosts: Vec<i32> = child.subtree.iter().map(|&id| id as i32).collect();
                    ctx.send(child.id, CONTROL_CHANNEL, &Message::RequestBuildTree { hosts })?;
                    child.build_tree_sent = true;
                }
            }
        }

        if self.children.iter().all(|c| matches!(c.state, ChildState::Ready | ChildState::Dead)) {
            self.phase = Phase::AwaitReady;
            return self.await_ready(ctx);
        }
        Ok(Advance::Pending)
    }

    fn await_ready(&mut self, ctx: &Context) -> Result<Advance> {
        if !self.children.iter().all(|c| matches!(c.state, ChildState::Ready | ChildState::Dead)) {
            return Ok(Advance::Pending);
        }

        if self.deads > 0 {
            log::warn!("build-tree on participant {} completed with {} dead child subtree(s)", self.here, self.deads);
        }

        if let Some(parent) = ctx.parent_id {
            ctx.send(parent, CONTROL_CHANNEL, &Message::ResponseBuildTree { deads: self.deads })?;
        }

        let spawned = if ctx.is_root() { vec![Job::Task(TaskJob::new_root(ctx.task_argv.clone()))] } else { Vec::new() };
        Ok(Advance::Completed { spawned })
    }

    /// Marks the child whose participant id is `src` Alive and installs its
    /// LFT route, in response to its `REQUEST_JOIN` (§4.8). Returns whether
    /// this job claimed the event.
    pub fn on_request_join(&mut self, ctx: &Context, src: u16, port: usize) -> Result<bool> {
        let Some(child) = self.children.iter_mut().find(|c| c.id == src) else {
            return Ok(false);
        };
        if child.state != ChildState::Unknown {
            return Err(Error::Fault(format!(
                "REQUEST_JOIN from participant {src} while its build-tree state was not Unknown"
            )));
        }
        child.state = ChildState::Alive;
        ctx.network.lock().modify_lft(port, &[src]);
        Ok(true)
    }

    /// Folds a child's reported `deads` into this node's own count and marks
    /// it Ready, in response to its `RESPONSE_BUILD_TREE` (§4.6 phase 3).
    pub fn on_response_build_tree(&mut self, src: u16, deads: u32) -> bool {
        let Some(child) = self.children.iter_mut().find(|c| c.id == src) else {
            return false;
        };
        if child.state == ChildState::Alive {
            child.state = ChildState::Ready;
            self.deads += deads;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    fn hosts(n: u16) -> Vec<String> {
        (0..n).map(|i| format!("H{i}")).collect()
    }

    #[test]
    fn five_host_k2_splits_children_at_ids_1_and_3_with_subtrees_h2_and_h4() {
        // §8 scenario 2.
        let all_hosts = hosts(5);
        let ids: Vec<u16> = (1..5).collect();
        let job = BuildTreeJob::new(0, &ids, &all_hosts, 2);
        assert_eq!(job.children.len(), 2);
        assert_eq!(job.children[0].id, 1);
        assert_eq!(job.children[0].host, "H1");
        assert_eq!(job.children[0].subtree, vec![2]);
        assert_eq!(job.children[1].id, 3);
        assert_eq!(job.children[1].host, "H3");
        assert_eq!(job.children[1].subtree, vec![4]);
    }

    #[test]
    fn two_host_tree_has_a_single_childless_child() {
        // §8 scenario 1.
        let all_hosts = hosts(2);
        let ids: Vec<u16> = (1..2).collect();
        let job = BuildTreeJob::new(0, &ids, &all_hosts, 1);
        assert_eq!(job.children.len(), 1);
        assert_eq!(job.children[0].id, 1);
        assert_eq!(job.children[0].host, "H1");
        assert!(job.children[0].subtree.is_empty());
    }

    #[test]
    fn last_child_absorbs_the_remainder_of_an_uneven_split() {
        let all_hosts = hosts(8);
        let ids: Vec<u16> = (1..8).collect(); // 7 ids, 3 children -> 2,2,3
        let job = BuildTreeJob::new(0, &ids, &all_hosts, 3);
        assert_eq!(job.children.len(), 3);
        assert_eq!(job.children[0].subtree.len(), 1);
        assert_eq!(job.children[1].subtree.len(), 1);
        assert_eq!(job.children[2].subtree.len(), 2, "the last child absorbs the remainder");
    }

    #[test]
    fn zero_subtree_children_skip_straight_to_ready_and_complete_immediately() {
        let ctx = test_context(0, 1, None);
        let mut job = BuildTreeJob::new(0, &[], &[], 2);
        let advance = job.work(&ctx).unwrap();
        match advance {
            Advance::Completed { spawned } => {
                assert_eq!(spawned.len(), 1, "root spawns the initial Task job on completion");
            }
            Advance::Pending => panic!("a build-tree job with no children should complete on its first tick"),
        }
    }

    #[test]
    fn response_build_tree_folds_deads_and_marks_the_child_ready() {
        let all_hosts = hosts(3);
        let ids: Vec<u16> = vec![1, 2];
        let mut job = BuildTreeJob::new(0, &ids, &all_hosts, 2);
        job.children[0].state = ChildState::Alive;
        job.children[1].state = ChildState::Alive;

        assert!(job.on_response_build_tree(1, 2));
        assert!(job.on_response_build_tree(2, 0));
        assert_eq!(job.deads, 2);
        assert!(job.children.iter().all(|c| c.state == ChildState::Ready));
    }

    #[test]
    fn request_join_installs_the_lft_route_and_marks_the_child_alive() {
        let ctx = test_context(0, 3, None);
        let all_hosts = hosts(3);
        let ids: Vec<u16> = vec![1, 2];
        let mut job = BuildTreeJob::new(0, &ids, &all_hosts, 2);
        job.setup(&ctx).unwrap();
        assert!(job.children.iter().all(|c| c.state == ChildState::Unknown));

        assert!(job.on_request_join(&ctx, 1, 0).unwrap());
        assert_eq!(job.children[0].state, ChildState::Alive);
        assert_eq!(ctx.network.lock().lft_lookup(1), Some(0));
    }

    #[test]
    fn a_second_join_from_the_same_child_is_a_fault() {
        let ctx = test_context(0, 2, None);
        let all_hosts = hosts(2);
        let ids: Vec<u16> = vec![1];
        let mut job = BuildTreeJob::new(0, &ids, &all_hosts, 1);
        job.setup(&ctx).unwrap();
        assert!(job.on_request_join(&ctx, 1, 0).unwrap());
        assert!(job.on_request_join(&ctx, 1, 0).is_err(), "child was no longer Unknown");
    }
}
