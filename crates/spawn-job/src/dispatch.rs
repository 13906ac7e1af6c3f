//! Main-loop message dispatch (C8, §4.8): routes a decoded frame to the job
//! engine by `header.type`.

use spawn_error::{fault, Result};
use spawn_wire::{Message, MessageHeader};

use crate::build_tree::BuildTreeJob;
use crate::channels::CONTROL_CHANNEL;
use crate::context::Context;
use crate::exit::ExitJob;
use crate::job::{Job, JobEngine};
use crate::task::TaskJob;

/// Dispatches one decoded frame. Returns once the frame has been fully
/// handled (state mutated and/or a reply enqueued); never blocks on the bus.
pub fn dispatch(ctx: &Context, jobs: &mut JobEngine, header: &MessageHeader, message: Message) -> Result<()> {
    match message {
        Message::RequestJoin { ip, port, .. } => on_request_join(ctx, jobs, header.src, ip, port as u16),

        // C9's join handshake is synchronous and completes entirely before
        // this node's own main loop starts, so a `RESPONSE_JOIN` can never
        // reach this dispatcher -- see `join::run`.
        Message::ResponseJoin { .. } => {
            log::warn!("unexpected RESPONSE_JOIN reached the main loop from participant {}", header.src);
            Ok(())
        }

        Message::Ping { .. } => {
            log::trace!("PING from participant {}", header.src);
            Ok(())
        }

        Message::RequestExec { host, argv } => {
            ctx.exec_pool.submit(spawn_exec::ExecWorkItem { host, argv, requester_id: header.src });
            Ok(())
        }

        Message::RequestBuildTree { hosts } => {
            let ids: Vec<u16> = hosts.iter().map(|&id| id as u16).collect();
            jobs.push(Job::BuildTree(BuildTreeJob::new(ctx.here, &ids, &ctx.all_hosts, ctx.tree_width)));
            Ok(())
        }

        Message::ResponseBuildTree { deads } => {
            for job in jobs.iter_mut() {
                if job.on_response_build_tree(header.src, deads) {
                    return Ok(());
                }
            }
            Err(fault!("RESPONSE_BUILD_TREE from participant {} matched no live BuildTree job", header.src))
        }

        Message::RequestTask { argv, .. } => {
            jobs.push(Job::Task(TaskJob::new_worker(header.src, argv)));
            Ok(())
        }

        Message::ResponseTask { ret } => {
            for job in jobs.iter_mut() {
                if job.on_response_task(header.src, ret) {
                    return Ok(());
                }
            }
            Err(fault!("RESPONSE_TASK from participant {} matched no live Task job", header.src))
        }

        Message::RequestExit { .. } => {
            jobs.push(Job::Exit(ExitJob::new_worker()));
            Ok(())
        }

        Message::ResponseExit => {
            for job in jobs.iter_mut() {
                if job.on_response_exit(header.src) {
                    return Ok(());
                }
            }
            Err(fault!("RESPONSE_EXIT from participant {} matched no live Exit job", header.src))
        }
    }
}

fn on_request_join(ctx: &Context, jobs: &mut JobEngine, src: u16, ip: u32, port: u16) -> Result<()> {
    let port_idx = match ctx.network.lock().find_port_by_peer(ip, port) {
        Some(idx) => idx,
        None => {
            return Err(fault!(
                "REQUEST_JOIN from participant {src} carried (ip, port) that matches no connected port"
            ));
        }
    };

    let mut claimed = false;
    for job in jobs.iter_mut() {
        if let Some(build_tree) = job.as_build_tree_mut() {
            if build_tree.on_request_join(ctx, src, port_idx)? {
                claimed = true;
                break;
            }
        }
    }
    if !claimed {
        return Err(fault!("REQUEST_JOIN from participant {src} matched no live BuildTree job"));
    }

    ctx.send(src, CONTROL_CHANNEL, &Message::ResponseJoin { addr: ip, opts: ctx.opts.clone() })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    fn header(src: u16, msg_type: u16) -> MessageHeader {
        MessageHeader { src, dst: 0, flags: 0, msg_type, channel: CONTROL_CHANNEL, payload_len: 1 }
    }

    #[test]
    fn request_build_tree_pushes_a_build_tree_job() {
        let ctx = test_context(1, 3, Some(0));
        let mut jobs = JobEngine::new();
        dispatch(&ctx, &mut jobs, &header(0, 0), Message::RequestBuildTree { hosts: vec![2] }).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs.iter_mut().next().unwrap(), Job::BuildTree(_)));
    }

    #[test]
    fn response_build_tree_with_no_matching_job_is_a_fault() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        let err = dispatch(&ctx, &mut jobs, &header(1, 0), Message::ResponseBuildTree { deads: 0 });
        assert!(err.is_err());
    }

    #[test]
    fn response_build_tree_routes_to_the_matching_job() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        jobs.push(Job::BuildTree(BuildTreeJob::new(0, &[1, 2], &["h0".into(), "h1".into(), "h2".into()], 2)));
        // Drive the job to AwaitJoin and mark child 1 Alive so it accepts a
        // RESPONSE_BUILD_TREE.
        jobs.iter_mut().next().unwrap().as_build_tree_mut().unwrap().work(&ctx).unwrap();
        jobs.iter_mut().next().unwrap().as_build_tree_mut().unwrap().on_request_join(&ctx, 1, 0).unwrap();

        dispatch(&ctx, &mut jobs, &header(1, 0), Message::ResponseBuildTree { deads: 3 }).unwrap();
    }

    #[test]
    fn request_task_pushes_a_worker_task_job() {
        let ctx = test_context(1, 3, Some(0));
        let mut jobs = JobEngine::new();
        dispatch(&ctx, &mut jobs, &header(0, 0), Message::RequestTask { path: String::new(), argv: vec![], channel: 0 }).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs.iter_mut().next().unwrap(), Job::Task(_)));
    }

    #[test]
    fn response_task_with_no_matching_job_is_a_fault() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        let err = dispatch(&ctx, &mut jobs, &header(1, 0), Message::ResponseTask { ret: 0 });
        assert!(err.is_err());
    }

    #[test]
    fn request_exit_pushes_a_worker_exit_job_without_running_it() {
        // Dispatch only pushes the job; it must not tick it (ticking a
        // worker ExitJob terminates the process).
        let ctx = test_context(1, 3, Some(0));
        let mut jobs = JobEngine::new();
        dispatch(&ctx, &mut jobs, &header(0, 0), Message::RequestExit { signum: 0 }).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs.iter_mut().next().unwrap(), Job::Exit(_)));
    }

    #[test]
    fn response_exit_with_no_matching_job_is_a_fault() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        let err = dispatch(&ctx, &mut jobs, &header(1, 0), Message::ResponseExit);
        assert!(err.is_err());
    }

    #[test]
    fn ping_and_response_join_are_ignored() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        dispatch(&ctx, &mut jobs, &header(1, 0), Message::Ping { now: 0 }).unwrap();
        dispatch(&ctx, &mut jobs, &header(1, 0), Message::ResponseJoin { addr: 0, opts: ctx.opts.clone() }).unwrap();
        assert!(jobs.is_empty());
    }
}
