//! The job variant and the engine that advances an ordered list of them once
//! per main-loop tick (§4.5, §9 design note: tagged-variant dispatch instead
//! of a runtime vtable except at this one boundary).

use spawn_error::Result;

use crate::build_tree::BuildTreeJob;
use crate::context::Context;
use crate::exit::ExitJob;
use crate::task::TaskJob;

/// A long-running, multi-tick operation owned uniquely by the job engine.
pub enum Job {
    BuildTree(BuildTreeJob),
    Task(TaskJob),
    Exit(ExitJob),
}

/// The result of advancing a job by one tick: either it has more work to do,
/// or it is finished and may have spawned follow-on jobs (e.g. the root's
/// BuildTree job enqueues the initial Task job on completion, §4.6 phase 3).
pub enum Advance {
    Pending,
    Completed { spawned: Vec<Job> },
}

impl Job {
    pub fn work(&mut self, ctx: &Context) -> Result<Advance> {
        match self {
            Job::BuildTree(job) => job.work(ctx),
            Job::Task(job) => job.work(ctx),
            Job::Exit(job) => job.work(ctx),
        }
    }

    /// Routes a `REQUEST_JOIN` arrival to the (at most one, per §4.8) live
    /// BuildTree job awaiting it.
    pub fn on_request_join(&mut self, ctx: &Context, src: u16, port: usize) -> Result<bool> {
        match self {
            Job::BuildTree(job) => job.on_request_join(ctx, src, port),
            _ => Ok(false),
        }
    }

    pub fn on_response_build_tree(&mut self, src: u16, deads: u32) -> bool {
        match self {
            Job::BuildTree(job) => job.on_response_build_tree(src, deads),
            _ => false,
        }
    }

    pub fn on_response_task(&mut self, src: u16, ret: u32) -> bool {
        match self {
            Job::Task(job) => job.on_response_task(src, ret),
            _ => false,
        }
    }

    pub fn on_response_exit(&mut self, src: u16) -> bool {
        match self {
            Job::Exit(job) => job.on_response_exit(src),
            _ => false,
        }
    }

    pub fn as_build_tree_mut(&mut self) -> Option<&mut BuildTreeJob> {
        match self {
            Job::BuildTree(job) => Some(job),
            _ => None,
        }
    }
}

/// An ordered list of live jobs (§4.5). Advanced in insertion order each
/// tick; completed jobs are removed and any jobs they spawned are appended
/// for the *next* tick.
#[derive(Default)]
pub struct JobEngine {
    jobs: Vec<Job>,
}

impl JobEngine {
    pub fn new() -> Self {
        JobEngine { jobs: Vec::new() }
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.iter_mut()
    }

    /// Advances every job once, in order, removing completed ones and
    /// queuing any jobs they spawned for the following tick.
    pub fn tick(&mut self, ctx: &Context) -> Result<()> {
        let mut spawned = Vec::new();
        let mut idx = 0;
        while idx < self.jobs.len() {
            match self.jobs[idx].work(ctx)? {
                Advance::Pending => idx += 1,
                Advance::Completed { spawned: mut more } => {
                    self.jobs.remove(idx);
                    spawned.append(&mut more);
                }
            }
        }
        self.jobs.append(&mut spawned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_tree::BuildTreeJob;
    use crate::context::test_context;

    #[test]
    fn a_completed_job_s_spawned_children_are_not_visible_until_the_next_tick() {
        // A childless BuildTree job completes on its very first tick and, on
        // the root, spawns a Task job (§4.6 phase 3). That spawned job must
        // not be ticked in the same pass that removed its parent (§4.5:
        // "queuing any jobs they spawned for the following tick").
        let ctx = test_context(0, 1, None);
        let mut jobs = JobEngine::new();
        jobs.push(Job::BuildTree(BuildTreeJob::new(0, &[], &[], 2)));

        jobs.tick(&ctx).unwrap();
        assert_eq!(jobs.len(), 1, "the spawned Task job should now be queued");
        assert!(matches!(jobs.jobs[0], Job::Task(_)));
    }

    #[test]
    fn jobs_advance_in_insertion_order() {
        let ctx = test_context(0, 3, None);
        let mut jobs = JobEngine::new();
        // A job with children takes multiple ticks to leave Setup; a
        // childless one completes on its first tick. Insert the slower one
        // first and confirm the faster one, inserted second, still
        // completes as soon as its own turn comes around on the same tick.
        jobs.push(Job::BuildTree(BuildTreeJob::new(0, &[1, 2], &["H0".into(), "H1".into(), "H2".into()], 2)));
        jobs.push(Job::BuildTree(BuildTreeJob::new(0, &[], &[], 2)));

        jobs.tick(&ctx).unwrap();
        // The first job (with two children) is still pending after Setup;
        // the second (childless) completed and spawned a Task job.
        assert_eq!(jobs.len(), 2);
        assert!(matches!(jobs.jobs[0], Job::BuildTree(_)));
        assert!(matches!(jobs.jobs[1], Job::Task(_)));
    }
}
