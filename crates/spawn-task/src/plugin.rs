//! The user-task plugin contract (§6): loaded once per `REQUEST_TASK`,
//! invoked with a different entry point on the root than on every other
//! participant.

/// A task run across the overlay. `local` executes on the root (the node
/// that initiated the task), `other` on every other participant. Must be
/// safe to run concurrently with a different task's invocation in the same
/// process (§6).
pub trait TaskPlugin: Send + Sync {
    fn local(&self, argv: &[String]) -> i32;
    fn other(&self, argv: &[String]) -> i32;
}

/// Does nothing and succeeds everywhere; useful for exercising the
/// build-tree-then-task-then-exit cascade without a real payload.
pub struct NoopTask;

impl TaskPlugin for NoopTask {
    fn local(&self, _argv: &[String]) -> i32 {
        0
    }

    fn other(&self, _argv: &[String]) -> i32 {
        0
    }
}

/// Logs a greeting with the given argv on whichever participant runs it.
pub struct HelloTask;

impl TaskPlugin for HelloTask {
    fn local(&self, argv: &[String]) -> i32 {
        log::info!("hello from the root, argv={argv:?}");
        0
    }

    fn other(&self, argv: &[String]) -> i32 {
        log::info!("hello from a worker, argv={argv:?}");
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_task_always_succeeds() {
        let task = NoopTask;
        assert_eq!(task.local(&[]), 0);
        assert_eq!(task.other(&["x".to_string()]), 0);
    }

    #[test]
    fn hello_task_always_succeeds() {
        let task = HelloTask;
        assert_eq!(task.local(&["a".to_string()]), 0);
        assert_eq!(task.other(&[]), 0);
    }
}
