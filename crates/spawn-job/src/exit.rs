//! The exit job: the root broadcasts `REQUEST_EXIT`, every participant acks
//! with `RESPONSE_EXIT` and terminates, and the root terminates once every
//! ack is in (§4.1, §4.8, §8 scenario 6 "exit cascade").

use std::sync::atomic::Ordering;
use std::time::Duration;

use spawn_error::Result;
use spawn_wire::Message;

use crate::channels::CONTROL_CHANNEL;
use crate::context::Context;
use crate::job::Advance;

/// Grace period between queuing `RESPONSE_EXIT` and terminating the process,
/// so the bus has a chance to actually flush it before the socket closes.
const FLUSH_GRACE: Duration = Duration::from_millis(200);

enum Role {
    Root { expected_acks: u16, acks: u16, dispatched: bool },
    Worker { done: bool },
}

pub struct ExitJob {
    role: Role,
}

impl ExitJob {
    pub fn new_root() -> Self {
        ExitJob { role: Role::Root { expected_acks: 0, acks: 0, dispatched: false } }
    }

    pub fn new_worker() -> Self {
        ExitJob { role: Role::Worker { done: false } }
    }

    pub fn work(&mut self, ctx: &Context) -> Result<Advance> {
        match &mut self.role {
            Role::Root { expected_acks, acks, dispatched } => {
                if !*dispatched {
                    *expected_acks = ctx.size.saturating_sub(1);
                    ctx.broadcast(CONTROL_CHANNEL, &Message::RequestExit { signum: 0 })?;
                    *dispatched = true;
                }
                if *acks >= *expected_acks {
                    log::info!("all {} participants acknowledged exit", expected_acks);
                    std::thread::sleep(FLUSH_GRACE);
                    std::process::exit(0);
                }
                Ok(Advance::Pending)
            }
            Role::Worker { done } => {
                // §8 scenario 6: "runs any pending Task to completion" before
                // acking the exit. A live Task job's plugin thread still has
                // `ctx.active_task` set; hold off until it clears so a task
                // in flight isn't killed mid-run.
                if ctx.active_task.load(Ordering::SeqCst) {
                    return Ok(Advance::Pending);
                }
                if !*done {
                    ctx.send(0, CONTROL_CHANNEL, &Message::ResponseExit)?;
                    *done = true;
                }
                std::thread::sleep(FLUSH_GRACE);
                std::process::exit(0);
            }
        }
    }

    pub fn on_response_exit(&mut self, _src: u16) -> bool {
        match &mut self.role {
            Role::Root { acks, .. } => {
                *acks += 1;
                true
            }
            Role::Worker { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;

    // `ExitJob::work` calls `std::process::exit` as soon as it judges itself
    // done, which would kill the test binary. Every test here keeps at least
    // one ack outstanding so `work` only ever takes the `Advance::Pending`
    // branch and returns normally.

    #[test]
    fn root_dispatches_request_exit_on_its_first_tick_and_stays_pending() {
        let ctx = test_context(0, 3, None);
        let mut job = ExitJob::new_root();
        assert!(matches!(job.work(&ctx).unwrap(), Advance::Pending), "2 acks still outstanding");
        // Calling work again before any ack arrives must not re-dispatch or
        // complete; it should still report Pending.
        assert!(matches!(job.work(&ctx).unwrap(), Advance::Pending));
    }

    #[test]
    fn root_stays_pending_until_the_last_ack_is_in() {
        let ctx = test_context(0, 3, None);
        let mut job = ExitJob::new_root();
        job.work(&ctx).unwrap();
        assert!(job.on_response_exit(1));
        // One ack out of two outstanding; must still be Pending.
        assert!(matches!(job.work(&ctx).unwrap(), Advance::Pending), "1 ack still outstanding");
    }

    #[test]
    fn on_response_exit_is_a_no_op_on_a_worker() {
        let mut job = ExitJob::new_worker();
        assert!(!job.on_response_exit(0), "a worker has no acks to count");
    }
}
