//! The per-node main loop (C8, §4.8): advance jobs, ping periodically from
//! the root, hand off newly accepted connections, and dispatch receives.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use spawn_error::Result;
use spawn_wire::Message;

use crate::channels::CONTROL_CHANNEL;
use crate::context::Context;
use crate::dispatch::dispatch;
use crate::job::JobEngine;

/// Default PING period (§4.8: "roughly every timeout/2 seconds, default
/// 30 s"). Independent of the `WatchdogTimeout` option, which governs an
/// out-of-scope external collaborator (§1).
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on each receive wait, so newly-pending accepts and job
/// progress are noticed promptly even with no traffic (§4.8, §5).
const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives one node's main loop forever. Only returns on an unrecoverable
/// error; the Exit job terminates the process directly rather than
/// returning control here (§4.1 `REQUEST_EXIT`/`RESPONSE_EXIT` cascade).
pub fn run(ctx: &Context, jobs: &mut JobEngine) -> Result<()> {
    let mut last_ping = Instant::now();

    loop {
        jobs.tick(ctx)?;

        if ctx.is_root() && last_ping.elapsed() >= PING_INTERVAL {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            ctx.broadcast(CONTROL_CHANNEL, &Message::Ping { now })?;
            last_ping = Instant::now();
        }

        if let Some(stream) = ctx.network.accept_slot().take() {
            ctx.comm.stop_processing();
            ctx.network.lock().add_port(stream);
            ctx.comm.resume_processing();
        }

        if let Some(mut handle) = ctx.comm.recvq().dequeue_timeout(RECV_POLL_TIMEOUT) {
            let (header, message) = spawn_wire::unpack(&mut handle)?;
            dispatch(ctx, jobs, &header, message)?;
        }
    }
}
