use std::time::Duration;

use bmcfan_traits::{Actuator, Clock, Notifier, Sampler};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::Result;
use crate::scheduler::ControlLoop;
use crate::status::TickOutcome;

/// How a run ended, when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A message (or hang-up) arrived on the shutdown channel.
    Shutdown,
    /// The requested number of ticks ran.
    TickLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub reason: StopReason,
    pub last_percent: Option<u8>,
}

/// Wait for the rest of the tick interval, or until shutdown is requested.
///
/// Returns `true` when shutdown was requested. A disconnected channel means
/// nobody can ask us to stop, so the wait falls back to the loop's clock.
fn wait_or_shutdown<C: Clock>(shutdown: &Receiver<()>, clock: &C, wait: Duration) -> bool {
    if wait.is_zero() {
        return matches!(shutdown.try_recv(), Ok(()));
    }
    match shutdown.recv_timeout(wait) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            clock.sleep(wait);
            false
        }
    }
}

/// Bootstrap the loop and tick it every `step_delay` until shutdown, the
/// tick limit, or a fail-safe.
///
/// Control is handed back to the BMC on every exit path that still has it.
/// A fail-safe has already reverted, so its error is returned as is.
pub fn run<S, A, N, C>(
    ctl: &mut ControlLoop<S, A, N, C>,
    shutdown: &Receiver<()>,
    max_ticks: Option<u64>,
) -> Result<RunSummary>
where
    S: Sampler,
    A: Actuator,
    N: Notifier,
    C: Clock,
{
    if let Err(e) = ctl.bootstrap() {
        // Manual mode may be half applied; try to undo it before bailing.
        let _ = ctl.shutdown();
        return Err(e);
    }

    let step = ctl.settings().control.step_delay;
    let mut ticks = 0u64;
    let reason = loop {
        if matches!(shutdown.try_recv(), Ok(())) {
            break StopReason::Shutdown;
        }
        let started = ctl.clock().now();
        match ctl.tick()? {
            TickOutcome::Skipped(e) => tracing::debug!(error = %e, "tick skipped"),
            other => tracing::trace!(outcome = ?other, "tick done"),
        }
        ticks += 1;
        if max_ticks.is_some_and(|m| ticks >= m) {
            break StopReason::TickLimit;
        }
        let spent = ctl.clock().now().saturating_duration_since(started);
        if wait_or_shutdown(shutdown, ctl.clock(), step.saturating_sub(spent)) {
            break StopReason::Shutdown;
        }
    };

    tracing::info!(ticks, ?reason, "control loop stopping");
    ctl.shutdown()?;
    Ok(RunSummary {
        ticks,
        reason,
        last_percent: ctl.last_effective(),
    })
}
