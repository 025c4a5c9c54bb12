//! # RepeatedTimer: per-job cancellable ticker.
//!
//! Runs a callback every `period` on its own task, driven by a control channel
//! (period, paused) and a child of the owning job's cancellation token.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► wait while paused (cancellable)
//!   ├─► run callback            (skipped once if skip_first_run)
//!   └─► sleep(period)           (cancellable)
//!         ├─ period changed → restart the sleep with the new period
//!         └─ paused         → back to the top
//! }
//! ```
//!
//! ## Rules
//! - Ticks run **sequentially** (never overlap).
//! - A running callback is never interrupted; cancellation is observed between ticks.
//! - Resuming after a pause runs a tick immediately.
//! - Dropping the handle stops the timer.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::dispatch::panic_message;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct TimerControl {
    period: Duration,
    paused: bool,
}

/// Start-up options for [`RepeatedTimer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerOptions {
    /// Wait one full period before the first tick.
    pub skip_first_run: bool,
    /// Create the timer paused; the first `unpause` starts it.
    pub start_paused: bool,
}

/// Handle to a running ticker.
#[derive(Debug)]
pub struct RepeatedTimer {
    name: Arc<str>,
    control: watch::Sender<TimerControl>,
    token: CancellationToken,
}

impl RepeatedTimer {
    /// Spawns the ticker task.
    ///
    /// `token` should be a child of the owning job's token so disconnect stops it.
    pub fn spawn<F, Fut>(
        name: impl Into<Arc<str>>,
        period: Duration,
        opts: TimerOptions,
        token: CancellationToken,
        callback: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name: Arc<str> = name.into();
        let (control, rx) = watch::channel(TimerControl {
            period: period.max(MIN_PERIOD),
            paused: opts.start_paused,
        });
        tokio::spawn(run_loop(
            name.clone(),
            rx,
            token.clone(),
            opts.skip_first_run,
            callback,
        ));
        Self {
            name,
            control,
            token,
        }
    }

    pub fn pause(&self) {
        self.control.send_modify(|c| c.paused = true);
    }

    pub fn unpause(&self) {
        self.control.send_modify(|c| c.paused = false);
    }

    /// Changes the period; an in-progress wait restarts with the new value.
    pub fn set_period(&self, period: Duration) {
        self.control.send_modify(|c| c.period = period.max(MIN_PERIOD));
    }

    pub fn period(&self) -> Duration {
        self.control.borrow().period
    }

    pub fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RepeatedTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_loop<F, Fut>(
    name: Arc<str>,
    mut rx: watch::Receiver<TimerControl>,
    token: CancellationToken,
    skip_first_run: bool,
    callback: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut first = true;

    'outer: loop {
        while rx.borrow_and_update().paused {
            tokio::select! {
                _ = token.cancelled() => break 'outer,
                changed = rx.changed() => if changed.is_err() { break 'outer },
            }
        }

        if !(first && skip_first_run) {
            if token.is_cancelled() {
                break;
            }
            if let Err(panic_err) = AssertUnwindSafe(callback()).catch_unwind().await {
                error!(timer = %name, panic = %panic_message(panic_err.as_ref()), "timer callback panicked");
            }
        }
        first = false;

        let mut deadline = Instant::now() + rx.borrow().period;
        loop {
            tokio::select! {
                _ = token.cancelled() => break 'outer,
                _ = time::sleep_until(deadline) => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                    let ctl = *rx.borrow_and_update();
                    if ctl.paused {
                        continue 'outer;
                    }
                    deadline = Instant::now() + ctl.period;
                }
            }
        }
    }
    debug!(timer = %name, "timer stopped");
}
