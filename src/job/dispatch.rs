//! # Per-subscription dispatch workers.
//!
//! Each subscription a job opens gets one worker task that drains its queue and
//! calls the job's handler.
//!
//! ```text
//! broker ──► [fifo] ──► worker ──► handler(msg)
//!                          ├──► Err   → warn, next message
//!                          └──► panic → error, next message
//! ```
//!
//! ## Rules
//! - **Per-subscription FIFO**: one message at a time, in arrival order.
//! - **Isolation**: a failing or panicking handler never stops the worker.
//! - **Cancellation**: the worker stops taking new messages once the job token is
//!   cancelled; a handler already running is allowed to finish.
//!
//! **Warning**: `AssertUnwindSafe` is used, so a handler that panics while holding a
//! lock may leave shared state inconsistent.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::JobError;
use crate::pubsub::{Message, Subscription};

/// Spawns the worker for one subscription.
pub(crate) fn spawn_worker<F, Fut>(
    job: Arc<str>,
    filter: Arc<str>,
    sub: Subscription,
    token: CancellationToken,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    let mut rx = sub.rx;
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },
            };
            if token.is_cancelled() {
                break;
            }

            let topic = msg.topic.clone();
            match AssertUnwindSafe(handler(msg)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(job = %job, topic = %topic, label = e.as_label(), error = %e, "message handler failed");
                }
                Err(panic_err) => {
                    let info = panic_message(panic_err.as_ref());
                    error!(job = %job, topic = %topic, filter = %filter, panic = %info, "message handler panicked");
                }
            }
        }
    })
}

pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
