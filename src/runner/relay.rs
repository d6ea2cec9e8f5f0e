//! Post-and-reply plumbing.
//!
//! The relay wraps the outbound task so that, after it runs on the
//! destination, the reply is posted back to the sequence the original call
//! was made from. If the destination never runs the task (it shut down
//! with the task queued), both callbacks are dropped with the queue and
//! the reply is never scheduled.

use std::sync::Arc;

use tracing::trace;

use crate::origin::Origin;
use crate::runner::{SequencedTaskRunner, TaskRunner};
use crate::tasks::Callback;

/// Wraps `task` so that `reply` is posted to `origin_runner` after it runs.
pub(crate) fn wrap(
    origin: Origin,
    task: Callback,
    reply: Callback,
    origin_runner: Arc<dyn SequencedTaskRunner>,
) -> Callback {
    Box::new(move || {
        task();
        if !origin_runner.post_task(origin, reply) {
            trace!(%origin, "reply dropped: origin sequence has shut down");
        }
    })
}
