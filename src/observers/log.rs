use tracing::debug;

use crate::observers::TaskObserver;
use crate::tasks::Task;

/// Base observer that logs task execution.
///
/// Enabled via the `logging` feature. Useful for demos and debugging.
pub struct LogObserver;

impl TaskObserver for LogObserver {
    fn will_process_task(&self, task: &Task) {
        debug!(
            origin = %task.origin(),
            sequence = task.sequence_number(),
            "running task"
        );
    }

    fn did_process_task(&self, task: &Task) {
        debug!(
            origin = %task.origin(),
            sequence = task.sequence_number(),
            "finished task"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::runner::TaskRunnerExt;
    use crate::sessions::RunSession;
    use crate::TaskLoop;

    #[test]
    fn test_log_observer_does_not_disturb_execution_order() {
        let task_loop = TaskLoop::new();
        let runner = task_loop.task_runner();
        let observer: Arc<dyn TaskObserver> = Arc::new(LogObserver);
        task_loop.add_task_observer(observer.clone());

        let runs = Arc::new(AtomicUsize::new(0));
        for expected in 0..3 {
            let counter = runs.clone();
            runner.post(crate::origin!(), move || {
                assert_eq!(counter.fetch_add(1, Ordering::SeqCst), expected);
            });
        }
        RunSession::new().run_until_idle();
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task_loop.remove_task_observer(&observer);
    }
}
