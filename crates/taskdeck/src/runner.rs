//! Background execution of one task invocation.
//!
//! Each button press spawns one `TaskRunner`. The runner owns one bridge
//! invocation on a background tokio task, so interpreter I/O never blocks
//! the UI event loop; the loop either polls `is_running` at a short interval
//! or awaits `join_and_collect` once the runner reports done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kernel_session::ExecuteChannels;
use log::debug;

use crate::error::ExecError;
use crate::execute::{execute_snippet, ExecuteOptions, TaskOutcome};
use crate::input::InputQueue;
use crate::params::ArgValue;
use crate::sink::{Level, Sink};
use crate::snippet;
use crate::task::TaskDescriptor;

pub struct TaskRunner {
    task_name: String,
    running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<Result<TaskOutcome, ExecError>>>,
}

impl TaskRunner {
    /// Build the snippet and launch the bridge in the background.
    ///
    /// A `BuildError` is returned synchronously and nothing reaches the
    /// kernel. The channels move into the runner: they are private to this
    /// invocation, as is the input queue.
    pub fn spawn<C>(
        task: &TaskDescriptor,
        args: &[ArgValue],
        kwargs: &[(String, ArgValue)],
        mut channels: C,
        input_queue: InputQueue,
        sink: Arc<dyn Sink>,
        mut options: ExecuteOptions,
    ) -> Result<TaskRunner, ExecError>
    where
        C: ExecuteChannels + Send + 'static,
    {
        let code = snippet::build(task, args, kwargs, Some(&task.capture))?;
        if options.expected_prompts.is_none() {
            options.expected_prompts = task.input_patterns.clone();
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let task_name = task.name.clone();
        let reported_name = task_name.clone();

        let handle = tokio::spawn(async move {
            debug!("running task '{}' in the kernel", reported_name);
            let result =
                execute_snippet(&mut channels, &code, &options, &input_queue, sink.as_ref()).await;
            if let Err(e) = &result {
                report_failure(sink.as_ref(), &reported_name, &e.to_string());
            }
            flag.store(false, Ordering::SeqCst);
            result
        });

        Ok(TaskRunner {
            task_name,
            running,
            handle: Some(handle),
        })
    }

    /// Run a native closure on a blocking thread instead of the kernel.
    ///
    /// A returned error becomes the captured outcome and is reported through
    /// the same sink channel as remote failures, so callers see one failure
    /// contract regardless of where execution happened.
    pub fn spawn_blocking_local<F>(name: &str, f: F, sink: Arc<dyn Sink>) -> TaskRunner
    where
        F: FnOnce() -> anyhow::Result<Option<String>> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let task_name = name.to_string();
        let reported_name = task_name.clone();

        let handle = tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(f).await {
                Ok(Ok(value)) => {
                    if let Some(text) = &value {
                        sink.notify(text, Level::Raw);
                    }
                    TaskOutcome::Completed { value }
                }
                Ok(Err(e)) => {
                    let error = format!("{e:#}");
                    report_failure(sink.as_ref(), &reported_name, &error);
                    TaskOutcome::Failed { error }
                }
                // The closure panicked; capture it like any other failure.
                Err(e) => {
                    let error = e.to_string();
                    report_failure(sink.as_ref(), &reported_name, &error);
                    TaskOutcome::Failed { error }
                }
            };
            flag.store(false, Ordering::SeqCst);
            Ok(result)
        });

        TaskRunner {
            task_name,
            running,
            handle: Some(handle),
        }
    }

    /// Non-blocking poll; false once the bridge reached its terminal state.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Collect the outcome. May only be called once the runner has finished;
    /// earlier calls fail with `InvalidState`, as does a second collection.
    pub async fn join_and_collect(&mut self) -> Result<TaskOutcome, ExecError> {
        if self.is_running() {
            return Err(ExecError::InvalidState);
        }
        let handle = self.handle.take().ok_or(ExecError::InvalidState)?;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ExecError::TransportDropped(anyhow::anyhow!(
                "runner task failed: {e}"
            ))),
        }
    }
}

/// One clearly delimited failure block on the sink, shared by the remote and
/// local paths.
fn report_failure(sink: &dyn Sink, task_name: &str, detail: &str) {
    let rule = "-".repeat(80);
    sink.notify(
        &format!("{rule}\nTask '{task_name}' failed: {detail}\n{rule}"),
        Level::Error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{status, stream, FakeChannels, RecordingSink, Step};

    fn fast_options() -> ExecuteOptions {
        ExecuteOptions {
            poll_interval: Duration::from_millis(10),
            input_poll: Duration::from_millis(10),
            ..ExecuteOptions::default()
        }
    }

    fn demo_task() -> TaskDescriptor {
        let mut task = TaskDescriptor::new("tasks.demo", "press");
        task.capture = crate::task::ResponseCapture::Single("response".into());
        task
    }

    async fn wait_until_done(runner: &TaskRunner) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while runner.is_running() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "runner never finished"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_running_flag_and_single_collection() {
        let channels = FakeChannels::scripted([
            Step::Sleep(Duration::from_millis(100)),
            Step::Broadcast(status("busy")),
            Step::Broadcast(stream("out\n")),
            Step::Broadcast(status("idle")),
        ]);
        let sink = Arc::new(RecordingSink::default());

        let mut runner = TaskRunner::spawn(
            &demo_task(),
            &[],
            &[],
            channels,
            InputQueue::new(),
            sink,
            fast_options(),
        )
        .unwrap();

        assert!(runner.is_running());
        assert!(matches!(
            runner.join_and_collect().await,
            Err(ExecError::InvalidState)
        ));

        wait_until_done(&runner).await;

        let outcome = runner.join_and_collect().await.unwrap();
        assert!(outcome.is_success());

        // The outcome is collected exactly once.
        assert!(matches!(
            runner.join_and_collect().await,
            Err(ExecError::InvalidState)
        ));
    }

    #[tokio::test]
    async fn test_build_error_is_synchronous() {
        let channels = FakeChannels::scripted([]);
        let kwargs = [("not an identifier".to_string(), ArgValue::Int(1))];

        let result = TaskRunner::spawn(
            &demo_task(),
            &[],
            &kwargs,
            channels,
            InputQueue::new(),
            Arc::new(RecordingSink::default()),
            fast_options(),
        );

        assert!(matches!(result, Err(ExecError::Build(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_through_the_sink() {
        let channels = FakeChannels::scripted([Step::Broadcast(status("busy")), Step::Drop]);
        let sink = Arc::new(RecordingSink::default());

        let mut runner = TaskRunner::spawn(
            &demo_task(),
            &[],
            &[],
            channels,
            InputQueue::new(),
            sink.clone(),
            fast_options(),
        )
        .unwrap();

        wait_until_done(&runner).await;
        let err = runner.join_and_collect().await.unwrap_err();
        assert!(matches!(err, ExecError::TransportDropped(_)));

        let errors = sink.at_level(Level::Error);
        assert!(errors.iter().any(|m| m.contains("Task 'press' failed")));
    }

    #[tokio::test]
    async fn test_local_closure_error_uses_the_same_failure_contract() {
        let sink = Arc::new(RecordingSink::default());
        let mut runner = TaskRunner::spawn_blocking_local(
            "husbandry",
            || anyhow::bail!("tractor not found"),
            sink.clone(),
        );

        wait_until_done(&runner).await;
        let outcome = runner.join_and_collect().await.unwrap();

        let TaskOutcome::Failed { error } = outcome else {
            panic!("expected a failed outcome");
        };
        assert!(error.contains("tractor not found"));
        assert!(sink
            .at_level(Level::Error)
            .iter()
            .any(|m| m.contains("Task 'husbandry' failed") && m.contains("tractor not found")));
    }

    #[tokio::test]
    async fn test_local_closure_success_forwards_its_value() {
        let sink = Arc::new(RecordingSink::default());
        let mut runner = TaskRunner::spawn_blocking_local(
            "harvest",
            || Ok(Some("12 bales".to_string())),
            sink.clone(),
        );

        wait_until_done(&runner).await;
        let outcome = runner.join_and_collect().await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Completed {
                value: Some("12 bales".to_string())
            }
        );
        assert_eq!(sink.at_level(Level::Raw), vec!["12 bales".to_string()]);
    }
}
