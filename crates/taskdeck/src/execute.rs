//! Drives one code submission against a kernel.
//!
//! `execute_snippet` submits the code, then pumps the shared broadcast
//! stream filtered to this request: text output goes to the sink as it
//! arrives, input requests are answered from the operator's input queue,
//! and the loop ends when the kernel reports idle for the request, or when
//! the transport fails, which ends the request as failed rather than
//! hanging.

use std::time::Duration;

use jupyter_protocol::{ExecutionState, JupyterMessage, JupyterMessageContent, MediaType, Stdio};
use kernel_session::{ChannelError, ExecuteChannels};
use log::debug;

use crate::error::ExecError;
use crate::input::InputQueue;
use crate::sink::{Level, Sink};

/// Tuning for one bridge invocation.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// How long one broadcast receive waits before the bridge takes the
    /// opportunity to check for an outstanding input request.
    pub poll_interval: Duration,
    /// How long the input-request probe waits on the stdin stream.
    pub input_poll: Duration,
    /// Substrings at least one of which is expected in every input prompt.
    pub expected_prompts: Option<Vec<String>>,
    /// Echo the submitted code to the sink before running it.
    pub echo_code: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            poll_interval: Duration::from_secs(1),
            input_poll: Duration::from_millis(100),
            expected_prompts: None,
            echo_code: false,
        }
    }
}

/// Terminal state of one task invocation.
///
/// A failure reported by the kernel leaves the session usable for the next
/// request, so it is an outcome here, not an `ExecError`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed {
        /// Plain-text rendering of the snippet's result, when it produced one.
        value: Option<String>,
    },
    Failed {
        /// The kernel's traceback, verbatim.
        error: String,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

/// Submit `code` and pump the kernel's streams until the request completes.
///
/// Exactly one terminal path is taken per invocation, and any output
/// produced before the terminal message has already reached the sink when
/// this returns.
pub async fn execute_snippet<C: ExecuteChannels>(
    channels: &mut C,
    code: &str,
    options: &ExecuteOptions,
    input_queue: &InputQueue,
    sink: &dyn Sink,
) -> Result<TaskOutcome, ExecError> {
    if options.echo_code {
        sink.notify(code, Level::Raw);
    }

    let request_id = channels.submit(code, true).await.map_err(|e| match e {
        ChannelError::ConnectTimeout(d) => ExecError::ConnectionTimeout(d),
        other => ExecError::TransportDropped(anyhow::Error::new(other)),
    })?;
    debug!("submitted execute_request {}", request_id);

    let mut failure: Option<String> = None;
    let mut value: Option<String> = None;

    loop {
        match channels.receive_broadcast(options.poll_interval).await {
            Ok(message) => {
                if !belongs_to(&message, &request_id) {
                    debug!(
                        "skipping {} for another request",
                        message.header.msg_type
                    );
                    continue;
                }

                match &message.content {
                    JupyterMessageContent::Status(status) => match status.execution_state {
                        ExecutionState::Idle => break,
                        ExecutionState::Busy | ExecutionState::Starting => {}
                        _ => debug!("kernel reported a transitional execution state"),
                    },
                    JupyterMessageContent::StreamContent(stream) => match stream.name {
                        Stdio::Stdout => sink.notify(&stream.text, Level::Raw),
                        Stdio::Stderr => sink.notify(&stream.text, Level::Error),
                    },
                    JupyterMessageContent::ExecuteResult(result) => {
                        if let Some(text) = plain_text(&result.data) {
                            sink.notify(&text, Level::Raw);
                            value = Some(text);
                        }
                    }
                    JupyterMessageContent::DisplayData(display) => {
                        // Richer representations (html, images) have no
                        // console rendering and are dropped.
                        if let Some(text) = plain_text(&display.data) {
                            sink.notify(&text, Level::Raw);
                        }
                    }
                    JupyterMessageContent::UpdateDisplayData(update) => {
                        if let Some(text) = plain_text(&update.data) {
                            sink.notify(&text, Level::Raw);
                        }
                    }
                    JupyterMessageContent::ErrorOutput(error) => {
                        let traceback = if error.traceback.is_empty() {
                            format!("{}: {}", error.ename, error.evalue)
                        } else {
                            error.traceback.join("\n")
                        };
                        sink.notify(&traceback, Level::Error);
                        failure = Some(traceback);
                    }
                    // The kernel echoing our own submission back.
                    JupyterMessageContent::ExecuteInput(_) => {}
                    _ => {
                        sink.notify(
                            &format!(
                                "unrecognized message '{}' on the broadcast stream",
                                message.header.msg_type
                            ),
                            Level::Warning,
                        );
                    }
                }
            }
            Err(ChannelError::Empty(_)) => {
                // No broadcast traffic. The kernel may be blocked in input();
                // this is the moment to check the stdin stream.
                match channels.receive_input_prompt(options.input_poll).await {
                    Ok(message) => {
                        if let JupyterMessageContent::InputRequest(request) = &message.content {
                            let answer =
                                collect_answer(&request.prompt, options, input_queue, sink).await;
                            channels
                                .answer_input_prompt(answer)
                                .await
                                .map_err(|e| transport_dropped(sink, e))?;
                        } else {
                            debug!("ignoring {} on the stdin stream", message.header.msg_type);
                        }
                    }
                    Err(ChannelError::Empty(_)) => {}
                    Err(e) => return Err(transport_dropped(sink, e)),
                }
            }
            Err(e) => return Err(transport_dropped(sink, e)),
        }
    }

    Ok(match failure {
        Some(error) => TaskOutcome::Failed { error },
        None => TaskOutcome::Completed { value },
    })
}

/// Forward the prompt and collect the operator's answer.
///
/// Malformed prompts are never fatal: an empty prompt gets an immediate
/// empty answer, and a prompt matching none of the expected patterns is
/// reported loudly but still relayed.
async fn collect_answer(
    prompt: &str,
    options: &ExecuteOptions,
    input_queue: &InputQueue,
    sink: &dyn Sink,
) -> String {
    if prompt.is_empty() {
        sink.notify(
            "input was requested without a prompt; replying with an empty string. \
             Ask the task author to pass a message to the input request.",
            Level::Warning,
        );
        return String::new();
    }

    if let Some(patterns) = &options.expected_prompts {
        if !patterns.iter().any(|p| prompt.contains(p.trim_end())) {
            let expected = patterns
                .iter()
                .map(|p| format!("'{p}'"))
                .collect::<Vec<_>>()
                .join(", ");
            sink.notify(
                &format!(
                    "input prompt '{prompt}' matches none of the expected prompts \
                     ({expected}); forwarding it anyway. Ask the task author to \
                     match up the input patterns and the prompt."
                ),
                Level::Warning,
            );
        }
    }

    sink.notify(prompt, Level::Info);
    input_queue.get().await
}

fn transport_dropped(sink: &dyn Sink, e: ChannelError) -> ExecError {
    sink.notify(
        &format!("connection to the kernel was lost: {e}"),
        Level::Error,
    );
    ExecError::TransportDropped(anyhow::Error::new(e))
}

fn belongs_to(message: &JupyterMessage, request_id: &str) -> bool {
    message
        .parent_header
        .as_ref()
        .map(|h| h.msg_id.as_str())
        == Some(request_id)
}

/// Extract the text/plain representation from a media bundle, trimmed of the
/// trailing newline the kernel appends.
fn plain_text(media: &jupyter_protocol::Media) -> Option<String> {
    media.content.iter().find_map(|m| match m {
        MediaType::Plain(text) => Some(text.trim_end().to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        error_output, execute_result, input_request, status, stream, FakeChannels, RecordingSink,
        Step, REQUEST_ID,
    };

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            poll_interval: Duration::from_millis(10),
            input_poll: Duration::from_millis(10),
            ..ExecuteOptions::default()
        }
    }

    async fn run(
        channels: &mut FakeChannels,
        opts: &ExecuteOptions,
        queue: &InputQueue,
        sink: &RecordingSink,
    ) -> Result<TaskOutcome, ExecError> {
        tokio::time::timeout(
            Duration::from_secs(5),
            execute_snippet(channels, "print('x')", opts, queue, sink),
        )
        .await
        .expect("bridge did not terminate")
    }

    #[tokio::test]
    async fn test_stream_then_idle_is_success() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Empty,
            Step::Broadcast(stream("hello\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed { value: None });
        assert_eq!(sink.entries(), vec![(Level::Raw, "hello\n".to_string())]);
        assert!(channels.answers.is_empty(), "no input should be requested");
    }

    #[tokio::test]
    async fn test_echo_code_forwards_the_snippet_first() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Broadcast(stream("hi\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let mut opts = options();
        opts.echo_code = true;
        run(&mut channels, &opts, &queue, &sink).await.unwrap();

        assert_eq!(
            sink.at_level(Level::Raw),
            vec!["print('x')".to_string(), "hi\n".to_string()]
        );
    }

    #[tokio::test]
    async fn test_error_then_idle_is_failure_with_traceback() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Broadcast(error_output("ValueError", "boom", &["line1", "line2"])),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        let TaskOutcome::Failed { error } = outcome else {
            panic!("expected a failed outcome");
        };
        assert!(error.contains("line1") && error.contains("line2"));

        let errors = sink.at_level(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("line1") && errors[0].contains("line2"));
    }

    #[tokio::test]
    async fn test_result_value_is_captured_and_forwarded() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Broadcast(execute_result("42\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Completed {
                value: Some("42".to_string())
            }
        );
        assert_eq!(sink.at_level(Level::Raw), vec!["42".to_string()]);
    }

    #[tokio::test]
    async fn test_input_request_dequeues_exactly_one_answer() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Input(input_request("Continue? ")),
            Step::Broadcast(stream("ok\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        queue.put("yes".into()).await;
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(channels.answers, vec!["yes".to_string()]);
        assert!(sink
            .at_level(Level::Info)
            .iter()
            .any(|m| m.contains("Continue?")));
    }

    #[tokio::test]
    async fn test_empty_prompt_is_answered_without_blocking() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Input(input_request("")),
            Step::Broadcast(status("idle")),
        ]);
        // Deliberately nothing in the queue: an empty prompt must not block.
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(channels.answers, vec![String::new()]);
        assert!(sink
            .at_level(Level::Warning)
            .iter()
            .any(|m| m.contains("without a prompt")));
    }

    #[tokio::test]
    async fn test_unexpected_prompt_warns_but_still_relays() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Input(input_request("Password: ")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        queue.put("hunter2".into()).await;
        let sink = RecordingSink::default();

        let mut opts = options();
        opts.expected_prompts = Some(vec!["Continue".into()]);
        let outcome = run(&mut channels, &opts, &queue, &sink).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(channels.answers, vec!["hunter2".to_string()]);
        assert!(sink
            .at_level(Level::Warning)
            .iter()
            .any(|m| m.contains("matches none of the expected prompts")));
    }

    #[tokio::test]
    async fn test_messages_for_other_requests_are_skipped() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::BroadcastFor("other-request", stream("not ours\n")),
            Step::Broadcast(stream("ours\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(sink.at_level(Level::Raw), vec!["ours\n".to_string()]);
    }

    #[tokio::test]
    async fn test_unrecognized_kind_is_reported_and_skipped() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::BroadcastUnrecognized,
            Step::Broadcast(stream("still here\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert!(outcome.is_success(), "the loop must not abort");
        assert!(sink
            .at_level(Level::Warning)
            .iter()
            .any(|m| m.contains("unrecognized message")));
        assert_eq!(sink.at_level(Level::Raw), vec!["still here\n".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_drop_terminates_as_failure() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::Broadcast(stream("partial\n")),
            Step::Drop,
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let err = run(&mut channels, &options(), &queue, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::TransportDropped(_)));
        // Partial output reached the sink before the terminal notification.
        assert_eq!(sink.at_level(Level::Raw), vec!["partial\n".to_string()]);
        assert!(sink
            .at_level(Level::Error)
            .iter()
            .any(|m| m.contains("lost")));
    }

    #[tokio::test]
    async fn test_idle_for_another_request_does_not_terminate() {
        let mut channels = FakeChannels::scripted([
            Step::Broadcast(status("busy")),
            Step::BroadcastFor("other-request", status("idle")),
            Step::Broadcast(stream("after foreign idle\n")),
            Step::Broadcast(status("idle")),
        ]);
        let queue = InputQueue::new();
        let sink = RecordingSink::default();

        let outcome = run(&mut channels, &options(), &queue, &sink).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            sink.at_level(Level::Raw),
            vec!["after foreign idle\n".to_string()]
        );
    }

    #[test]
    fn test_belongs_to_checks_parent_header() {
        let ours = crate::testing::broadcast_message(stream("x"), Some(REQUEST_ID));
        let foreign = crate::testing::broadcast_message(stream("x"), Some("someone-else"));
        let orphan = crate::testing::broadcast_message(stream("x"), None);

        assert!(belongs_to(&ours, REQUEST_ID));
        assert!(!belongs_to(&foreign, REQUEST_ID));
        assert!(!belongs_to(&orphan, REQUEST_ID));
    }
}
