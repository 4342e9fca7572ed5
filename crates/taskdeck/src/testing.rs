//! Scripted transport and recording sink shared by the execute and runner
//! tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use jupyter_protocol::{JupyterMessage, JupyterMessageContent, KernelInfoRequest};
use kernel_session::{ChannelError, ExecuteChannels};

use crate::sink::{Level, Sink};

/// Request id the fake transport assigns to every submission.
pub const REQUEST_ID: &str = "request-under-test";

/// One scripted event on the fake transport, consumed in order.
pub enum Step {
    /// A broadcast message for the current request.
    Broadcast(JupyterMessageContent),
    /// A broadcast message belonging to some other request.
    BroadcastFor(&'static str, JupyterMessageContent),
    /// A broadcast message of a kind the bridge does not classify.
    BroadcastUnrecognized,
    /// The broadcast poll times out and the stdin stream holds this request.
    Input(JupyterMessageContent),
    /// Both streams are quiet for one poll.
    Empty,
    /// The broadcast poll times out after a real delay (for runner tests).
    Sleep(Duration),
    /// The transport fails.
    Drop,
}

/// Scripted `ExecuteChannels` implementation. Answers sent back through
/// `answer_input_prompt` are recorded for assertions.
pub struct FakeChannels {
    script: VecDeque<Step>,
    pub answers: Vec<String>,
}

impl FakeChannels {
    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
        FakeChannels {
            script: steps.into_iter().collect(),
            answers: Vec::new(),
        }
    }
}

impl ExecuteChannels for FakeChannels {
    async fn submit(&mut self, _code: &str, _allow_input: bool) -> Result<String, ChannelError> {
        Ok(REQUEST_ID.to_string())
    }

    async fn receive_broadcast(
        &mut self,
        timeout: Duration,
    ) -> Result<JupyterMessage, ChannelError> {
        match self.script.front() {
            Some(Step::Broadcast(_) | Step::BroadcastFor(..) | Step::BroadcastUnrecognized) => {
                match self.script.pop_front() {
                    Some(Step::Broadcast(content)) => {
                        Ok(broadcast_message(content, Some(REQUEST_ID)))
                    }
                    Some(Step::BroadcastFor(request_id, content)) => {
                        Ok(broadcast_message(content, Some(request_id)))
                    }
                    Some(Step::BroadcastUnrecognized) => {
                        let message: JupyterMessage = KernelInfoRequest::default().into();
                        Ok(with_parent(message, REQUEST_ID))
                    }
                    _ => unreachable!(),
                }
            }
            Some(Step::Input(_)) => Err(ChannelError::Empty(timeout)),
            Some(Step::Empty) => {
                self.script.pop_front();
                Err(ChannelError::Empty(timeout))
            }
            Some(Step::Sleep(_)) => {
                let Some(Step::Sleep(delay)) = self.script.pop_front() else {
                    unreachable!()
                };
                tokio::time::sleep(delay).await;
                Err(ChannelError::Empty(timeout))
            }
            Some(Step::Drop) => {
                self.script.pop_front();
                Err(ChannelError::Dropped(anyhow::anyhow!("kernel died")))
            }
            // A script must end with idle or Drop; anything else is a test bug.
            None => Err(ChannelError::Dropped(anyhow::anyhow!("script exhausted"))),
        }
    }

    async fn receive_input_prompt(
        &mut self,
        timeout: Duration,
    ) -> Result<JupyterMessage, ChannelError> {
        match self.script.front() {
            Some(Step::Input(_)) => {
                let Some(Step::Input(content)) = self.script.pop_front() else {
                    unreachable!()
                };
                Ok(broadcast_message(content, Some(REQUEST_ID)))
            }
            _ => Err(ChannelError::Empty(timeout)),
        }
    }

    async fn answer_input_prompt(&mut self, value: String) -> Result<(), ChannelError> {
        self.answers.push(value);
        Ok(())
    }
}

/// Sink that records every notification for assertions.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<(Level, String)>>);

impl RecordingSink {
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, content)| content)
            .collect()
    }
}

impl Sink for RecordingSink {
    fn notify(&self, content: &str, level: Level) {
        self.0.lock().unwrap().push((level, content.to_string()));
    }
}

/// Wrap content into a message tagged with the given parent request id.
pub fn broadcast_message(
    content: JupyterMessageContent,
    parent_id: Option<&str>,
) -> JupyterMessage {
    let mut message: JupyterMessage = KernelInfoRequest::default().into();
    message.content = content;
    match parent_id {
        Some(id) => with_parent(message, id),
        None => message,
    }
}

fn with_parent(mut message: JupyterMessage, parent_id: &str) -> JupyterMessage {
    let mut parent_header = message.header.clone();
    parent_header.msg_id = parent_id.to_string();
    message.parent_header = Some(parent_header);
    message
}

pub fn status(state: &str) -> JupyterMessageContent {
    JupyterMessageContent::Status(
        serde_json::from_value(serde_json::json!({ "execution_state": state }))
            .expect("valid status content"),
    )
}

pub fn stream(text: &str) -> JupyterMessageContent {
    JupyterMessageContent::StreamContent(
        serde_json::from_value(serde_json::json!({ "name": "stdout", "text": text }))
            .expect("valid stream content"),
    )
}

pub fn error_output(ename: &str, evalue: &str, traceback: &[&str]) -> JupyterMessageContent {
    JupyterMessageContent::ErrorOutput(
        serde_json::from_value(serde_json::json!({
            "ename": ename,
            "evalue": evalue,
            "traceback": traceback,
        }))
        .expect("valid error content"),
    )
}

pub fn execute_result(text: &str) -> JupyterMessageContent {
    JupyterMessageContent::ExecuteResult(
        serde_json::from_value(serde_json::json!({
            "data": { "text/plain": text },
            "metadata": {},
            "execution_count": 1,
        }))
        .expect("valid execute_result content"),
    )
}

pub fn input_request(prompt: &str) -> JupyterMessageContent {
    JupyterMessageContent::InputRequest(
        serde_json::from_value(serde_json::json!({ "prompt": prompt, "password": false }))
            .expect("valid input_request content"),
    )
}
