//! In-process backend with scripted replies.
//!
//! Used by the test suite and for offline dry runs: every call is recorded
//! so callers can assert on message content, sample count and temperature.

use crate::client::Backend;
use crate::models::{BackendError, Message, Result, SamplerError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One recorded `complete` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub n: usize,
    pub temperature: f64,
}

impl RecordedCall {
    /// Content of the first system message, or "" when there is none.
    pub fn system(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == crate::models::Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Content of the last message.
    pub fn last(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// A queued reply.
#[derive(Debug)]
pub enum Reply {
    Texts(Vec<String>),
    Fail(BackendError),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Texts(vec![text.into()])
    }

    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Texts(texts.into_iter().map(Into::into).collect())
    }

    pub fn fail(status: u16, message: impl Into<String>) -> Self {
        Self::Fail(BackendError::ApiError {
            status,
            message: message.into(),
        })
    }
}

type Responder = Box<dyn Fn(&RecordedCall) -> Result<Vec<String>> + Send + Sync>;

/// Deterministic backend driven by a closure or a reply queue.
pub struct ScriptedBackend {
    model: String,
    responder: Responder,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    /// Answer every call with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            model: "scripted".to_string(),
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer calls in order from `replies`; an exhausted queue is an error.
    pub fn queue(replies: Vec<Reply>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_call| {
            let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            match next {
                Some(Reply::Texts(texts)) => Ok(texts),
                Some(Reply::Fail(err)) => Err(SamplerError::Backend(err)),
                None => Err(SamplerError::Internal(
                    "Scripted backend has no replies left".to_string(),
                )),
            }
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Snapshot of every call made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn complete(
        &self,
        messages: &[Message],
        n: usize,
        temperature: f64,
    ) -> Result<Vec<String>> {
        let call = RecordedCall {
            messages: messages.to_vec(),
            n,
            temperature,
        };
        let reply = (self.responder)(&call);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        reply
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_replays_in_order_and_records() {
        let backend = ScriptedBackend::queue(vec![
            Reply::text("first"),
            Reply::texts(["a", "b"]),
            Reply::fail(500, "boom"),
        ]);
        let msgs = vec![Message::user("hi")];

        assert_eq!(backend.complete_one(&msgs, 0.0).await.unwrap(), "first");
        assert_eq!(backend.complete(&msgs, 2, 0.9).await.unwrap(), vec!["a", "b"]);
        assert!(backend.complete(&msgs, 1, 0.0).await.is_err());
        assert!(matches!(
            backend.complete(&msgs, 1, 0.0).await,
            Err(SamplerError::Internal(_))
        ));

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1].n, 2);
        assert_eq!(calls[1].temperature, 0.9);
        assert_eq!(calls[0].last(), "hi");
    }
}
