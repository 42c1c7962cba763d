use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::ModelClient;
use trellis_core::types::{ChatMessage, Completion, TokenUsage};

/// One scripted reply for a [`MockClient`].
#[derive(Debug)]
pub enum MockReply {
    Text(String),
    Error(TrellisError),
}

/// Scripted model client for tests.
///
/// Replies are popped in push order; once the script is exhausted the
/// default text (if any) is repeated, otherwise the call fails. Every
/// request is recorded for later inspection.
#[derive(Debug, Default)]
pub struct MockClient {
    replies: Mutex<VecDeque<MockReply>>,
    default_text: Mutex<Option<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock lock poisoned")
            .push_back(MockReply::Text(text.into()));
    }

    pub fn push_error(&self, error: TrellisError) {
        self.replies
            .lock()
            .expect("mock lock poisoned")
            .push_back(MockReply::Error(error));
    }

    /// Reply used once the script runs out.
    pub fn set_default_text(&self, text: impl Into<String>) {
        *self.default_text.lock().expect("mock lock poisoned") = Some(text.into());
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().expect("mock lock poisoned").len()
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }
}

impl ModelClient for MockClient {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _max_output_tokens: u32,
        _temperature: f32,
    ) -> BoxFuture<'_, Result<Completion>> {
        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(messages);
        let reply = self.replies.lock().expect("mock lock poisoned").pop_front();
        let default = self.default_text.lock().expect("mock lock poisoned").clone();
        Box::pin(async move {
            match reply {
                Some(MockReply::Text(text)) => Ok(completion(text)),
                Some(MockReply::Error(e)) => Err(e),
                None => match default {
                    Some(text) => Ok(completion(text)),
                    None => Err(TrellisError::ModelRequest(
                        "mock client script exhausted".to_string(),
                    )),
                },
            }
        })
    }
}

fn completion(text: String) -> Completion {
    Completion {
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_push_order() {
        let mock = MockClient::new();
        mock.push_text("first");
        mock.push_text("second");

        let a = mock.complete(vec![ChatMessage::user("q")], 16, 0.0).await;
        let b = mock.complete(vec![ChatMessage::user("q")], 16, 0.0).await;
        assert_eq!(a.unwrap().text, "first");
        assert_eq!(b.unwrap().text, "second");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_without_default_fails() {
        let mock = MockClient::new();
        let err = mock
            .complete(vec![ChatMessage::user("q")], 16, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::ModelRequest(_)));
    }

    #[tokio::test]
    async fn test_default_text_repeats() {
        let mock = MockClient::new();
        mock.set_default_text("ok");
        for _ in 0..3 {
            let reply = mock
                .complete(vec![ChatMessage::user("q")], 16, 0.0)
                .await
                .unwrap();
            assert_eq!(reply.text, "ok");
        }
    }
}
