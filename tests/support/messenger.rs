use async_trait::async_trait;
use notifier::chat::{ChatError, ChatMessenger, OutboundMessage};
use notifier::domain::RecipientId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Records every send; recipients marked as failing get a platform rejection.
#[derive(Default, Debug)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
    attempts: Mutex<Vec<RecipientId>>,
    failing: Mutex<HashSet<RecipientId>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, recipient_id: RecipientId) {
        self.failing
            .lock()
            .expect("failing set")
            .insert(recipient_id);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sent messages").clone()
    }

    pub fn texts_for(&self, recipient_id: RecipientId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|message| message.recipient_id == recipient_id)
            .map(|message| message.text)
            .collect()
    }

    pub fn attempts(&self) -> Vec<RecipientId> {
        self.attempts.lock().expect("attempts").clone()
    }
}

#[async_trait]
impl ChatMessenger for RecordingMessenger {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChatError> {
        self.attempts
            .lock()
            .expect("attempts")
            .push(message.recipient_id);

        if self
            .failing
            .lock()
            .expect("failing set")
            .contains(&message.recipient_id)
        {
            return Err(ChatError::Rejected {
                method: "sendMessage",
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }

        self.sent.lock().expect("sent messages").push(message.clone());
        Ok(())
    }
}
