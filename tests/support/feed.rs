use async_trait::async_trait;
use notifier::chat::{ChatError, InboundUpdate, UpdateFeed, UpdateKind};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays scripted poll results, then parks until the listener is cancelled.
#[derive(Default, Debug)]
pub struct ScriptedFeed {
    script: Mutex<VecDeque<Result<Vec<InboundUpdate>, ChatError>>>,
    offsets: Mutex<Vec<i64>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, updates: Vec<InboundUpdate>) {
        self.script.lock().expect("feed script").push_back(Ok(updates));
    }

    pub fn push_error(&self, err: ChatError) {
        self.script.lock().expect("feed script").push_back(Err(err));
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().expect("feed offsets").clone()
    }
}

#[async_trait]
impl UpdateFeed for ScriptedFeed {
    async fn poll(&self, offset: i64) -> Result<Vec<InboundUpdate>, ChatError> {
        self.offsets.lock().expect("feed offsets").push(offset);
        let next = self.script.lock().expect("feed script").pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

pub fn contact(update_id: i64, chat_id: i64, phone_number: &str) -> InboundUpdate {
    InboundUpdate {
        update_id,
        chat_id,
        private: true,
        kind: UpdateKind::ContactShared {
            phone_number: phone_number.to_string(),
        },
    }
}

pub fn text(update_id: i64, chat_id: i64, text: &str) -> InboundUpdate {
    InboundUpdate {
        update_id,
        chat_id,
        private: true,
        kind: UpdateKind::Text(text.to_string()),
    }
}
