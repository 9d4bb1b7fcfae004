use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use anyhow::Result;
use swapdesk_types::OutgoingMessage;

/// The chat network as seen by the dispatcher.
pub trait ChatTransport: Send + Sync + 'static {
    fn send(&self, message: OutgoingMessage) -> impl Future<Output = Result<()>> + Send;

    /// Handles of the administrators of `chat_id`, fetched fresh.
    fn chat_administrators(&self, chat_id: i64) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// In-process transport that records everything it is asked to send.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    admins: Mutex<HashMap<i64, Vec<String>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_admins(&self, chat_id: i64, handles: &[&str]) {
        let handles = handles.iter().map(|h| h.to_string()).collect();
        self.admins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id, handles);
    }

    /// Everything sent so far, oldest first. Clears the log.
    pub fn take(&self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }
}

impl ChatTransport for MemoryTransport {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }

    async fn chat_administrators(&self, chat_id: i64) -> Result<Vec<String>> {
        Ok(self
            .admins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }
}
