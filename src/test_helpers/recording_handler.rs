//! Handler double that records deliveries and can be told to fail or veto.

use crate::error::{QueueError, QueueResult};
use crate::messaging::{Message, MessageHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct Recording {
    messages: Vec<Message>,
    failing_types: HashSet<String>,
    pending_rejections: usize,
    confirms: usize,
    commits: usize,
    aborts: usize,
}

#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    recording: Mutex<Recording>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recording: Mutex::new(Recording::default()),
        }
    }

    /// Veto the next `count` confirmations
    pub fn reject_next_confirms(&self, count: usize) {
        self.recording.lock().pending_rejections += count;
    }

    /// Return a handler error for every message of this type
    pub fn fail_on_message_type(&self, message_type: impl Into<String>) {
        self.recording.lock().failing_types.insert(message_type.into());
    }

    /// Every delivery in order, including deliveries of rolled-back batches
    pub fn messages(&self) -> Vec<Message> {
        self.recording.lock().messages.clone()
    }

    pub fn message_types(&self) -> Vec<String> {
        self.recording
            .lock()
            .messages
            .iter()
            .map(|m| m.message_type.clone())
            .collect()
    }

    pub fn message_numbers(&self) -> Vec<i64> {
        self.recording
            .lock()
            .messages
            .iter()
            .map(|m| m.message_number)
            .collect()
    }

    pub fn confirm_count(&self) -> usize {
        self.recording.lock().confirms
    }

    pub fn commit_count(&self) -> usize {
        self.recording.lock().commits
    }

    pub fn abort_count(&self) -> usize {
        self.recording.lock().aborts
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &Message) -> QueueResult<()> {
        let mut recording = self.recording.lock();
        if recording.failing_types.contains(&message.message_type) {
            return Err(QueueError::handler(
                &self.name,
                format!("refusing message type {}", message.message_type),
            ));
        }
        recording.messages.push(message.clone());
        Ok(())
    }

    async fn confirm(&self) -> bool {
        let mut recording = self.recording.lock();
        recording.confirms += 1;
        if recording.pending_rejections > 0 {
            recording.pending_rejections -= 1;
            return false;
        }
        true
    }

    async fn commit(&self) -> bool {
        self.recording.lock().commits += 1;
        true
    }

    async fn abort(&self) {
        self.recording.lock().aborts += 1;
    }
}
