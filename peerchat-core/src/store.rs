//! Append-only conversation history for the lifetime of the session owner.

use std::sync::Arc;

use crate::protocol::{ChatDocument, ChatMessage};

/// Two independent logs, each in append order. Nothing is ever removed.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Arc<ChatMessage>>,
    documents: Vec<Arc<ChatDocument>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(Arc::new(message));
    }

    pub fn push_document(&mut self, document: ChatDocument) {
        self.documents.push(Arc::new(document));
    }

    pub fn messages(&self) -> &[Arc<ChatMessage>] {
        &self.messages
    }

    pub fn documents(&self) -> &[Arc<ChatDocument>] {
        &self.documents
    }

    /// Snapshots share entries with the store; only the pointers are copied.
    pub fn message_snapshot(&self) -> Vec<Arc<ChatMessage>> {
        self.messages.clone()
    }

    pub fn document_snapshot(&self) -> Vec<Arc<ChatDocument>> {
        self.documents.clone()
    }
}
