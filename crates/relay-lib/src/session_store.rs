// Resume token storage
//
// The driver only needs get/set/clear on a per-conversation token. Durable
// storage lives with the caller; `MemorySessionStore` covers tests and the CLI.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::engine::ConversationId;

/// Per-conversation resume token storage
pub trait SessionStore: Send + Sync {
    fn get_resume_token(&self, conversation_id: ConversationId) -> Option<String>;

    fn set_resume_token(&self, conversation_id: ConversationId, token: &str);

    fn clear_resume_token(&self, conversation_id: ConversationId);
}

/// In-process session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: RwLock<HashMap<ConversationId, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get_resume_token(&self, conversation_id: ConversationId) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens.get(&conversation_id).cloned()
    }

    fn set_resume_token(&self, conversation_id: ConversationId, token: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(conversation_id, token.to_string());
    }

    fn clear_resume_token(&self, conversation_id: ConversationId) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&conversation_id);
    }
}
