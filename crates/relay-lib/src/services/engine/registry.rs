// Invocation Registry
//
// One live invocation per conversation. Starting a new one cancels whatever
// was still running for that conversation.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::driver::{Canceller, EngineDriver, EngineObserver, InvocationHandle};
use crate::models::engine::{ConversationId, EngineRequest, InvocationState};

struct ActiveInvocation {
    invocation_id: String,
    canceller: Canceller,
}

#[derive(Default)]
pub struct InvocationRegistry {
    active: RwLock<HashMap<ConversationId, ActiveInvocation>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` for its conversation. Returns `true` if a previous
    /// invocation was cancelled to make room.
    pub async fn register(&self, handle: &InvocationHandle) -> bool {
        let previous = self.active.write().await.insert(
            handle.conversation_id(),
            ActiveInvocation {
                invocation_id: handle.id().to_string(),
                canceller: handle.canceller(),
            },
        );

        match previous {
            Some(prev) => {
                log::info!(
                    "[InvocationRegistry] Superseding invocation {} for conversation {}",
                    prev.invocation_id,
                    handle.conversation_id()
                );
                prev.canceller.cancel()
            }
            None => false,
        }
    }

    /// Cancel the live invocation of a conversation, if any
    pub async fn cancel(&self, conversation_id: ConversationId) -> bool {
        let removed = self.active.write().await.remove(&conversation_id);
        match removed {
            Some(active) => {
                log::info!(
                    "[InvocationRegistry] Cancelling invocation {} for conversation {}",
                    active.invocation_id,
                    conversation_id
                );
                active.canceller.cancel()
            }
            None => false,
        }
    }

    /// Forget an invocation; a newer one for the same conversation is kept
    pub async fn remove(&self, conversation_id: ConversationId, invocation_id: &str) {
        let mut active = self.active.write().await;
        if active
            .get(&conversation_id)
            .map(|a| a.invocation_id == invocation_id)
            .unwrap_or(false)
        {
            active.remove(&conversation_id);
        }
    }

    pub async fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.active.read().await.contains_key(&conversation_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Invoke, track until finished, then unregister
    pub async fn run(
        &self,
        driver: &EngineDriver,
        request: EngineRequest,
        observer: Arc<dyn EngineObserver>,
    ) -> InvocationState {
        let handle = driver.invoke(request, observer);
        let conversation_id = handle.conversation_id();
        let invocation_id = handle.id().to_string();

        self.register(&handle).await;
        let state = handle.join().await;
        self.remove(conversation_id, &invocation_id).await;
        state
    }
}
