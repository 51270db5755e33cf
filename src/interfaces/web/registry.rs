use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::config::ServerConfig;
use crate::core::pipeline::ConversationContext;
use crate::core::pipeline::orchestrator::DEFAULT_MAX_TURNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationLimits {
    pub max_conversations: usize,
    pub idle: Duration,
    pub max_turns: usize,
}

impl Default for ConversationLimits {
    fn default() -> Self {
        Self {
            max_conversations: 1000,
            idle: Duration::from_secs(3600),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

impl ConversationLimits {
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            max_conversations: server.max_conversations.max(1),
            idle: server.conversation_idle(),
            max_turns: server.max_history_turns.max(1),
        }
    }
}

/// Conversations held by the HTTP surface. Idle ones expire; past `max_conversations` the
/// least recently active one is dropped, idle conversations first.
#[derive(Debug)]
pub struct Conversations {
    contexts: HashMap<String, ConversationContext>,
    limits: ConversationLimits,
}

impl Conversations {
    pub fn new(limits: ConversationLimits) -> Self {
        Self {
            contexts: HashMap::new(),
            limits,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ConversationContext> {
        self.contexts.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ConversationContext> {
        self.contexts.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ConversationContext> {
        self.contexts.remove(id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// The conversation `id`, created (after making room) when it does not exist.
    pub fn open(&mut self, id: &str) -> &mut ConversationContext {
        if !self.contexts.contains_key(id) {
            self.expire_idle();
            self.make_room();
        }
        let max_turns = self.limits.max_turns;
        self.contexts
            .entry(id.to_string())
            .or_insert_with(|| ConversationContext::with_id(id).with_max_turns(max_turns))
    }

    pub fn cancel_all(&mut self) {
        for context in self.contexts.values_mut() {
            context.cancel();
        }
    }

    fn expire_idle(&mut self) {
        let now = Instant::now();
        let idle = self.limits.idle;
        self.contexts.retain(|id, context| {
            let keep = context.is_busy() || now.duration_since(context.last_active()) < idle;
            if !keep {
                debug!(conversation_id = %id, "Expiring idle conversation");
            }
            keep
        });
    }

    fn make_room(&mut self) {
        while self.contexts.len() >= self.limits.max_conversations {
            let Some(victim) = self
                .contexts
                .iter()
                .min_by_key(|(_, c)| (c.is_busy(), c.last_active()))
                .map(|(id, _)| id.clone())
            else {
                return;
            };
            if let Some(mut context) = self.contexts.remove(&victim) {
                info!(conversation_id = %victim, "Evicting conversation to stay within limits");
                context.cancel();
            }
        }
    }
}
