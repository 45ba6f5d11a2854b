//! Context registry.
//!
//! Owns every [`WorkspaceContext`] and the single active-context pointer.
//! The active id always names a registered context and the local context
//! can never be removed. All mutation goes through `&mut self`, so the
//! pause → repoint → resume sequence of a switch cannot interleave with
//! another registry call.

use crate::context::{ContextInfo, WorkspaceContext, LOCAL_CONTEXT_ID};
use crate::ContextError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a successful switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub previous_context_id: String,
    pub current: ContextInfo,
}

/// Registry of workspace contexts.
pub struct ContextRegistry {
    contexts: HashMap<String, WorkspaceContext>,
    active_id: String,
}

impl ContextRegistry {
    /// Create a registry whose first and active context is `local`.
    pub fn new(local: WorkspaceContext) -> Result<Self, ContextError> {
        if local.id() != LOCAL_CONTEXT_ID {
            return Err(ContextError::Invalid(format!(
                "registry must be seeded with '{}', got '{}'",
                LOCAL_CONTEXT_ID,
                local.id()
            )));
        }

        let mut contexts = HashMap::new();
        contexts.insert(LOCAL_CONTEXT_ID.to_string(), local);

        Ok(Self {
            contexts,
            active_id: LOCAL_CONTEXT_ID.to_string(),
        })
    }

    /// Add a context. It is not started or activated.
    pub fn register(&mut self, context: WorkspaceContext) -> Result<(), ContextError> {
        if context.is_disposed() {
            return Err(ContextError::Disposed(context.id().to_string()));
        }
        if self.contexts.contains_key(context.id()) {
            return Err(ContextError::Duplicate(context.id().to_string()));
        }

        tracing::debug!(context_id = %context.id(), kind = ?context.kind(), "Context registered");
        self.contexts.insert(context.id().to_string(), context);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkspaceContext> {
        self.contexts.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    /// The active context.
    pub fn active(&self) -> Result<&WorkspaceContext, ContextError> {
        self.contexts
            .get(&self.active_id)
            .ok_or_else(|| ContextError::NotFound(self.active_id.clone()))
    }

    /// Make `id` the active context.
    ///
    /// Pauses the outgoing context's watcher, repoints, then resumes the
    /// incoming one. On error nothing changes.
    pub fn switch(&mut self, id: &str) -> Result<SwitchResult, ContextError> {
        let Some(next) = self.contexts.get(id) else {
            return Err(ContextError::NotFound(id.to_string()));
        };

        let previous_context_id = self.active_id.clone();
        if previous_context_id == id {
            return Ok(SwitchResult {
                previous_context_id,
                current: next.info(),
            });
        }

        if let Some(current) = self.contexts.get(&previous_context_id) {
            current.pause();
        }

        self.active_id = id.to_string();

        let next = &self.contexts[id];
        next.resume();

        tracing::info!(from = %previous_context_id, to = %id, "Switched active context");

        Ok(SwitchResult {
            previous_context_id,
            current: next.info(),
        })
    }

    /// Dispose and remove a context.
    ///
    /// Destroying the active context first switches to local; the switch
    /// result is returned so the caller can rewire event forwarding.
    pub fn destroy(&mut self, id: &str) -> Result<Option<SwitchResult>, ContextError> {
        if id == LOCAL_CONTEXT_ID {
            return Err(ContextError::Permanent(id.to_string()));
        }
        if !self.contexts.contains_key(id) {
            return Err(ContextError::NotFound(id.to_string()));
        }

        let fallback = if self.active_id == id {
            Some(self.switch(LOCAL_CONTEXT_ID)?)
        } else {
            None
        };

        if let Some(context) = self.contexts.remove(id) {
            context.dispose();
        }

        tracing::info!(context_id = %id, "Context destroyed");
        Ok(fallback)
    }

    /// Public listing: local first, then by id.
    pub fn list(&self) -> Vec<ContextInfo> {
        let mut infos: Vec<_> = self.contexts.values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| {
            (a.id != LOCAL_CONTEXT_ID)
                .cmp(&(b.id != LOCAL_CONTEXT_ID))
                .then_with(|| a.id.cmp(&b.id))
        });
        infos
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Dispose every context. Only for process shutdown.
    pub fn dispose_all(&mut self) {
        for context in self.contexts.values() {
            context.dispose();
        }
        tracing::info!(count = self.contexts.len(), "All contexts disposed");
    }
}
