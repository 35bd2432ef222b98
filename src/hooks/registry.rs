//! Named hook definitions and the registry that owns them

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::action::{ActionKind, HandlerReply};

/// Per-invocation data passed to a handler
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub hook_id: String,
    pub label: String,
    pub subject_id: String,
    pub args: Vec<String>,
}

/// A hook handler: an async callback from context to reply
pub type Handler = Arc<dyn Fn(ActionContext) -> BoxFuture<'static, HandlerReply> + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerReply> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, HandlerReply> { Box::pin(f(ctx)) })
}

/// Optional handler slots, one per action kind
#[derive(Clone, Default)]
pub struct HookHandlers {
    pub on_purchase: Option<Handler>,
    pub on_remove: Option<Handler>,
    pub on_renew: Option<Handler>,
}

impl HookHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_purchase(mut self, handler: Handler) -> Self {
        self.on_purchase = Some(handler);
        self
    }

    pub fn on_remove(mut self, handler: Handler) -> Self {
        self.on_remove = Some(handler);
        self
    }

    pub fn on_renew(mut self, handler: Handler) -> Self {
        self.on_renew = Some(handler);
        self
    }

    /// Explicit kind-to-slot lookup
    pub fn get(&self, kind: ActionKind) -> Option<&Handler> {
        match kind {
            ActionKind::Purchase => self.on_purchase.as_ref(),
            ActionKind::Remove => self.on_remove.as_ref(),
            ActionKind::Renew => self.on_renew.as_ref(),
        }
    }

    /// Kinds this set of handlers covers, for display
    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

impl fmt::Debug for HookHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookHandlers")
            .field("on_purchase", &self.on_purchase.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("on_renew", &self.on_renew.is_some())
            .finish()
    }
}

/// A named bundle of optional handlers, immutable once registered
#[derive(Debug, Clone)]
pub struct Hook {
    pub id: String,
    pub label: String,
    handlers: HookHandlers,
}

impl Hook {
    pub fn handler(&self, kind: ActionKind) -> Option<&Handler> {
        self.handlers.get(kind)
    }

    pub fn handled_kinds(&self) -> Vec<ActionKind> {
        self.handlers.kinds()
    }
}

/// Hook registration errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("hook id must be a non-empty string")]
    EmptyId,

    #[error("hook '{0}' must have a non-empty label")]
    EmptyLabel(String),

    #[error("hook '{0}' is already registered")]
    Duplicate(String),
}

/// Registry of named hooks. The registry is the sole owner of hook
/// definitions; scheduled actions reference hooks by id only.
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Arc<Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new hook. Fails without side effects on an empty id or
    /// label, or when the id is already taken.
    pub fn register(
        &self,
        id: &str,
        label: &str,
        handlers: HookHandlers,
    ) -> Result<Arc<Hook>, RegistryError> {
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if label.trim().is_empty() {
            return Err(RegistryError::EmptyLabel(id.to_string()));
        }

        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        if hooks.contains_key(id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }

        let hook = Arc::new(Hook {
            id: id.to_string(),
            label: label.to_string(),
            handlers,
        });
        hooks.insert(id.to_string(), hook.clone());
        debug!("registered hook '{}' ({})", id, label);
        Ok(hook)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Hook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of all registered hooks
    pub fn get_all(&self) -> HashMap<String, Arc<Hook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove a hook. Removing an absent id is a warning-only no-op.
    pub fn remove(&self, id: &str) {
        let removed = self
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(hook) => debug!("removed hook '{}' ({})", hook.id, hook.label),
            None => warn!("cannot remove hook '{}': not registered", id),
        }
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
