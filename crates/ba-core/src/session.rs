use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

// ─── SessionToken ─────────────────────────────────────────────────────────

/// Opaque, randomly generated key for one chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── SessionRegistry ──────────────────────────────────────────────────────

/// Maps session tokens to the [`RequestContext`] of the turn that owns them.
///
/// Used only when tool execution happens behind a boundary that can't carry
/// a typed context: an in-process agent loop calling registered functions, or
/// a CLI subprocess calling back over HTTP. Entries live exactly as long as
/// the [`SessionGuard`] returned by [`register`](Self::register).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<Mutex<HashMap<SessionToken, RequestContext>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctx` under a fresh token. Dropping the guard unregisters it.
    pub fn register(&self, ctx: RequestContext) -> SessionGuard {
        let token = SessionToken::generate();
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(token.clone(), ctx);
        tracing::debug!(session = %token, "session registered");
        SessionGuard {
            registry: self.clone(),
            token,
        }
    }

    pub fn lookup(&self, token: &SessionToken) -> Option<RequestContext> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(token)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, token: &SessionToken) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(token);
        tracing::debug!(session = %token, "session unregistered");
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Keeps a registry entry alive; removes it on drop, whatever the exit path.
#[must_use = "the session is unregistered as soon as the guard is dropped"]
pub struct SessionGuard {
    registry: SessionRegistry,
    token: SessionToken,
}

impl SessionGuard {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.token);
    }
}
