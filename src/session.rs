//! Per-session activation state.
//!
//! An [`McpSession`] is created on MCP `initialize` and identified by an
//! opaque 256-bit random id returned in the `Mcp-Session-Id` header. The
//! session records which catalog servers were activated and the tool names
//! each activation discovered. All state is in-memory and dies with the
//! process.
//!
//! Operations within one session serialize behind the session's async
//! mutex; this also makes `enable` single-flight per (session, server), so
//! concurrent enables cannot trigger duplicate discovery. Cross-session
//! activity is fully independent.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;

/// Activation state guarded by the session mutex
#[derive(Debug, Default)]
pub struct SessionState {
    /// Server name → ordered tool names discovered at activation
    pub enabled: HashMap<String, Vec<String>>,
}

/// One inbound client conversation
#[derive(Debug)]
pub struct McpSession {
    /// Opaque session identifier assigned at `initialize`
    pub id: String,
    /// Activation state; locking it serializes the session's operations
    pub state: Mutex<SessionState>,
}

impl McpSession {
    /// Whether `server` is activated in this session
    pub async fn is_enabled(&self, server: &str) -> bool {
        self.state.lock().await.enabled.contains_key(server)
    }

    /// Names of all servers activated in this session
    pub async fn enabled_servers(&self) -> Vec<String> {
        self.state.lock().await.enabled.keys().cloned().collect()
    }
}

/// Concurrent store of live sessions keyed by session id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<McpSession>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session with a newly generated id
    pub fn create(&self) -> Arc<McpSession> {
        let session = Arc::new(McpSession {
            id: generate_session_id(),
            state: Mutex::new(SessionState::default()),
        });
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        session
    }

    /// Look up a session by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<McpSession>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Remove a session; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Generate an opaque session id: 32 random bytes, base64url encoded.
fn generate_session_id() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
