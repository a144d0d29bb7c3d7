//! In-process registry of tracked agent sessions.
//!
//! The dispatching side registers a session when it hands work to a coding
//! agent and updates the status as the subprocess progresses. The approval
//! coordinator only reads this registry: on an approved request it checks
//! that the session is actually waiting before flagging it resumable.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::session::{AgentSession, SessionStatus};

#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<DashMap<String, AgentSession>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Register a session, replacing any stale entry under the same id.
    pub fn register(&self, session_id: &str, agent_id: &str, status: SessionStatus) -> AgentSession {
        let now = Utc::now();
        let session = AgentSession {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            status,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session_id.to_string(), session.clone());
        info!(session_id, agent_id, status = %status, "session registered");
        session
    }

    pub fn get(&self, session_id: &str) -> Option<AgentSession> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.get(session_id).map(|s| s.status)
    }

    pub fn list(&self) -> Vec<AgentSession> {
        let mut all: Vec<AgentSession> = self.sessions.iter().map(|s| s.value().clone()).collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.status = status;
                session.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Best-effort resume signal after an approval. Only a session that is
    /// actually waiting on a decision moves to `Resumable`; anything else is
    /// left alone and reported as a no-op.
    pub fn signal_resumable(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.status == SessionStatus::AwaitingApproval => {
                session.status = SessionStatus::Resumable;
                session.updated_at = Utc::now();
                info!(session_id, "session flagged resumable");
                true
            }
            Some(session) => {
                debug!(
                    session_id,
                    status = %session.status,
                    "resume signal skipped, session not awaiting approval"
                );
                false
            }
            None => {
                debug!(session_id, "resume signal skipped, unknown session");
                false
            }
        }
    }
}
