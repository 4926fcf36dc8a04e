use std::collections::HashMap;
use std::sync::Arc;

use kbchat::agent::Agent;
use kbchat::models::message::Message;
use tokio::sync::Mutex;

/// The conversation history of one chat session
#[derive(Debug, Default)]
pub struct Session {
    pub messages: Vec<Message>,
}

/// Sessions by id. Each session is locked for the duration of a turn, so
/// turns of one session run one after the other while different sessions
/// proceed concurrently.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session with this id, created empty on first use
    pub async fn session(&self, id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// None when the agent failed to start; chat requests are refused
    pub agent: Option<Arc<Agent>>,
    pub sessions: SessionStore,
    pub history_window: usize,
}

impl AppState {
    pub fn new(agent: Option<Agent>, history_window: usize) -> Self {
        Self {
            agent: agent.map(Arc::new),
            sessions: SessionStore::new(),
            history_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_is_created_once() {
        let store = SessionStore::new();

        let first = store.session("abc").await;
        first
            .lock()
            .await
            .messages
            .push(Message::user().with_text("hello"));

        let again = store.session("abc").await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.lock().await.messages.len(), 1);

        let other = store.session("xyz").await;
        assert!(other.lock().await.messages.is_empty());
        assert_eq!(store.len().await, 2);
    }
}
