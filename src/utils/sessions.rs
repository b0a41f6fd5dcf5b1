// src/utils/sessions.rs

//! Registry of live `/ws/session` connections.
//!
//! Each authenticated principal owns at most one connection. Registering a new
//! connection for a principal evicts the previous one with a `force_logout`.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::utils::jwt::UserType;

pub const FORCE_LOGOUT_MESSAGE: &str = "Your session ended because you signed in on another device";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has ended";

/// Messages pushed from the server to a session socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userType")]
        user_type: UserType,
    },
    Pong,
    Error {
        message: String,
    },
    ForceLogout {
        message: String,
    },
    SessionExpired {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The socket is closed right after one of these is delivered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::ForceLogout { .. } | ServerMessage::SessionExpired { .. }
        )
    }
}

/// Identity of a logged-in principal. Internal users and takers live in
/// separate tables, so the id alone is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Principal {
    pub user_type: UserType,
    pub id: i64,
}

#[derive(Debug)]
struct Connection {
    conn_id: u64,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Debug, Default)]
struct Inner {
    by_principal: HashMap<Principal, Connection>,
    by_session: HashMap<Uuid, Principal>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for a freshly upgraded socket.
    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Binds a connection to a principal.
    ///
    /// Returns `true` when an older connection of the same principal was evicted.
    pub async fn register(
        &self,
        principal: Principal,
        session_id: Uuid,
        conn_id: u64,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        let mut inner = self.inner.write().await;

        let evicted = match inner.by_principal.remove(&principal) {
            Some(old) if old.conn_id != conn_id => {
                inner.by_session.remove(&old.session_id);
                let _ = old.tx.send(ServerMessage::ForceLogout {
                    message: FORCE_LOGOUT_MESSAGE.to_string(),
                });
                true
            }
            Some(old) => {
                inner.by_session.remove(&old.session_id);
                false
            }
            None => false,
        };

        inner.by_session.insert(session_id, principal);
        inner.by_principal.insert(
            principal,
            Connection {
                conn_id,
                session_id,
                tx,
            },
        );

        evicted
    }

    /// Removes a closed connection. A no-op when the principal is already
    /// served by a newer connection.
    pub async fn unregister(&self, principal: Principal, conn_id: u64) {
        let mut inner = self.inner.write().await;

        let is_current = inner
            .by_principal
            .get(&principal)
            .is_some_and(|c| c.conn_id == conn_id);

        if is_current {
            if let Some(conn) = inner.by_principal.remove(&principal) {
                inner.by_session.remove(&conn.session_id);
            }
        }
    }

    /// Kicks the principal's connection, used when the principal logs in elsewhere.
    pub async fn force_disconnect(&self, principal: Principal) -> bool {
        let mut inner = self.inner.write().await;

        match inner.by_principal.remove(&principal) {
            Some(conn) => {
                inner.by_session.remove(&conn.session_id);
                let _ = conn.tx.send(ServerMessage::ForceLogout {
                    message: FORCE_LOGOUT_MESSAGE.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Ends the connection bound to a session, used on logout.
    pub async fn disconnect_session(&self, session_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;

        let Some(principal) = inner.by_session.remove(&session_id) else {
            return false;
        };

        match inner.by_principal.remove(&principal) {
            Some(conn) => {
                let _ = conn.tx.send(ServerMessage::SessionExpired {
                    message: SESSION_EXPIRED_MESSAGE.to_string(),
                });
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn is_connected(&self, principal: Principal) -> bool {
        self.inner.read().await.by_principal.contains_key(&principal)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_principal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taker(id: i64) -> Principal {
        Principal {
            user_type: UserType::Taker,
            id,
        }
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let c1 = registry.next_connection_id();
        let c2 = registry.next_connection_id();

        assert!(!registry.register(taker(1), Uuid::new_v4(), c1, tx1).await);
        assert!(registry.register(taker(1), Uuid::new_v4(), c2, tx2).await);

        assert!(matches!(
            rx1.recv().await,
            Some(ServerMessage::ForceLogout { .. })
        ));
        assert!(rx2.try_recv().is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn stale_close_does_not_evict_replacement() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let c1 = registry.next_connection_id();
        let c2 = registry.next_connection_id();

        registry.register(taker(7), Uuid::new_v4(), c1, tx1).await;
        registry.register(taker(7), Uuid::new_v4(), c2, tx2).await;

        // The evicted socket closes after its replacement registered.
        registry.unregister(taker(7), c1).await;
        assert!(registry.is_connected(taker(7)).await);

        registry.unregister(taker(7), c2).await;
        assert!(!registry.is_connected(taker(7)).await);
    }

    #[tokio::test]
    async fn principals_of_different_types_do_not_collide() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let admin = Principal {
            user_type: UserType::Internal,
            id: 1,
        };

        registry
            .register(taker(1), Uuid::new_v4(), registry.next_connection_id(), tx1)
            .await;
        let evicted = registry
            .register(admin, Uuid::new_v4(), registry.next_connection_id(), tx2)
            .await;

        assert!(!evicted);
        assert!(rx1.try_recv().is_err());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn disconnect_session_sends_session_expired() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sid = Uuid::new_v4();

        registry
            .register(taker(3), sid, registry.next_connection_id(), tx)
            .await;

        assert!(registry.disconnect_session(sid).await);
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::SessionExpired { .. })
        ));
        assert!(!registry.disconnect_session(sid).await);
        assert!(!registry.is_connected(taker(3)).await);
    }

    #[tokio::test]
    async fn force_disconnect_without_connection_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.force_disconnect(taker(42)).await);
    }

    #[test]
    fn server_messages_use_snake_case_tags() {
        let json = serde_json::to_value(ServerMessage::AuthSuccess {
            user_id: "5".into(),
            user_type: UserType::Taker,
        })
        .unwrap();
        assert_eq!(json["type"], "auth_success");
        assert_eq!(json["userId"], "5");
        assert_eq!(json["userType"], "taker");

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        assert!(
            ServerMessage::ForceLogout {
                message: String::new()
            }
            .is_terminal()
        );
        assert!(!ServerMessage::Pong.is_terminal());
    }
}
