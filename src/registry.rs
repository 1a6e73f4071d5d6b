use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::endpoint::{Role, Tx};
use crate::error::ErrorKind;
use crate::message::SessionSummary;

/// a session's view of one attached endpoint: just enough to reach it, never
/// the socket itself (the transport listener owns that).
#[derive(Clone)]
struct Attached {
    id: String,
    tx: Tx,
}

/// a rendezvous group keyed by session id.
///
/// invariants upheld by every `Registry` mutation below:
/// at most one endpoint is host; an endpoint appears in at most one session;
/// the session is reaped (never mutated here) once host and clients are both
/// empty and it has aged past the reclamation threshold.
struct Session {
    host: Option<Attached>,
    clients: HashMap<String, Attached>,
    created_at: Instant,
    password: Option<String>,
    nickname: Option<String>,
    settings: Option<Value>,
}

impl Session {
    fn fresh() -> Self {
        Self {
            host: None,
            clients: HashMap::new(),
            created_at: Instant::now(),
            password: None,
            nickname: None,
            settings: None,
        }
    }

    fn is_live(&self) -> bool {
        self.host.is_some() || !self.clients.is_empty()
    }
}

/// outcome of a successful `create_or_revive`/`join_as_host` call.
///
/// `revived` distinguishes a brand new session from a host reattaching to
/// one that was still held open by a remaining client; the router currently
/// emits the same `peer_joined` notification either way, but the registry
/// still surfaces the distinction for callers that want to log or audit it.
pub struct Attach {
    pub session_id: String,
    pub revived: bool,
}

/// result of detaching an endpoint, carrying what the router needs to emit
/// departure notifications.
pub struct Departure {
    pub session_id: String,
    pub role: Role,
    /// remaining client ids, needed to notify them on host departure.
    pub remaining_clients: Vec<(String, Tx)>,
    /// the host's id and tx, needed to notify it on client departure.
    pub host: Option<(String, Tx)>,
}

/// counts surfaced by the `/health` probe.
pub struct Snapshot {
    pub sessions: usize,
    pub clients: usize,
}

pub struct LookupResult {
    pub has_host: bool,
    pub client_count: usize,
    pub nickname: Option<String>,
    pub password_protected: bool,
    pub settings: Option<Value>,
}

impl LookupResult {
    pub fn into_summary(self, found: bool) -> SessionSummary {
        SessionSummary {
            found,
            has_host: self.has_host,
            client_count: self.client_count,
            nickname: self.nickname,
            password_protected: self.password_protected,
            settings: self.settings,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    /// reverse index: endpoint id -> (session id, role). Kept inside the
    /// same lock as `sessions` so the two never drift apart.
    attachments: HashMap<String, (String, Role)>,
}

/// authoritative map from session id to its host/client endpoints.
///
/// a single `RwLock` guards both the session table and the attachment
/// index; per-session locks would be a valid optimization but session
/// create/destroy must stay globally serialized regardless, so one lock is
/// simplest and is what this implementation uses.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn fold(session_id: &str) -> String {
        session_id.to_lowercase()
    }

    /// `create_session`: errors `AlreadyExists` if a *live* session owns the
    /// id, otherwise creates (or revives an emptied-out, not-yet-reaped)
    /// entry with this endpoint as host.
    pub async fn create_or_revive(
        &self,
        endpoint_id: &str,
        tx: Tx,
        session_id: Option<String>,
        password: Option<String>,
        settings: Option<Value>,
    ) -> Result<Attach, ErrorKind> {
        let mut inner = self.inner.write().await;
        let id = Self::fold(&session_id.unwrap_or_else(new_session_id));
        if id.is_empty() {
            return Err(ErrorKind::InvalidMessage);
        }

        let revived = match inner.sessions.get(&id) {
            Some(s) if s.is_live() => return Err(ErrorKind::AlreadyExists),
            Some(_) => true,
            None => false,
        };

        let session = inner.sessions.entry(id.clone()).or_insert_with(Session::fresh);
        session.host = Some(Attached {
            id: endpoint_id.to_string(),
            tx,
        });
        session.password = password;
        session.settings = settings;

        inner
            .attachments
            .insert(endpoint_id.to_string(), (id.clone(), Role::Host));

        Ok(Attach {
            session_id: id,
            revived,
        })
    }

    /// `host` / `join{isHost:true}`: attaches as host to an existing session
    /// with no live host, or creates a new one. Errors `HostConflict` if
    /// another live host is already attached.
    pub async fn join_as_host(&self, endpoint_id: &str, tx: Tx, session_id: &str) -> Result<Attach, ErrorKind> {
        let mut inner = self.inner.write().await;
        let id = Self::fold(session_id);
        if id.is_empty() {
            return Err(ErrorKind::InvalidMessage);
        }

        let revived = match inner.sessions.get(&id) {
            Some(s) if s.host.is_some() => return Err(ErrorKind::HostConflict),
            Some(_) => true,
            None => false,
        };

        let session = inner.sessions.entry(id.clone()).or_insert_with(Session::fresh);
        session.host = Some(Attached {
            id: endpoint_id.to_string(),
            tx,
        });

        inner
            .attachments
            .insert(endpoint_id.to_string(), (id.clone(), Role::Host));

        Ok(Attach {
            session_id: id,
            revived,
        })
    }

    /// `join{isHost:false}`: errors `NotFound` if no such session exists.
    pub async fn join_as_client(&self, endpoint_id: &str, tx: Tx, session_id: &str) -> Result<(), ErrorKind> {
        let mut inner = self.inner.write().await;
        let id = Self::fold(session_id);
        if !inner.sessions.contains_key(&id) {
            return Err(ErrorKind::NotFound);
        }

        inner.sessions.get_mut(&id).unwrap().clients.insert(
            endpoint_id.to_string(),
            Attached {
                id: endpoint_id.to_string(),
                tx,
            },
        );

        inner
            .attachments
            .insert(endpoint_id.to_string(), (id, Role::Client));

        Ok(())
    }

    /// detach `endpoint_id` from whatever session it is attached to, if any.
    pub async fn leave(&self, endpoint_id: &str) -> Option<Departure> {
        let mut inner = self.inner.write().await;
        let (session_id, role) = inner.attachments.remove(endpoint_id)?;
        let session = inner.sessions.get_mut(&session_id)?;

        match role {
            Role::Host => session.host = None,
            Role::Client => {
                session.clients.remove(endpoint_id);
            }
        }

        let remaining_clients = session
            .clients
            .values()
            .map(|a| (a.id.clone(), a.tx.clone()))
            .collect();
        let host = session.host.as_ref().map(|a| (a.id.clone(), a.tx.clone()));

        Some(Departure {
            session_id,
            role,
            remaining_clients,
            host,
        })
    }

    pub async fn lookup(&self, session_id: &str) -> Option<LookupResult> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(&Self::fold(session_id))?;
        Some(LookupResult {
            has_host: session.host.is_some(),
            client_count: session.clients.len(),
            nickname: session.nickname.clone(),
            password_protected: session.password.is_some(),
            settings: session.settings.clone(),
        })
    }

    /// must be host: updates the session password, returns the id of every
    /// client to notify plus the session id (for the confirmation reply).
    pub async fn set_password(
        &self,
        endpoint_id: &str,
        new_password: String,
    ) -> Result<(String, Vec<(String, Tx)>), ErrorKind> {
        let mut inner = self.inner.write().await;
        let (session_id, role) = inner
            .attachments
            .get(endpoint_id)
            .cloned()
            .ok_or(ErrorKind::NotInSession)?;

        if role != Role::Host {
            return Err(ErrorKind::NotHost);
        }

        let session = inner.sessions.get_mut(&session_id).ok_or(ErrorKind::NotInSession)?;
        session.password = Some(new_password);

        let clients = session
            .clients
            .values()
            .map(|a| (a.id.clone(), a.tx.clone()))
            .collect();
        Ok((session_id, clients))
    }

    /// must be host: updates the nickname, returns clients to notify.
    pub async fn set_nickname(
        &self,
        endpoint_id: &str,
        nickname: String,
    ) -> Result<(String, Vec<(String, Tx)>), ErrorKind> {
        let mut inner = self.inner.write().await;
        let (session_id, role) = inner
            .attachments
            .get(endpoint_id)
            .cloned()
            .ok_or(ErrorKind::NotInSession)?;

        if role != Role::Host {
            return Err(ErrorKind::NotHost);
        }

        let session = inner.sessions.get_mut(&session_id).ok_or(ErrorKind::NotInSession)?;
        session.nickname = Some(nickname);

        let clients = session
            .clients
            .values()
            .map(|a| (a.id.clone(), a.tx.clone()))
            .collect();
        Ok((session_id, clients))
    }

    /// current attachment of an endpoint, if any — used by the router to
    /// reject commands from a `fresh` endpoint with `not_in_session`.
    pub async fn attachment_of(&self, endpoint_id: &str) -> Option<(String, Role)> {
        self.inner.read().await.attachments.get(endpoint_id).cloned()
    }

    /// host's send handle for a session, if currently attached.
    pub async fn host_of(&self, session_id: &str) -> Option<Tx> {
        self.host_id_and_tx(session_id).await.map(|(_, tx)| tx)
    }

    /// the host's endpoint id alongside its send handle — needed by callers
    /// that must reap a stale host whose queue has gone dead.
    pub async fn host_id_and_tx(&self, session_id: &str) -> Option<(String, Tx)> {
        self.inner
            .read()
            .await
            .sessions
            .get(&Self::fold(session_id))
            .and_then(|s| s.host.as_ref())
            .map(|a| (a.id.clone(), a.tx.clone()))
    }

    /// a single client's send handle.
    pub async fn client_of(&self, session_id: &str, client_id: &str) -> Option<Tx> {
        self.inner
            .read()
            .await
            .sessions
            .get(&Self::fold(session_id))
            .and_then(|s| s.clients.get(client_id))
            .map(|a| a.tx.clone())
    }

    /// every client's send handle, keyed by id, excluding `exclude` if given.
    pub async fn clients_of(&self, session_id: &str, exclude: Option<&str>) -> Vec<(String, Tx)> {
        self.inner
            .read()
            .await
            .sessions
            .get(&Self::fold(session_id))
            .map(|s| {
                s.clients
                    .values()
                    .filter(|a| Some(a.id.as_str()) != exclude)
                    .map(|a| (a.id.clone(), a.tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// every other participant (host and clients) in a session, excluding
    /// one endpoint id — used by `broadcast`, which never echoes to its
    /// sender regardless of whether the sender is host or client.
    pub async fn broadcast_targets(&self, session_id: &str, exclude: &str) -> Vec<(String, Tx)> {
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(&Self::fold(session_id)) else {
            return Vec::new();
        };

        let host = session
            .host
            .as_ref()
            .filter(|a| a.id != exclude)
            .map(|a| (a.id.clone(), a.tx.clone()));

        host.into_iter()
            .chain(
                session
                    .clients
                    .values()
                    .filter(|a| a.id != exclude)
                    .map(|a| (a.id.clone(), a.tx.clone())),
            )
            .collect()
    }

    /// counts for the `/health` probe: live session count and total
    /// attached endpoints (host + clients) across all sessions.
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            sessions: inner.sessions.len(),
            clients: inner.attachments.len(),
        }
    }

    /// reap sessions whose host and clients are both empty and which have
    /// aged past `max_age`. Runs under the same lock as every other
    /// mutation, so it observes a consistent snapshot.
    pub async fn reap(&self, max_age: std::time::Duration) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let dead: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_live() && now.duration_since(s.created_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &dead {
            inner.sessions.remove(id);
        }

        dead
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_ids_are_case_folded() {
        let registry = Registry::new();
        let (tx, _rx) = Tx::new_pair();
        registry
            .create_or_revive("A", tx, Some("MixedCase".to_string()), None, None)
            .await
            .unwrap();

        assert!(registry.lookup("mixedcase").await.is_some());
        assert!(registry.lookup("MIXEDCASE").await.is_some());
    }

    #[tokio::test]
    async fn broadcast_targets_excludes_only_the_sender() {
        let registry = Registry::new();
        let (host_tx, _host_rx) = Tx::new_pair();
        registry
            .create_or_revive("A", host_tx, Some("S1".to_string()), None, None)
            .await
            .unwrap();

        let (client_tx, _client_rx) = Tx::new_pair();
        registry.join_as_client("B", client_tx, "S1").await.unwrap();

        let targets = registry.broadcast_targets("S1", "A").await;
        let ids: Vec<_> = targets.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["B".to_string()]);

        let targets = registry.broadcast_targets("S1", "B").await;
        let ids: Vec<_> = targets.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn revived_session_preserves_created_at() {
        let registry = Registry::new();
        let (tx, _rx) = Tx::new_pair();
        registry
            .create_or_revive("A", tx.clone(), Some("S1".to_string()), None, None)
            .await
            .unwrap();

        let created_before = {
            let inner = registry.inner.read().await;
            inner.sessions.get("s1").unwrap().created_at
        };

        registry.leave("A").await;
        registry.join_as_host("A", tx, "S1").await.unwrap();

        let created_after = {
            let inner = registry.inner.read().await;
            inner.sessions.get("s1").unwrap().created_at
        };

        assert_eq!(created_before, created_after);
    }

    #[tokio::test]
    async fn second_host_join_is_rejected() {
        let registry = Registry::new();
        let (host_tx, _host_rx) = Tx::new_pair();
        registry.join_as_host("A", host_tx, "S1").await.unwrap();

        let (other_tx, _other_rx) = Tx::new_pair();
        let err = registry.join_as_host("C", other_tx, "S1").await.unwrap_err();
        assert_eq!(err, ErrorKind::HostConflict);
    }
}
