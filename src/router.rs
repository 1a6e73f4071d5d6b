use std::sync::Arc;

use crate::endpoint::{Role, SendError, Tx};
use crate::error::ErrorKind;
use crate::message::{Command, NegotiationFrame, Outbound};
use crate::registry::Registry;

/// interprets and routes the control messages of the wire protocol.
///
/// holds no state of its own beyond the registry reference — every routing
/// decision is made by reading/mutating the registry under its lock, then
/// sending to the endpoints it names, always after releasing that lock (no
/// send happens while the registry lock is held).
pub struct SignalingRouter {
    registry: Arc<Registry>,
}

impl SignalingRouter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// send to an endpoint other than the caller, treating a failed send
    /// (full queue or a transport that already hung up) as discovery of a
    /// stale endpoint: it is immediately departed, same as if its transport
    /// had closed on its own. A full queue is logged under the
    /// `slow_consumer` identity (§7) since it means this endpoint fell far
    /// enough behind to trip backpressure, not merely that it disconnected.
    async fn deliver(&self, endpoint_id: &str, tx: &Tx, body: String) {
        if let Err(e) = tx.send(body) {
            if e == SendError::Full {
                log::warn!(
                    "{}: endpoint_id={endpoint_id}",
                    ErrorKind::SlowConsumer.message()
                );
            }
            tx.close();
            self.depart(endpoint_id).await;
        }
    }

    /// dispatch one decoded text frame from `endpoint_id`. Replies meant for
    /// the sender are sent directly on `tx`; anything else is sent to the
    /// recipients the routing rules name.
    pub async fn on_text(&self, endpoint_id: &str, tx: &Tx, text: &str) {
        let Some(kind) = crate::message::peek_type(text) else {
            self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::InvalidMessage).to_text())
                .await;
            return;
        };

        match kind.as_str() {
            "offer" | "answer" | "ice_candidate" | "broadcast" | "client-info" => {
                self.on_opaque_frame(endpoint_id, tx, kind, text).await;
            }
            _ => self.on_command(endpoint_id, tx, text).await,
        }
    }

    async fn on_command(&self, endpoint_id: &str, tx: &Tx, text: &str) {
        let command = match serde_json::from_str::<Command>(text) {
            Ok(c) => c,
            Err(_) => {
                self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::InvalidMessage).to_text())
                    .await;
                return;
            }
        };

        match command {
            Command::CreateSession {
                session_id,
                password,
                settings,
            } => self.create_session(endpoint_id, tx, session_id, password, settings).await,
            Command::Host { session_id } => self.join_as_host(endpoint_id, tx, session_id).await,
            Command::Join { session_id, is_host } if is_host => {
                self.join_as_host(endpoint_id, tx, session_id).await
            }
            Command::Join { session_id, .. } => self.join_as_client(endpoint_id, tx, session_id).await,
            Command::Leave => self.leave(endpoint_id).await,
            Command::QuerySession { session_id } => self.query_session(endpoint_id, tx, session_id).await,
            Command::UpdatePassword { session_id, password } => {
                self.update_password(endpoint_id, tx, session_id, password).await
            }
            Command::UpdateDeviceInfo { session_id, nickname } => {
                self.update_device_info(endpoint_id, tx, session_id, nickname).await
            }
        }
    }

    async fn create_session(
        &self,
        endpoint_id: &str,
        tx: &Tx,
        session_id: Option<String>,
        password: Option<String>,
        settings: Option<serde_json::Value>,
    ) {
        match self
            .registry
            .create_or_revive(endpoint_id, tx.clone(), session_id, password, settings)
            .await
        {
            Ok(attach) => {
                self.deliver(
                    endpoint_id,
                    tx,
                    Outbound::SessionCreated {
                        session_id: attach.session_id.clone(),
                    }
                    .to_text(),
                )
                .await;
                self.notify_peer_joined_host(&attach.session_id, endpoint_id).await;
            }
            Err(kind) => {
                self.deliver(endpoint_id, tx, Outbound::error(kind).to_text()).await;
            }
        }
    }

    async fn join_as_host(&self, endpoint_id: &str, tx: &Tx, session_id: String) {
        match self.registry.join_as_host(endpoint_id, tx.clone(), &session_id).await {
            Ok(attach) => {
                self.deliver(
                    endpoint_id,
                    tx,
                    Outbound::Joined {
                        session_id: attach.session_id.clone(),
                        is_host: true,
                    }
                    .to_text(),
                )
                .await;
                self.notify_peer_joined_host(&attach.session_id, endpoint_id).await;
            }
            Err(kind) => {
                self.deliver(endpoint_id, tx, Outbound::error(kind).to_text()).await;
            }
        }
    }

    /// every client in the session learns the (re)attached host, per the
    /// peer-join notification rule — whether this is a brand new session or
    /// a host reattaching after a departure.
    async fn notify_peer_joined_host(&self, session_id: &str, host_id: &str) {
        let body = Outbound::PeerJoined {
            peer_id: host_id.to_string(),
            is_host: true,
        }
        .to_text();

        for (client_id, client_tx) in self.registry.clients_of(session_id, None).await {
            self.deliver(&client_id, &client_tx, body.clone()).await;
        }
    }

    async fn join_as_client(&self, endpoint_id: &str, tx: &Tx, session_id: String) {
        match self.registry.join_as_client(endpoint_id, tx.clone(), &session_id).await {
            Ok(()) => {
                self.deliver(
                    endpoint_id,
                    tx,
                    Outbound::Joined {
                        session_id: session_id.clone(),
                        is_host: false,
                    }
                    .to_text(),
                )
                .await;

                if let Some((host_id, host_tx)) = self.registry.host_id_and_tx(&session_id).await {
                    self.deliver(
                        &host_id,
                        &host_tx,
                        Outbound::PeerJoined {
                            peer_id: endpoint_id.to_string(),
                            is_host: false,
                        }
                        .to_text(),
                    )
                    .await;
                }
            }
            Err(kind) => {
                self.deliver(endpoint_id, tx, Outbound::error(kind).to_text()).await;
            }
        }
    }

    async fn leave(&self, endpoint_id: &str) {
        self.depart(endpoint_id).await;
    }

    /// shared by the explicit `leave` command, an unrecoverable transport
    /// close, and the reaper's stale-endpoint sweep.
    pub async fn depart(&self, endpoint_id: &str) {
        let Some(departure) = self.registry.leave(endpoint_id).await else {
            return;
        };

        match departure.role {
            Role::Host => {
                let body = Outbound::HostDisconnected.to_text();
                for (client_id, client_tx) in departure.remaining_clients {
                    self.deliver(&client_id, &client_tx, body.clone()).await;
                }
            }
            Role::Client => {
                if let Some((host_id, host_tx)) = departure.host {
                    self.deliver(
                        &host_id,
                        &host_tx,
                        Outbound::PeerDisconnected {
                            peer_id: endpoint_id.to_string(),
                        }
                        .to_text(),
                    )
                    .await;
                }
            }
        }
    }

    async fn query_session(&self, endpoint_id: &str, tx: &Tx, session_id: String) {
        if session_id.is_empty() {
            self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::InvalidMessage).to_text())
                .await;
            return;
        }

        let found = self.registry.lookup(&session_id).await;
        let reply = match found {
            Some(result) => Outbound::SessionResponse {
                found: true,
                session: Some(result.into_summary(true)),
            },
            None => Outbound::SessionResponse {
                found: false,
                session: None,
            },
        };

        self.deliver(endpoint_id, tx, reply.to_text()).await;
    }

    /// the wire message repeats `sessionId`, but a host can only ever be
    /// attached to the one session the registry already has it under, so
    /// that field is not consulted — the attachment is authoritative.
    async fn update_password(&self, endpoint_id: &str, tx: &Tx, _session_id: String, password: String) {
        match self.registry.set_password(endpoint_id, password.clone()).await {
            Ok((sid, clients)) => {
                let notice = Outbound::PasswordUpdated {
                    session_id: sid.clone(),
                    password: password.clone(),
                }
                .to_text();

                for (client_id, client_tx) in clients {
                    self.deliver(&client_id, &client_tx, notice.clone()).await;
                }

                self.deliver(
                    endpoint_id,
                    tx,
                    Outbound::PasswordUpdateConfirmed {
                        session_id: sid,
                        password,
                    }
                    .to_text(),
                )
                .await;
            }
            Err(kind) => {
                self.deliver(endpoint_id, tx, Outbound::error(kind).to_text()).await;
            }
        }
    }

    async fn update_device_info(&self, endpoint_id: &str, tx: &Tx, _session_id: String, nickname: String) {
        match self.registry.set_nickname(endpoint_id, nickname.clone()).await {
            Ok((sid, clients)) => {
                let notice = Outbound::SettingsUpdated {
                    session_id: sid,
                    nickname,
                }
                .to_text();

                for (client_id, client_tx) in clients {
                    self.deliver(&client_id, &client_tx, notice.clone()).await;
                }
            }
            Err(kind) => {
                self.deliver(endpoint_id, tx, Outbound::error(kind).to_text()).await;
            }
        }
    }

    /// `offer` / `answer` / `ice_candidate` / `broadcast` / `client-info`:
    /// none of these are understood by the core, they are forwarded with
    /// `fromId` stamped per the routing rules. All require the sender to
    /// already be attached to a session.
    async fn on_opaque_frame(&self, endpoint_id: &str, tx: &Tx, kind: String, text: &str) {
        let Some((attached_session, role)) = self.registry.attachment_of(endpoint_id).await else {
            self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::NotInSession).to_text())
                .await;
            return;
        };

        let Some(frame) = NegotiationFrame::parse(kind.clone(), text) else {
            self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::InvalidMessage).to_text())
                .await;
            return;
        };

        let session_id = frame.session_id.clone().unwrap_or(attached_session);

        match kind.as_str() {
            "broadcast" => self.route_broadcast(endpoint_id, &session_id, frame).await,
            "client-info" => self.route_client_info(endpoint_id, role, &session_id, frame).await,
            _ => self.route_negotiation(endpoint_id, tx, role, &session_id, frame).await,
        }
    }

    async fn route_negotiation(&self, endpoint_id: &str, tx: &Tx, role: Role, session_id: &str, frame: NegotiationFrame) {
        match role {
            Role::Host => {
                let target = frame.target_id.clone();
                let body = frame.stamped(endpoint_id);
                match target {
                    Some(target_id) => {
                        if let Some(client_tx) = self.registry.client_of(session_id, &target_id).await {
                            self.deliver(&target_id, &client_tx, body).await;
                        }
                    }
                    None => {
                        for (client_id, client_tx) in self.registry.clients_of(session_id, None).await {
                            self.deliver(&client_id, &client_tx, body.clone()).await;
                        }
                    }
                }
            }
            Role::Client => match self.registry.host_id_and_tx(session_id).await {
                Some((host_id, host_tx)) => {
                    self.deliver(&host_id, &host_tx, frame.stamped(endpoint_id)).await;
                }
                None => {
                    self.deliver(endpoint_id, tx, Outbound::error(ErrorKind::HostAbsent).to_text())
                        .await;
                }
            },
        }
    }

    async fn route_broadcast(&self, endpoint_id: &str, session_id: &str, frame: NegotiationFrame) {
        let body = frame.stamped(endpoint_id);

        for (target_id, target_tx) in self.registry.broadcast_targets(session_id, endpoint_id).await {
            self.deliver(&target_id, &target_tx, body.clone()).await;
        }
    }

    /// host-only forward; the host sending `client-info` has no upstream
    /// peer to inform, so it is dropped silently.
    async fn route_client_info(&self, endpoint_id: &str, role: Role, session_id: &str, frame: NegotiationFrame) {
        if role != Role::Client {
            return;
        }

        if let Some((host_id, host_tx)) = self.registry.host_id_and_tx(session_id).await {
            self.deliver(&host_id, &host_tx, frame.stamped(endpoint_id)).await;
        }
    }
}
