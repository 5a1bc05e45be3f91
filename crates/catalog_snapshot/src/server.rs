//! Snapshot server, run by the master.

use crate::config::ReplicationConfig;
use crate::dump::DumpTool;
use crate::error::{SnapshotError, SnapshotResult};
use crate::handshake::{read_hello, send_status, ACCEPTED, REJECTED};
use crate::session::{SessionInfo, SessionState, SessionTable};
use crate::token::SessionTokens;
use catalog_fabric::{reply, Envelope, MessagingFabric};
use catalog_protocol::{Artifact, DumpOffer, DumpRequest, Endpoint, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Statistics about served snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Dump requests received.
    pub requests: u64,
    /// Sessions that transferred every artifact.
    pub sessions_completed: u64,
    /// Sessions that failed or timed out.
    pub sessions_failed: u64,
    /// Documents streamed across all sessions.
    pub documents_served: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    documents_served: AtomicU64,
}

/// Serves point-in-time snapshots of the local index to joining replicas.
///
/// The server subscribes to the snapshot exchange and handles each dump
/// request in its own task. Every session binds one single-use listener per
/// artifact; a listener accepts exactly one connection and is closed once
/// its transfer finishes or fails.
pub struct SnapshotServer {
    config: ReplicationConfig,
    fabric: Arc<dyn MessagingFabric>,
    dump: Arc<dyn DumpTool>,
    tokens: SessionTokens,
    sessions: SessionTable,
    counters: Counters,
}

impl SnapshotServer {
    /// Creates a server. Nothing is bound until [`SnapshotServer::start`].
    pub fn new(
        config: ReplicationConfig,
        fabric: Arc<dyn MessagingFabric>,
        dump: Arc<dyn DumpTool>,
    ) -> SnapshotResult<Self> {
        config.validate()?;
        let tokens = SessionTokens::new(config.session_timeout);
        Ok(Self {
            config,
            fabric,
            dump,
            tokens,
            sessions: SessionTable::default(),
            counters: Counters::default(),
        })
    }

    /// The server configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Subscribes to the snapshot exchange and starts serving requests.
    ///
    /// The returned task runs until aborted or until the fabric closes the
    /// subscription.
    pub async fn start(self: Arc<Self>) -> SnapshotResult<JoinHandle<()>> {
        let mut requests = self.fabric.subscribe_broadcast(&self.config.exchange).await?;
        info!(
            exchange = %self.config.exchange,
            host = %self.config.host,
            "snapshot server listening for dump requests"
        );

        Ok(tokio::spawn(async move {
            while let Some(mut delivery) = requests.next().await {
                delivery.ack();
                let envelope = delivery.envelope().clone();
                let server = Arc::clone(&self);
                tokio::spawn(async move { server.handle_request(envelope).await });
            }
            debug!("snapshot request subscription closed");
        }))
    }

    /// Sessions currently open, oldest first.
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list()
    }

    /// Returns server statistics.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            sessions_completed: self.counters.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.counters.sessions_failed.load(Ordering::Relaxed),
            documents_served: self.counters.documents_served.load(Ordering::Relaxed),
        }
    }

    async fn handle_request(&self, envelope: Envelope) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let request = match DumpRequest::decode(&envelope.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed dump request");
                self.refuse(&envelope, e.to_string()).await;
                return;
            }
        };
        if request.protocol_version != PROTOCOL_VERSION {
            let err = SnapshotError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            };
            warn!(requester = %request.node_id, error = %err, "refusing dump request");
            self.refuse(&envelope, err.to_string()).await;
            return;
        }

        let session_id = Uuid::new_v4();
        self.sessions.open(session_id, request.node_id);
        let span = info_span!("snapshot_session", %session_id, requester = %request.node_id);

        match self.run_session(session_id, &envelope).instrument(span).await {
            Ok(documents) => {
                self.sessions.advance(session_id, SessionState::Done);
                self.counters.sessions_completed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .documents_served
                    .fetch_add(documents, Ordering::Relaxed);
                info!(%session_id, documents, "snapshot session done");
            }
            Err(e) => {
                self.sessions.advance(session_id, SessionState::Error);
                self.counters.sessions_failed.fetch_add(1, Ordering::Relaxed);
                warn!(%session_id, error = %e, "snapshot session failed");
            }
        }
        self.sessions.close(session_id);
    }

    async fn refuse(&self, envelope: &Envelope, message: String) {
        let sent = match DumpOffer::error(message).encode() {
            Ok(payload) => reply(self.fabric.as_ref(), envelope, payload)
                .await
                .map_err(SnapshotError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(error = %e, "failed to send refusal");
        }
    }

    async fn run_session(&self, session_id: Uuid, envelope: &Envelope) -> SnapshotResult<u64> {
        let (offer, mapping, data) = match self.prepare(session_id).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.refuse(envelope, e.to_string()).await;
                return Err(e);
            }
        };

        self.sessions
            .advance(session_id, SessionState::AwaitingRequest);
        reply(self.fabric.as_ref(), envelope, offer.encode()?).await?;
        debug!(endpoints = ?offer.endpoints, "dump offer sent");

        let timeout = self.config.session_timeout;
        let transfer = async {
            tokio::try_join!(
                self.serve(session_id, Artifact::Mapping, mapping),
                self.serve(session_id, Artifact::Data, data),
            )
        };
        let (_, documents) = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| SnapshotError::Timeout(timeout))??;
        Ok(documents)
    }

    async fn prepare(
        &self,
        session_id: Uuid,
    ) -> SnapshotResult<(DumpOffer, TcpListener, TcpListener)> {
        let mapping = self.bind().await?;
        let data = self.bind().await?;
        let token = self.tokens.issue(session_id)?;
        let endpoints = vec![
            Endpoint::new(Artifact::Mapping, &self.config.host, mapping.local_addr()?),
            Endpoint::new(Artifact::Data, &self.config.host, data.local_addr()?),
        ];
        Ok((DumpOffer::new(session_id, token, endpoints), mapping, data))
    }

    async fn bind(&self) -> SnapshotResult<TcpListener> {
        let host = self.config.host.as_str();
        if self.config.uses_ephemeral_ports() {
            return Ok(TcpListener::bind((host, 0)).await?);
        }
        for port in self.config.min_port..=self.config.max_port {
            match TcpListener::bind((host, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => trace!(port, error = %e, "port unavailable"),
            }
        }
        Err(SnapshotError::NoFreePort {
            min: self.config.min_port,
            max: self.config.max_port,
        })
    }

    /// Accepts one connection on `listener` and streams `artifact` over it.
    async fn serve(
        &self,
        session_id: Uuid,
        artifact: Artifact,
        listener: TcpListener,
    ) -> SnapshotResult<u64> {
        let (mut stream, peer) = listener.accept().await?;
        drop(listener);
        debug!(%artifact, %peer, "stream connected");

        let hello = read_hello(&mut stream).await?;
        let admitted = if hello.artifact_code == artifact.code() {
            self.tokens.verify(&hello.token, session_id)
        } else {
            Err(SnapshotError::NotAuthorized(format!(
                "stream opened for artifact {} on the {artifact} listener",
                hello.artifact_code
            )))
        };
        if let Err(e) = admitted {
            // Best effort: the peer may already be gone.
            let _ = send_status(&mut stream, REJECTED).await;
            return Err(e);
        }
        send_status(&mut stream, ACCEPTED).await?;
        self.sessions.advance(session_id, SessionState::Serving);

        let records = self.dump.export(artifact, &mut stream).await?;
        stream.shutdown().await?;
        debug!(%artifact, records, "artifact streamed");
        Ok(records)
    }
}

impl std::fmt::Debug for SnapshotServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotServer")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
