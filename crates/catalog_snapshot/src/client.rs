//! Snapshot client, run by a joining replica.

use crate::config::ReplicationConfig;
use crate::dump::DumpTool;
use crate::error::{SnapshotError, SnapshotResult};
use crate::handshake::{read_status, send_hello};
use catalog_fabric::{MessagingFabric, RequestClient};
use catalog_protocol::{Artifact, DumpOffer, DumpRequest, Endpoint, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of a completed snapshot pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Session the master opened for this pull.
    pub session_id: Uuid,
    /// Documents loaded into the local index.
    pub documents: u64,
    /// Bytes of data artifact received.
    pub data_bytes: u64,
    /// Wall time of the pull.
    pub duration: Duration,
}

/// Pulls a full snapshot from a master into the local index.
pub struct SnapshotClient {
    config: ReplicationConfig,
    fabric: Arc<dyn MessagingFabric>,
    dump: Arc<dyn DumpTool>,
    node_id: Uuid,
}

impl SnapshotClient {
    /// Creates a client with a random node id.
    pub fn new(
        config: ReplicationConfig,
        fabric: Arc<dyn MessagingFabric>,
        dump: Arc<dyn DumpTool>,
    ) -> Self {
        Self {
            config,
            fabric,
            dump,
            node_id: Uuid::new_v4(),
        }
    }

    /// Sets the node id announced to the master.
    pub fn with_node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = node_id;
        self
    }

    /// Requests a snapshot and loads it.
    ///
    /// The data artifact is received into a temporary file first; the
    /// mapping is then imported straight from its stream, and only then are
    /// the documents loaded from the file. The whole pull is bounded by the
    /// session timeout.
    ///
    /// # Errors
    ///
    /// Any failure aborts the pull; nothing is retried.
    pub async fn sync(&self) -> SnapshotResult<SyncReport> {
        let timeout = self.config.session_timeout;
        tokio::time::timeout(timeout, self.pull())
            .await
            .map_err(|_| SnapshotError::Timeout(timeout))?
    }

    async fn pull(&self) -> SnapshotResult<SyncReport> {
        let started = Instant::now();
        let offer = self.request_offer().await?;
        let data = offer
            .endpoint(Artifact::Data)
            .ok_or(SnapshotError::MissingEndpoint(Artifact::Data))?;
        let mapping = offer
            .endpoint(Artifact::Mapping)
            .ok_or(SnapshotError::MissingEndpoint(Artifact::Mapping))?;
        debug!(session_id = %offer.session_id, "dump offer received");

        let intake = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(intake.reopen()?);
        let mut stream = self.open(data, &offer.token).await?;
        let data_bytes = tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        drop(file);
        debug!(data_bytes, "data artifact received");

        let mut stream = self.open(mapping, &offer.token).await?;
        self.dump.import(Artifact::Mapping, &mut stream).await?;
        debug!("mapping imported");

        let mut file = tokio::fs::File::from_std(intake.reopen()?);
        let documents = self.dump.import(Artifact::Data, &mut file).await?;
        drop(file);
        intake.close()?;

        let report = SyncReport {
            session_id: offer.session_id,
            documents,
            data_bytes,
            duration: started.elapsed(),
        };
        info!(
            session_id = %report.session_id,
            documents,
            elapsed_ms = report.duration.as_millis() as u64,
            "snapshot loaded"
        );
        Ok(report)
    }

    async fn request_offer(&self) -> SnapshotResult<DumpOffer> {
        let requests =
            RequestClient::connect(Arc::clone(&self.fabric), self.config.request_timeout).await?;
        let payload = DumpRequest::new(self.node_id).encode()?;
        let reply = requests.request(&self.config.exchange, payload).await?;

        let offer = DumpOffer::decode(&reply)?;
        if let Some(error) = &offer.error {
            return Err(SnapshotError::Refused(error.clone()));
        }
        if offer.protocol_version != PROTOCOL_VERSION {
            return Err(SnapshotError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: offer.protocol_version,
            });
        }
        Ok(offer)
    }

    async fn open(&self, endpoint: &Endpoint, token: &[u8]) -> SnapshotResult<TcpStream> {
        let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        send_hello(&mut stream, endpoint.artifact, token).await?;
        read_status(&mut stream, endpoint.artifact).await?;
        Ok(stream)
    }
}

impl std::fmt::Debug for SnapshotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotClient")
            .field("config", &self.config)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::IndexDumpTool;
    use catalog_fabric::{reply, MemoryFabric};
    use catalog_index::MemoryIndex;

    fn client(fabric: Arc<MemoryFabric>, config: ReplicationConfig) -> SnapshotClient {
        let dump = Arc::new(IndexDumpTool::new(Arc::new(MemoryIndex::new()), "products"));
        SnapshotClient::new(config, fabric, dump)
    }

    #[tokio::test]
    async fn no_master_times_out() {
        let fabric = Arc::new(MemoryFabric::new());
        let config = ReplicationConfig::new("127.0.0.1", 0, 0)
            .with_request_timeout(Duration::from_millis(50));

        let err = client(fabric, config).sync().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Fabric(e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn refusal_is_reported() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut requests = fabric.subscribe_broadcast("catalog.snapshot").await.unwrap();
        let responder = {
            let fabric = Arc::clone(&fabric);
            tokio::spawn(async move {
                let delivery = requests.next().await.unwrap();
                let offer = DumpOffer::error("busy").encode().unwrap();
                reply(fabric.as_ref(), delivery.envelope(), offer).await.unwrap();
            })
        };

        let err = client(fabric, ReplicationConfig::new("127.0.0.1", 0, 0))
            .sync()
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Refused(msg) if msg == "busy"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn offer_without_endpoints_is_rejected() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut requests = fabric.subscribe_broadcast("catalog.snapshot").await.unwrap();
        let responder = {
            let fabric = Arc::clone(&fabric);
            tokio::spawn(async move {
                let delivery = requests.next().await.unwrap();
                let offer = DumpOffer::new(Uuid::new_v4(), vec![], vec![]).encode().unwrap();
                reply(fabric.as_ref(), delivery.envelope(), offer).await.unwrap();
            })
        };

        let err = client(fabric, ReplicationConfig::new("127.0.0.1", 0, 0))
            .sync()
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MissingEndpoint(Artifact::Data)));
        responder.await.unwrap();
    }
}
