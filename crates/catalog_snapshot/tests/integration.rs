//! End-to-end snapshot transfer over real TCP streams.

use catalog_fabric::{MemoryFabric, MessagingFabric};
use catalog_index::{MemoryIndex, SearchIndex};
use catalog_snapshot::{
    IndexDumpTool, ReplicationConfig, SnapshotClient, SnapshotError, SnapshotServer,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const INDEX: &str = "products";

async fn master_index(docs: usize) -> Arc<MemoryIndex> {
    let index = Arc::new(MemoryIndex::new());
    index.create_index(INDEX).await.unwrap();
    index
        .put_mapping(
            INDEX,
            json!({
                "properties": {"created": {"type": "date"}},
                "_meta": {"catalog_migrations": [1, 2]}
            }),
        )
        .await
        .unwrap();
    for i in 0..docs {
        index
            .index_document(
                INDEX,
                &format!("{i:08}"),
                json!({"created": ["2024-01-01T00:00:00Z"], "name": [format!("product {i}")], "rank": [i]}),
            )
            .await
            .unwrap();
    }
    index
}

async fn start_master(
    fabric: Arc<dyn MessagingFabric>,
    index: Arc<MemoryIndex>,
) -> (Arc<SnapshotServer>, tokio::task::JoinHandle<()>) {
    let dump = Arc::new(IndexDumpTool::new(index, INDEX));
    let server = Arc::new(
        SnapshotServer::new(ReplicationConfig::new("127.0.0.1", 0, 0), fabric, dump).unwrap(),
    );
    let task = Arc::clone(&server).start().await.unwrap();
    (server, task)
}

fn replica(fabric: Arc<dyn MessagingFabric>) -> (SnapshotClient, Arc<MemoryIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let dump = Arc::new(IndexDumpTool::new(index.clone(), INDEX));
    let client = SnapshotClient::new(ReplicationConfig::new("127.0.0.1", 0, 0), fabric, dump);
    (client, index)
}

#[tokio::test]
async fn replica_receives_every_document() {
    let fabric: Arc<dyn MessagingFabric> = Arc::new(MemoryFabric::new());
    let master = master_index(1_250).await;
    let (server, task) = start_master(Arc::clone(&fabric), master.clone()).await;

    let (client, local) = replica(fabric);
    let report = client.sync().await.unwrap();

    assert_eq!(report.documents, 1_250);
    assert_eq!(local.count(INDEX).await.unwrap(), 1_250);
    for id in ["00000000", "00000617", "00001249"] {
        assert_eq!(
            local.get_document(INDEX, id).await.unwrap(),
            master.get_document(INDEX, id).await.unwrap()
        );
    }

    let mapping = local.get_mapping(INDEX).await.unwrap();
    assert_eq!(mapping["_meta"]["catalog_migrations"], json!([1, 2]));
    assert_eq!(mapping["properties"]["created"]["type"], "date");

    // The server side finishes right after the last byte.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = server.stats();
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.documents_served, 1_250);
    assert!(server.active_sessions().is_empty());
    task.abort();
}

#[tokio::test]
async fn empty_master_yields_empty_replica() {
    let fabric: Arc<dyn MessagingFabric> = Arc::new(MemoryFabric::new());
    let (_server, task) = start_master(Arc::clone(&fabric), master_index(0).await).await;

    let (client, local) = replica(fabric);
    let report = client.sync().await.unwrap();

    assert_eq!(report.documents, 0);
    assert_eq!(local.count(INDEX).await.unwrap(), 0);
    task.abort();
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let fabric: Arc<dyn MessagingFabric> = Arc::new(MemoryFabric::new());
    let (server, task) = start_master(Arc::clone(&fabric), master_index(200).await).await;

    let (a, index_a) = replica(Arc::clone(&fabric));
    let (b, index_b) = replica(fabric);
    let (ra, rb) = tokio::join!(a.sync(), b.sync());

    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_ne!(ra.session_id, rb.session_id);
    assert_eq!(index_a.count(INDEX).await.unwrap(), 200);
    assert_eq!(index_b.count(INDEX).await.unwrap(), 200);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.stats().sessions_completed, 2);
    task.abort();
}

#[tokio::test]
async fn missing_master_fails_bootstrap() {
    let fabric: Arc<dyn MessagingFabric> = Arc::new(MemoryFabric::new());
    let index = Arc::new(MemoryIndex::new());
    let dump = Arc::new(IndexDumpTool::new(index, INDEX));
    let config = ReplicationConfig::new("127.0.0.1", 0, 0)
        .with_request_timeout(Duration::from_millis(100));

    let err = SnapshotClient::new(config, fabric, dump)
        .sync()
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Fabric(_)));
}
