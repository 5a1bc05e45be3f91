//! Streaming export and import of index artifacts.

use crate::error::{SnapshotError, SnapshotResult};
use async_trait::async_trait;
use catalog_index::SearchIndex;
use catalog_protocol::Artifact;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Reads and writes index artifacts as byte streams.
///
/// # Implementors
///
/// - [`IndexDumpTool`] - Over any [`SearchIndex`]
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// Writes `artifact` to `writer`, returning the number of records written
    /// (1 for the mapping, the document count for data).
    async fn export(
        &self,
        artifact: Artifact,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SnapshotResult<u64>;

    /// Loads `artifact` from `reader`, returning the number of records read.
    async fn import(
        &self,
        artifact: Artifact,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotResult<u64>;
}

/// Dump tool backed by one index of a [`SearchIndex`].
pub struct IndexDumpTool {
    index: Arc<dyn SearchIndex>,
    index_name: String,
}

impl IndexDumpTool {
    /// Creates a dump tool for `index_name`.
    pub fn new(index: Arc<dyn SearchIndex>, index_name: impl Into<String>) -> Self {
        Self {
            index,
            index_name: index_name.into(),
        }
    }

    /// Name of the dumped index.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn export_data(&self, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> SnapshotResult<u64> {
        // A dump sees what a search would see.
        self.index.refresh(&self.index_name).await?;
        let documents = self.index.scan(&self.index_name).await?;

        let mut count = 0u64;
        for document in documents {
            let mut line = serde_json::to_vec(&json!({
                "_id": document.id,
                "_source": document.source,
            }))
            .map_err(|e| SnapshotError::corrupt(Artifact::Data, e.to_string()))?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            count += 1;
        }

        let mut trailer = json!({ "_count": count }).to_string().into_bytes();
        trailer.push(b'\n');
        writer.write_all(&trailer).await?;
        writer.flush().await?;
        Ok(count)
    }

    async fn import_data(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> SnapshotResult<u64> {
        let mut lines = BufReader::new(reader).lines();
        let mut imported = 0u64;
        let mut trailer = None;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if trailer.is_some() {
                return Err(SnapshotError::corrupt(Artifact::Data, "data after trailer"));
            }

            let record: Value = serde_json::from_str(&line)
                .map_err(|e| SnapshotError::corrupt(Artifact::Data, e.to_string()))?;
            if let Some(count) = record.get("_count") {
                trailer = Some(count.as_u64().ok_or_else(|| {
                    SnapshotError::corrupt(Artifact::Data, "trailer count is not a number")
                })?);
                continue;
            }

            let id = record["_id"]
                .as_str()
                .ok_or_else(|| SnapshotError::corrupt(Artifact::Data, "record without _id"))?;
            let source = record
                .get("_source")
                .cloned()
                .ok_or_else(|| SnapshotError::corrupt(Artifact::Data, "record without _source"))?;
            self.index
                .index_document(&self.index_name, id, source)
                .await?;
            imported += 1;
        }

        match trailer {
            None => Err(SnapshotError::corrupt(Artifact::Data, "missing trailer")),
            Some(expected) if expected != imported => Err(SnapshotError::corrupt(
                Artifact::Data,
                format!("trailer announces {expected} documents, received {imported}"),
            )),
            Some(_) => {
                self.index.refresh(&self.index_name).await?;
                Ok(imported)
            }
        }
    }

    async fn export_mapping(
        &self,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SnapshotResult<u64> {
        let mapping = self.index.get_mapping(&self.index_name).await?;
        let body = serde_json::to_vec(&mapping)
            .map_err(|e| SnapshotError::corrupt(Artifact::Mapping, e.to_string()))?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(1)
    }

    async fn import_mapping(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotResult<u64> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        let mapping: Value = serde_json::from_slice(&body)
            .map_err(|e| SnapshotError::corrupt(Artifact::Mapping, e.to_string()))?;
        if !mapping.is_object() {
            return Err(SnapshotError::corrupt(
                Artifact::Mapping,
                "mapping is not an object",
            ));
        }

        let outcome = self.index.create_index(&self.index_name).await?;
        debug!(index = %self.index_name, ?outcome, "mapping import target ready");
        self.index.put_mapping(&self.index_name, mapping).await?;
        Ok(1)
    }
}

#[async_trait]
impl DumpTool for IndexDumpTool {
    async fn export(
        &self,
        artifact: Artifact,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SnapshotResult<u64> {
        match artifact {
            Artifact::Mapping => self.export_mapping(writer).await,
            Artifact::Data => self.export_data(writer).await,
        }
    }

    async fn import(
        &self,
        artifact: Artifact,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotResult<u64> {
        match artifact {
            Artifact::Mapping => self.import_mapping(reader).await,
            Artifact::Data => self.import_data(reader).await,
        }
    }
}

impl std::fmt::Debug for IndexDumpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDumpTool")
            .field("endpoint", &self.index.endpoint())
            .field("index_name", &self.index_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_index::MemoryIndex;

    async fn seeded(docs: usize) -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        index.create_index("products").await.unwrap();
        index
            .put_mapping("products", json!({"properties": {"created": {"type": "date"}}}))
            .await
            .unwrap();
        for i in 0..docs {
            index
                .index_document("products", &format!("p{i}"), json!({"name": [format!("item {i}")]}))
                .await
                .unwrap();
        }
        index
    }

    async fn export(tool: &IndexDumpTool, artifact: Artifact) -> Vec<u8> {
        let mut out = Vec::new();
        tool.export(artifact, &mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn data_export_ends_with_trailer() {
        let tool = IndexDumpTool::new(seeded(3).await, "products");
        let body = String::from_utf8(export(&tool, Artifact::Data).await).unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], r#"{"_count":3}"#);
        assert!(lines[0].contains(r#""_id":"p0""#));
    }

    #[tokio::test]
    async fn data_export_includes_unrefreshed_writes() {
        let index = seeded(0).await;
        index
            .index_document("products", "late", json!({"name": ["late"]}))
            .await
            .unwrap();
        let tool = IndexDumpTool::new(index, "products");
        let body = String::from_utf8(export(&tool, Artifact::Data).await).unwrap();
        assert!(body.contains("late"));
    }

    #[tokio::test]
    async fn full_transfer_into_empty_index() {
        let source = IndexDumpTool::new(seeded(5).await, "products");
        let mapping = export(&source, Artifact::Mapping).await;
        let data = export(&source, Artifact::Data).await;

        let target_index = Arc::new(MemoryIndex::new());
        let target = IndexDumpTool::new(target_index.clone(), "products");
        assert_eq!(target.import(Artifact::Mapping, &mut mapping.as_slice()).await.unwrap(), 1);
        assert_eq!(target.import(Artifact::Data, &mut data.as_slice()).await.unwrap(), 5);

        assert_eq!(target_index.count("products").await.unwrap(), 5);
        let mapping = target_index.get_mapping("products").await.unwrap();
        assert_eq!(mapping["properties"]["created"]["type"], "date");
        assert_eq!(
            target_index.get_document("products", "p3").await.unwrap(),
            Some(json!({"name": ["item 3"]}))
        );
    }

    #[tokio::test]
    async fn truncated_data_is_rejected() {
        let source = IndexDumpTool::new(seeded(4).await, "products");
        let data = String::from_utf8(export(&source, Artifact::Data).await).unwrap();
        let truncated: String = data.lines().take(2).map(|l| format!("{l}\n")).collect();

        let target_index = Arc::new(MemoryIndex::new());
        target_index.create_index("products").await.unwrap();
        let target = IndexDumpTool::new(target_index, "products");
        let err = target
            .import(Artifact::Data, &mut truncated.as_bytes())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing trailer"));
    }

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let stream = "{\"_id\":\"a\",\"_source\":{}}\n{\"_count\":2}\n";
        let target_index = Arc::new(MemoryIndex::new());
        target_index.create_index("products").await.unwrap();
        let target = IndexDumpTool::new(target_index, "products");

        let err = target
            .import(Artifact::Data, &mut stream.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { artifact: Artifact::Data, .. }));
    }

    #[tokio::test]
    async fn malformed_mapping_is_rejected() {
        let target = IndexDumpTool::new(Arc::new(MemoryIndex::new()), "products");
        let err = target
            .import(Artifact::Mapping, &mut b"[1,2]".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { artifact: Artifact::Mapping, .. }));
    }
}
