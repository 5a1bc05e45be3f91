//! Stream handshake framing.

use crate::error::{SnapshotError, SnapshotResult};
use catalog_protocol::Artifact;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const ACCEPTED: u8 = 0;
pub(crate) const REJECTED: u8 = 1;

/// What a client presented when opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hello {
    pub artifact_code: u8,
    pub token: Vec<u8>,
}

pub(crate) async fn send_hello<W>(writer: &mut W, artifact: Artifact, token: &[u8]) -> SnapshotResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u16::try_from(token.len())
        .map_err(|_| SnapshotError::Internal("token too long".into()))?;
    let mut frame = Vec::with_capacity(3 + token.len());
    frame.push(artifact.code());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(token);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_hello<R>(reader: &mut R) -> SnapshotResult<Hello>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let artifact_code = reader.read_u8().await?;
    let len = reader.read_u16().await?;
    let mut token = vec![0u8; usize::from(len)];
    reader.read_exact(&mut token).await?;
    Ok(Hello {
        artifact_code,
        token,
    })
}

pub(crate) async fn send_status<W>(writer: &mut W, status: u8) -> SnapshotResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u8(status).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_status<R>(reader: &mut R, artifact: Artifact) -> SnapshotResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_u8().await? {
        ACCEPTED => Ok(()),
        REJECTED => Err(SnapshotError::NotAuthorized(format!(
            "server rejected the {artifact} stream"
        ))),
        other => Err(SnapshotError::corrupt(
            artifact,
            format!("unknown handshake status {other}"),
        )),
    }
}
