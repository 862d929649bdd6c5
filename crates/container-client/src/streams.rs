//! Chunk-granular key streams and the small-file fast path.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use common::config::CHUNK_MAX_SIZE;
use common::{ChunkInfo, KeyData};
use protocol::container::{ContainerRequest, ContainerResponse};

use crate::client::XceiverClient;
use crate::ClientError;

fn checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Buffered writer for one key. Bytes accumulate to the chunk size; each
/// full buffer goes out as a `WriteChunk` and `close` commits the chunk list
/// with `PutKey`. A stream that has sent chunks cannot be rewound; a failed
/// write leaves the key invalid and the caller abandons it.
pub struct ChunkOutputStream {
    client: Arc<XceiverClient>,
    container_name: String,
    key_name: String,
    chunk_size: usize,
    buffer: BytesMut,
    chunks: Vec<ChunkInfo>,
    offset: u64,
    chunk_index: u64,
    closed: bool,
}

impl ChunkOutputStream {
    pub fn new(
        client: Arc<XceiverClient>,
        container_name: impl Into<String>,
        key_name: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.clamp(1, CHUNK_MAX_SIZE);
        Self {
            client,
            container_name: container_name.into(),
            key_name: key_name.into(),
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            chunks: Vec::new(),
            offset: 0,
            chunk_index: 0,
            closed: false,
        }
    }

    pub async fn write(&mut self, mut data: &[u8]) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::StreamClosed);
        }
        while !data.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.put_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.chunk_size {
                self.flush_chunk().await?;
            }
        }
        Ok(())
    }

    async fn flush_chunk(&mut self) -> Result<(), ClientError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let payload = self.buffer.split().freeze();
        let chunk = ChunkInfo {
            chunk_name: format!("{}_chunk_{}", self.key_name, self.chunk_index),
            offset: self.offset,
            len: payload.len() as u64,
            checksum: checksum(&payload),
            metadata: BTreeMap::new(),
        };
        match self
            .client
            .send_command(ContainerRequest::WriteChunk {
                container_name: self.container_name.clone(),
                key_name: self.key_name.clone(),
                chunk: chunk.clone(),
                data: payload.to_vec(),
            })
            .await?
        {
            ContainerResponse::Success => {}
            other => return Err(ClientError::Unexpected(format!("{:?}", other))),
        }
        self.offset += chunk.len;
        self.chunk_index += 1;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Flush the tail chunk and commit the key. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.flush_chunk().await?;
        let key_data = KeyData {
            container_name: self.container_name.clone(),
            name: self.key_name.clone(),
            chunks: std::mem::take(&mut self.chunks),
            metadata: BTreeMap::new(),
        };
        match self
            .client
            .send_command(ContainerRequest::PutKey { key_data })
            .await?
        {
            ContainerResponse::Success => {
                self.closed = true;
                Ok(())
            }
            other => Err(ClientError::Unexpected(format!("{:?}", other))),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.offset + self.buffer.len() as u64
    }
}

/// Cursor-driven reader for one key: `GetKey` on open, then one `ReadChunk`
/// per chunk as the cursor advances. Returns 0 at EOF once the sum of chunk
/// lengths has been consumed.
pub struct ChunkInputStream {
    client: Arc<XceiverClient>,
    container_name: String,
    key_name: String,
    chunks: Vec<ChunkInfo>,
    chunk_index: usize,
    current: Option<(Vec<u8>, usize)>,
}

impl std::fmt::Debug for ChunkInputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkInputStream")
            .field("container_name", &self.container_name)
            .field("key_name", &self.key_name)
            .field("chunks", &self.chunks)
            .field("chunk_index", &self.chunk_index)
            .finish_non_exhaustive()
    }
}

impl ChunkInputStream {
    pub async fn open(
        client: Arc<XceiverClient>,
        container_name: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let container_name = container_name.into();
        let key_name = key_name.into();
        let key_data = match client
            .send_command(ContainerRequest::GetKey {
                container_name: container_name.clone(),
                key_name: key_name.clone(),
            })
            .await?
        {
            ContainerResponse::Key { key_data } => key_data,
            other => return Err(ClientError::Unexpected(format!("{:?}", other))),
        };
        Ok(Self {
            client,
            container_name,
            key_name,
            chunks: key_data.chunks,
            chunk_index: 0,
            current: None,
        })
    }

    /// Total key length as recorded at commit time.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from the cursor; returns the bytes copied, 0 at EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some((data, cursor)) = self.current.as_mut() {
                if *cursor < data.len() {
                    let n = (data.len() - *cursor).min(buf.len());
                    buf[..n].copy_from_slice(&data[*cursor..*cursor + n]);
                    *cursor += n;
                    return Ok(n);
                }
                self.current = None;
            }
            if self.chunk_index >= self.chunks.len() {
                return Ok(0);
            }
            let chunk = self.chunks[self.chunk_index].clone();
            self.chunk_index += 1;
            let data = match self
                .client
                .send_command(ContainerRequest::ReadChunk {
                    container_name: self.container_name.clone(),
                    key_name: self.key_name.clone(),
                    chunk: chunk.clone(),
                })
                .await?
            {
                ContainerResponse::Chunk { data, .. } => data,
                other => return Err(ClientError::Unexpected(format!("{:?}", other))),
            };
            if !chunk.checksum.is_empty() && checksum(&data) != chunk.checksum {
                return Err(ClientError::ChecksumMismatch {
                    chunk: chunk.chunk_name,
                });
            }
            self.current = Some((data, 0));
        }
    }

    /// Drain the remainder of the stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::with_capacity(self.len() as usize);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// One-RPC write for payloads below the small-file threshold.
pub async fn put_small_file(
    client: &XceiverClient,
    container_name: &str,
    key_name: &str,
    data: &[u8],
) -> Result<(), ClientError> {
    let chunk = ChunkInfo {
        chunk_name: format!("{}_chunk_0", key_name),
        offset: 0,
        len: data.len() as u64,
        checksum: checksum(data),
        metadata: BTreeMap::new(),
    };
    let key_data = KeyData {
        container_name: container_name.to_string(),
        name: key_name.to_string(),
        chunks: vec![chunk.clone()],
        metadata: BTreeMap::new(),
    };
    match client
        .send_command(ContainerRequest::PutSmallFile {
            key_data,
            chunk,
            data: data.to_vec(),
        })
        .await?
    {
        ContainerResponse::Success => Ok(()),
        other => Err(ClientError::Unexpected(format!("{:?}", other))),
    }
}

/// One-RPC read counterpart of [`put_small_file`].
pub async fn get_small_file(
    client: &XceiverClient,
    container_name: &str,
    key_name: &str,
) -> Result<Vec<u8>, ClientError> {
    match client
        .send_command(ContainerRequest::GetSmallFile {
            container_name: container_name.to_string(),
            key_name: key_name.to_string(),
        })
        .await?
    {
        ContainerResponse::SmallFile { data, .. } => Ok(data),
        other => Err(ClientError::Unexpected(format!("{:?}", other))),
    }
}
