//! # Chunked File Transfer
//!
//! Files move over two streaming calls of the transfer service:
//!
//! * `Upload` is client streaming. Every request carries the destination `uri` and one `chunk`
//!   of the file; the single response reports what the server received and its checksum.
//! * `Download` is server streaming. The request names the `uri`; every response carries one
//!   `chunk`.
//!
//! Both directions feed every chunk into a running SHA-256 digest. Comparing the local digest
//! with the one reported by the other side, with [`verify_checksum`], is the only integrity check
//! of a transfer.
//!
//! A download response without a usable chunk does not abort the stream. The transfer carries on
//! and its [`DownloadReport::status`] becomes [`TransferStatus::Error`], which callers must check.
use crate::bridge::{
    self, Assignments, FieldParameters, ParameterSource, ResponseSink, RpcEventBridge, Supply,
    field_text,
};
use crate::config::SessionContext;
use crate::error::{Error, ObjectRef};
use crate::grpc::channel::CallChannel;
use crate::grpc::client::CallOptions;
use crate::schema::{SchemaCatalog, SchemaSource};
use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, Kind, MessageDescriptor, ReflectMessage, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FILE_URI_SCHEME: &str = "file://";

/// Terminal status of a download, as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Error,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Success => "SUCCESS",
            TransferStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunk and byte counters plus the running digest of one transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferCounters {
    chunks: u64,
    bytes: u64,
    digest: Sha256,
}

impl TransferCounters {
    pub fn record(&mut self, chunk: &[u8]) {
        self.digest.update(chunk);
        self.chunks += 1;
        self.bytes += chunk.len() as u64;
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The digest of everything recorded so far, as `sha256:<hex>`.
    pub fn checksum(&self) -> String {
        format!("sha256:{}", hex::encode(self.digest.clone().finalize()))
    }
}

/// What the server reported at the end of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    pub checksum: String,
    pub chunks_received: i64,
    pub bytes_received: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub checksum: String,
    pub remote: RemoteAck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub chunks: u64,
    pub bytes: u64,
    pub checksum: String,
    pub status: TransferStatus,
}

/// Fails with [`Error::ChecksumMismatch`] unless both digests are equal.
pub fn verify_checksum(name: Option<&str>, expected: &str, actual: &str) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            name: name.map(str::to_string),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn is_file_uri(s: &str) -> bool {
    s.starts_with(FILE_URI_SCHEME)
}

/// How the `chunk` field of the transfer messages is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkEncoding {
    Text,
    Binary,
}

impl ChunkEncoding {
    fn of(message: &MessageDescriptor) -> Result<Self, Error> {
        match message.get_field_by_name("chunk").map(|f| f.kind()) {
            Some(Kind::String) => Ok(ChunkEncoding::Text),
            Some(Kind::Bytes) => Ok(ChunkEncoding::Binary),
            _ => Err(Error::internal(format!(
                "{} has no string or bytes chunk field",
                message.full_name()
            ))),
        }
    }
}

/// Reads the file being uploaded and hands out one request per chunk.
struct UploadSource<R> {
    reader: R,
    uri: String,
    chunk_size: usize,
    encoding: ChunkEncoding,
    /// Start of a multi-byte character cut by the previous read, for text chunks.
    carry: Vec<u8>,
    counters: TransferCounters,
}

impl<R: AsyncRead + Unpin + Send> UploadSource<R> {
    /// Reads until `block` holds `len` bytes, or the file ends.
    async fn fill(&mut self, block: &mut Vec<u8>, len: usize) -> Result<(), Error> {
        let mut filled = block.len();
        if filled >= len {
            return Ok(());
        }
        block.resize(len, 0);

        while filled < len {
            let n = self.reader.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        block.truncate(filled);
        Ok(())
    }

    /// Chunks hold at most `chunk_size` bytes. In text mode, a single character wider than
    /// `chunk_size` is sent whole as its own chunk.
    async fn next_chunk(&mut self) -> Result<Option<Value>, Error> {
        let mut block = std::mem::take(&mut self.carry);
        self.fill(&mut block, self.chunk_size).await?;
        if block.is_empty() {
            return Ok(None);
        }

        let chunk = match self.encoding {
            ChunkEncoding::Binary => Value::Bytes(Bytes::from(block.clone())),
            ChunkEncoding::Text => {
                let valid = loop {
                    match std::str::from_utf8(&block).map(str::len) {
                        Ok(len) => break len,
                        // Incomplete character at the end: keep it for the next chunk.
                        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => {
                            break e.valid_up_to();
                        }
                        Err(e) if e.error_len().is_none() => {
                            let len = block.len();
                            self.fill(&mut block, len + 1).await?;
                            if block.len() == len {
                                return Err(not_utf8());
                            }
                        }
                        Err(_) => return Err(not_utf8()),
                    }
                };
                self.carry = block.split_off(valid);
                Value::String(String::from_utf8_lossy(&block).into_owned())
            }
        };

        self.counters.record(&block);
        tracing::trace!(
            chunk = self.counters.chunks(),
            bytes = block.len(),
            "sending chunk"
        );
        Ok(Some(chunk))
    }
}

fn not_utf8() -> Error {
    Error::InvalidInput(
        "The transfer service expects text, but the file is not valid UTF-8".to_string(),
    )
}

impl<R: AsyncRead + Unpin + Send> ParameterSource for UploadSource<R> {
    async fn supply(&mut self, input: &MessageDescriptor) -> Result<Supply, Error> {
        let Some(chunk) = self.next_chunk().await? else {
            return Ok(Supply::EndOfInput);
        };

        let message = Assignments::new()
            .set("uri", Value::String(self.uri.clone()))
            .set("chunk", chunk)
            .build(input)?;
        Ok(Supply::Message(message))
    }
}

/// Writes every received chunk to the destination.
struct DownloadSink<W> {
    writer: W,
    counters: TransferCounters,
    status: TransferStatus,
}

impl<W: AsyncWrite + Unpin + Send> ResponseSink for DownloadSink<W> {
    async fn on_message(&mut self, message: DynamicMessage) -> Result<(), Error> {
        let chunk = match message.get_field_by_name("chunk").as_deref() {
            Some(Value::String(text)) => Bytes::copy_from_slice(text.as_bytes()),
            Some(Value::Bytes(bytes)) => bytes.clone(),
            _ => {
                tracing::warn!(
                    message = message.descriptor().full_name(),
                    "received a response without a chunk"
                );
                self.status = TransferStatus::Error;
                return Ok(());
            }
        };

        self.writer.write_all(&chunk).await?;
        self.counters.record(&chunk);
        tracing::trace!(
            chunk = self.counters.chunks(),
            bytes = chunk.len(),
            "received chunk"
        );
        Ok(())
    }
}

/// Uploads and downloads files through the transfer service.
pub struct ChunkedTransfer<Ch, Src> {
    channel: Ch,
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
}

impl<Ch: CallChannel, Src: SchemaSource> ChunkedTransfer<Ch, Src> {
    pub fn new(
        channel: Ch,
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            channel,
            catalog,
            session,
        }
    }

    fn options(&self) -> CallOptions {
        CallOptions::new(self.session.headers(), self.session.timeout())
    }

    /// Streams `reader` to `uri` in chunks of at most `chunk_size` bytes.
    ///
    /// # Returns
    ///
    /// * `Ok(UploadReport)` - What was sent, and what the server says it received. The caller
    ///   must compare the two checksums.
    /// * `Err(Error)` - If reading fails or the server rejects the upload.
    pub async fn upload<R: AsyncRead + Unpin + Send>(
        &mut self,
        reader: R,
        uri: &str,
        chunk_size: usize,
    ) -> Result<UploadReport, Error> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput(
                "Chunk size must be a positive number of bytes".to_string(),
            ));
        }

        let method = self
            .catalog
            .method(&self.catalog.layout().transfer_service, "Upload")
            .await?;
        let encoding = ChunkEncoding::of(&method.input())?;

        let source = UploadSource {
            reader,
            uri: uri.to_string(),
            chunk_size,
            encoding,
            carry: Vec::new(),
            counters: TransferCounters::default(),
        };

        let options = self.options();
        let mut bridge = RpcEventBridge::new(source);
        let response = bridge::client_streaming(&mut self.channel, method, &mut bridge, options)
            .await
            .map_err(|e| e.with_object(ObjectRef::default()))?;

        let counters = bridge.into_source().counters;
        let remote = RemoteAck {
            checksum: field_text(&response, "checksum"),
            chunks_received: integer_field(&response, "chunks_received"),
            bytes_received: integer_field(&response, "bytes_received"),
            status: field_text(&response, "status"),
        };

        tracing::debug!(
            uri,
            chunks = counters.chunks(),
            bytes = counters.bytes(),
            "upload complete"
        );

        Ok(UploadReport {
            chunks_sent: counters.chunks(),
            bytes_sent: counters.bytes(),
            checksum: counters.checksum(),
            remote,
        })
    }

    /// Streams `uri` into `writer`.
    ///
    /// Malformed responses are skipped and reported through [`DownloadReport::status`].
    pub async fn download<W: AsyncWrite + Unpin + Send>(
        &mut self,
        uri: &str,
        writer: W,
    ) -> Result<DownloadReport, Error> {
        let method = self
            .catalog
            .method(&self.catalog.layout().transfer_service, "Download")
            .await?;
        let parameters = FieldParameters::single(
            method.input().full_name(),
            Assignments::new().set("uri", Value::String(uri.to_string())),
        );

        let options = self.options();
        let mut bridge = RpcEventBridge::new(parameters);
        let mut sink = DownloadSink {
            writer,
            counters: TransferCounters::default(),
            status: TransferStatus::Success,
        };

        bridge::server_streaming(&mut self.channel, method, &mut bridge, &mut sink, options)
            .await
            .map_err(|e| e.with_object(ObjectRef::default()))?;
        sink.writer.flush().await?;

        tracing::debug!(
            uri,
            chunks = sink.counters.chunks(),
            bytes = sink.counters.bytes(),
            status = %sink.status,
            "download complete"
        );

        Ok(DownloadReport {
            chunks: sink.counters.chunks(),
            bytes: sink.counters.bytes(),
            checksum: sink.counters.checksum(),
            status: sink.status,
        })
    }

    /// Uploads a local file to a `file://` URI.
    pub async fn upload_file(
        &mut self,
        local: &Path,
        uri: &str,
        chunk_size: usize,
    ) -> Result<UploadReport, Error> {
        check_uris(local, uri)?;
        let file = tokio::fs::File::open(local).await?;
        self.upload(file, uri, chunk_size).await
    }

    /// Downloads a `file://` URI into a local file.
    pub async fn download_file(
        &mut self,
        uri: &str,
        local: &Path,
    ) -> Result<DownloadReport, Error> {
        check_uris(local, uri)?;
        let file = tokio::fs::File::create(local).await?;
        self.download(uri, file).await
    }
}

fn check_uris(local: &Path, uri: &str) -> Result<(), Error> {
    if is_file_uri(&local.to_string_lossy()) {
        return Err(Error::InvalidInput(
            "local_name argument should not be a uri".to_string(),
        ));
    }
    if !is_file_uri(uri) {
        return Err(Error::InvalidInput(
            "uri argument should be a file:// uri".to_string(),
        ));
    }
    Ok(())
}

/// Reads an integer field of any width. Missing fields read as zero.
fn integer_field(message: &DynamicMessage, name: &str) -> i64 {
    match message.get_field_by_name(name).as_deref() {
        Some(Value::I32(v)) => i64::from(*v),
        Some(Value::I64(v)) => *v,
        Some(Value::U32(v)) => i64::from(*v),
        Some(Value::U64(v)) => i64::try_from(*v).unwrap_or(i64::MAX),
        _ => 0,
    }
}
