//! SFTP client engine.
//!
//! The client owns one bidirectional byte-stream pair. Two concerns
//! cooperate over it: a write path that any number of caller tasks may
//! use concurrently, and a single read loop that correlates responses to
//! their requests by id.
//!
//! # Protocol Flow
//!
//! ```text
//! Caller A        Caller B        Read loop              Server
//!   |-- OPEN(id=1) --------------------------------------->|
//!   |               |-- STAT(id=2) ------------------------>|
//!   |               |               |<- ATTRS(id=2) --------|
//!   |               |<- wake -------|                       |
//!   |               |               |<- HANDLE(id=1) -------|
//!   |<- wake -----------------------|                       |
//! ```
//!
//! [`SftpClient::connect`] performs the INIT/VERSION handshake before any
//! other request can be created, so nothing else reaches the wire until
//! the VERSION reply has been parsed; a second INIT cannot be expressed
//! through this API. After the handshake each request holds the writer
//! lock only for its encode-and-flush critical section, and its pending
//! entry is installed before the frame leaves that critical section so a
//! response can never arrive first.
//!
//! Dropping any in-flight call merely abandons its pending entry; the
//! read loop discards the answer when it arrives. When the read loop dies
//! (peer close, codec failure, [`SftpClient::close`]) every outstanding
//! request fails with a disposed error carrying the root cause.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use skiff_platform::{SkiffError, SkiffResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{read_frame, FrameWriter, PacketBuf, DEFAULT_MAX_PACKET_SIZE};
use super::error::{SftpError, SftpResult, StatusError};
use super::message::{Request, Response, SFTP_VERSION};
use super::types::{Extensions, FileAttributes, Name, OpenFlags, StatusCode};

/// Bytes requested per READ when streaming through [`RemoteFile`].
const READ_CHUNK_SIZE: u32 = 32768;

/// SFTP client configuration.
#[derive(Debug, Clone)]
pub struct SftpClientConfig {
    /// Ceiling for a single frame payload.
    pub max_packet_size: usize,
    /// Extensions advertised in INIT.
    pub extensions: Extensions,
}

impl Default for SftpClientConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            extensions: Extensions::new(),
        }
    }
}

struct Pending {
    tx: oneshot::Sender<SftpResult<Response>>,
    wants_extended_reply: bool,
}

struct Shared {
    pending: HashMap<u32, Pending>,
    disposed: Option<String>,
}

struct ClientInner {
    writer: Mutex<FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
    shared: StdMutex<Shared>,
    next_id: AtomicU32,
    version: u32,
    server_extensions: Extensions,
    max_packet_size: usize,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.read_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.lock_read_task().take() {
            task.abort();
        }
    }
}

fn dispose(inner: &ClientInner, reason: &str) {
    let mut shared = inner.lock_shared();
    if shared.disposed.is_none() {
        shared.disposed = Some(reason.to_string());
    }
    for (_, pending) in shared.pending.drain() {
        let _ = pending
            .tx
            .send(Err(SkiffError::Disposed(reason.to_string()).into()));
    }
}

async fn read_loop<R>(inner: Arc<ClientInner>, mut reader: R)
where
    R: AsyncRead + Unpin + Send,
{
    let reason = loop {
        match read_frame(&mut reader, inner.max_packet_size).await {
            Ok(Some(frame)) => match Response::decode(&frame) {
                Ok(response) => {
                    let Some(id) = response.request_id() else {
                        break "received VERSION outside the handshake".to_string();
                    };
                    let entry = inner.lock_shared().pending.remove(&id);
                    match entry {
                        Some(pending) => {
                            let is_extended = matches!(response, Response::ExtendedReply { .. });
                            if is_extended && !pending.wants_extended_reply {
                                let reason =
                                    "extended reply without a registered decoder".to_string();
                                let _ = pending.tx.send(Err(SkiffError::Protocol(
                                    reason.clone(),
                                )
                                .into()));
                                break reason;
                            }
                            let _ = pending.tx.send(Ok(response));
                        }
                        // Can happen after a caller abandoned its request.
                        None => debug!("dropping response for unknown request id {}", id),
                    }
                }
                Err(e) => break format!("failed to decode response: {}", e),
            },
            Ok(None) => break "connection closed by peer".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    debug!("sftp client read loop stopped: {}", reason);
    dispose(&inner, &reason);
}

fn response_kind(response: &Response) -> &'static str {
    match response {
        Response::Version { .. } => "VERSION",
        Response::Status { .. } => "STATUS",
        Response::Handle { .. } => "HANDLE",
        Response::Data { .. } => "DATA",
        Response::Name { .. } => "NAME",
        Response::Attrs { .. } => "ATTRS",
        Response::ExtendedReply { .. } => "EXTENDED_REPLY",
    }
}

fn mismatch(expected: &str, got: &Response) -> SftpError {
    SkiffError::Protocol(format!(
        "expected {} response, got {}",
        expected,
        response_kind(got)
    ))
    .into()
}

fn expect_status_ok(response: Response) -> SftpResult<()> {
    match response {
        Response::Status {
            status: StatusCode::Ok,
            ..
        } => Ok(()),
        Response::Status {
            status, message, ..
        } => Err(StatusError::new(status, message).into()),
        other => Err(mismatch("STATUS", &other)),
    }
}

fn expect_handle(response: Response) -> SftpResult<Vec<u8>> {
    match response {
        Response::Handle { handle, .. } => Ok(handle),
        Response::Status {
            status, message, ..
        } => Err(StatusError::new(status, message).into()),
        other => Err(mismatch("HANDLE", &other)),
    }
}

fn expect_attrs(response: Response) -> SftpResult<FileAttributes> {
    match response {
        Response::Attrs { attrs, .. } => Ok(attrs),
        Response::Status {
            status, message, ..
        } => Err(StatusError::new(status, message).into()),
        other => Err(mismatch("ATTRS", &other)),
    }
}

fn expect_names(response: Response) -> SftpResult<Vec<Name>> {
    match response {
        Response::Name { names, .. } => Ok(names),
        Response::Status {
            status, message, ..
        } => Err(StatusError::new(status, message).into()),
        other => Err(mismatch("NAME", &other)),
    }
}

/// SFTP client engine for one session.
///
/// Cloning is cheap and every clone drives the same session; all public
/// methods take `&self` and may be called from concurrent tasks.
#[derive(Clone)]
pub struct SftpClient {
    inner: Arc<ClientInner>,
}

impl SftpClient {
    /// Connects over the given stream pair with the default configuration.
    pub async fn connect<R, W>(reader: R, writer: W) -> SftpResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with_config(reader, writer, SftpClientConfig::default()).await
    }

    /// Connects over the given stream pair: sends INIT, awaits the VERSION
    /// reply, then starts the read loop.
    ///
    /// The negotiated version is `min(server_version, 3)`.
    pub async fn connect_with_config<R, W>(
        mut reader: R,
        writer: W,
        config: SftpClientConfig,
    ) -> SftpResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let mut writer = FrameWriter::new(boxed, config.max_packet_size);

        let mut buf = PacketBuf::new();
        Request::Init {
            version: SFTP_VERSION,
            extensions: config.extensions,
        }
        .encode(&mut buf)?;
        writer.send(buf.as_slice()).await?;

        let frame = read_frame(&mut reader, config.max_packet_size)
            .await?
            .ok_or_else(|| {
                SkiffError::Protocol("stream closed during handshake".to_string())
            })?;
        let response = Response::decode(&frame)?;
        let (version, extensions) = match response {
            Response::Version {
                version,
                extensions,
            } => (version, extensions),
            other => return Err(mismatch("VERSION", &other)),
        };
        let negotiated = version.min(SFTP_VERSION);
        info!(
            "sftp client connected (server version {}, negotiated {})",
            version, negotiated
        );

        let inner = Arc::new(ClientInner {
            writer: Mutex::new(writer),
            shared: StdMutex::new(Shared {
                pending: HashMap::new(),
                disposed: None,
            }),
            next_id: AtomicU32::new(1),
            version: negotiated,
            server_extensions: extensions,
            max_packet_size: config.max_packet_size,
            read_task: StdMutex::new(None),
        });
        let task = tokio::spawn(read_loop(Arc::clone(&inner), reader));
        inner.lock_read_task().replace(task);

        Ok(Self { inner })
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> u32 {
        self.inner.version
    }

    /// Extensions the server advertised in its VERSION reply.
    pub fn server_extensions(&self) -> &Extensions {
        &self.inner.server_extensions
    }

    fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends `request` and awaits the response bearing its id.
    async fn call(&self, request: Request, wants_extended_reply: bool) -> SftpResult<Response> {
        let Some(id) = request.request_id() else {
            return Err(SkiffError::Protocol("request without a request id".to_string()).into());
        };
        let (tx, rx) = oneshot::channel();

        {
            let mut writer = self.inner.writer.lock().await;

            // The pending entry must exist before the frame is on the
            // wire; it is installed under the writer lock so the read
            // loop can never see the response first.
            {
                let mut shared = self.inner.lock_shared();
                if let Some(reason) = &shared.disposed {
                    return Err(SkiffError::Disposed(reason.clone()).into());
                }
                shared.pending.insert(
                    id,
                    Pending {
                        tx,
                        wants_extended_reply,
                    },
                );
            }

            let mut buf = PacketBuf::new();
            if let Err(e) = request.encode(&mut buf) {
                self.inner.lock_shared().pending.remove(&id);
                return Err(e.into());
            }
            if let Err(e) = writer.send(buf.as_slice()).await {
                self.inner.lock_shared().pending.remove(&id);
                // A failed stream write kills the whole engine, not just
                // this request.
                return Err(match e {
                    SkiffError::Io(io) => {
                        let reason = format!("write failed: {}", io);
                        dispose(&self.inner, &reason);
                        SkiffError::Disposed(reason).into()
                    }
                    other => other.into(),
                });
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                let reason = self
                    .inner
                    .lock_shared()
                    .disposed
                    .clone()
                    .unwrap_or_else(|| "client disposed".to_string());
                Err(SkiffError::Disposed(reason).into())
            }
        }
    }

    /// Opens a remote file and returns a positioned byte-stream adapter
    /// over it.
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpResult<RemoteFile> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Open {
                    id,
                    path: path.to_string(),
                    flags,
                    attrs: attrs.clone(),
                },
                false,
            )
            .await?;
        let handle = expect_handle(response)?;
        Ok(RemoteFile {
            client: self.clone(),
            handle,
            pos: 0,
            closed: false,
        })
    }

    /// Opens a directory and returns a lazy reader over its entries.
    ///
    /// The remote handle is closed when the reader completes, fails, or
    /// is dropped.
    pub async fn read_dir(&self, path: &str) -> SftpResult<DirReader> {
        let id = self.next_id();
        let response = self
            .call(
                Request::OpenDir {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        let handle = expect_handle(response)?;
        Ok(DirReader {
            client: self.clone(),
            handle: Some(handle),
            buffered: VecDeque::new(),
        })
    }

    /// Attributes of `path`, following symlinks.
    pub async fn stat(&self, path: &str) -> SftpResult<FileAttributes> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Stat {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        expect_attrs(response)
    }

    /// Attributes of `path` itself, not following symlinks.
    pub async fn lstat(&self, path: &str) -> SftpResult<FileAttributes> {
        let id = self.next_id();
        let response = self
            .call(
                Request::LStat {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        expect_attrs(response)
    }

    /// Applies the present fields of `attrs` to `path`.
    pub async fn set_stat(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::SetStat {
                    id,
                    path: path.to_string(),
                    attrs: attrs.clone(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Creates a remote directory.
    pub async fn make_dir(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::MkDir {
                    id,
                    path: path.to_string(),
                    attrs: attrs.clone(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Removes a remote directory.
    pub async fn remove_dir(&self, path: &str) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::RmDir {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Removes a remote file.
    pub async fn remove(&self, path: &str) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Remove {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Renames `old_path` to `new_path`.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Rename {
                    id,
                    old_path: old_path.to_string(),
                    new_path: new_path.to_string(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Canonicalizes a remote path.
    pub async fn real_path(&self, path: &str) -> SftpResult<String> {
        let id = self.next_id();
        let response = self
            .call(
                Request::RealPath {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        let names = expect_names(response)?;
        names
            .into_iter()
            .next()
            .map(|name| name.filename)
            .ok_or_else(|| {
                SkiffError::Protocol("REALPATH answered with an empty NAME".to_string()).into()
            })
    }

    /// Resolves a remote symbolic link.
    pub async fn read_link(&self, path: &str) -> SftpResult<Name> {
        let id = self.next_id();
        let response = self
            .call(
                Request::ReadLink {
                    id,
                    path: path.to_string(),
                },
                false,
            )
            .await?;
        let names = expect_names(response)?;
        names.into_iter().next().ok_or_else(|| {
            SkiffError::Protocol("READLINK answered with an empty NAME".to_string()).into()
        })
    }

    /// Creates a remote symbolic link at `link_path` pointing to
    /// `target_path`.
    pub async fn symlink(&self, link_path: &str, target_path: &str) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Symlink {
                    id,
                    link_path: link_path.to_string(),
                    target_path: target_path.to_string(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Issues a vendor-specific request that is answered with STATUS.
    pub async fn extended(&self, name: &str, data: &[u8]) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Extended {
                    id,
                    name: name.to_string(),
                    data: data.to_vec(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Issues a vendor-specific request that may be answered with
    /// EXTENDED_REPLY, returning the uninterpreted reply bytes. A plain
    /// OK status yields an empty reply.
    pub async fn extended_with_reply(&self, name: &str, data: &[u8]) -> SftpResult<Vec<u8>> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Extended {
                    id,
                    name: name.to_string(),
                    data: data.to_vec(),
                },
                true,
            )
            .await?;
        match response {
            Response::ExtendedReply { data, .. } => Ok(data),
            Response::Status {
                status: StatusCode::Ok,
                ..
            } => Ok(Vec::new()),
            Response::Status {
                status, message, ..
            } => Err(StatusError::new(status, message).into()),
            other => Err(mismatch("EXTENDED_REPLY", &other)),
        }
    }

    /// Atomic rename via the `posix-rename@openssh.com` extension.
    pub async fn posix_rename(&self, old_path: &str, new_path: &str) -> SftpResult<()> {
        let mut body = PacketBuf::new();
        body.put_str(old_path);
        body.put_str(new_path);
        self.extended("posix-rename@openssh.com", body.as_slice())
            .await
    }

    async fn close_handle(&self, handle: &[u8]) -> SftpResult<()> {
        let id = self.next_id();
        let response = self
            .call(
                Request::Close {
                    id,
                    handle: handle.to_vec(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Disposes the engine: the read loop stops, every outstanding
    /// request fails with a disposed error, and the write stream is shut
    /// down. Subsequent operations fail the same way.
    pub async fn close(&self) {
        if let Some(task) = self.inner.lock_read_task().take() {
            task.abort();
        }
        dispose(&self.inner, "client closed");

        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("error shutting down write stream: {}", e);
        }
    }
}

/// Positioned byte-stream adapter over an opened remote file.
///
/// Reads and writes translate to READ/WRITE messages against the remote
/// handle; a client-side position counter advances with the relative
/// variants. Dropping the adapter closes the remote handle best-effort;
/// call [`RemoteFile::close`] to observe the outcome.
pub struct RemoteFile {
    client: SftpClient,
    handle: Vec<u8>,
    pos: u64,
    closed: bool,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("handle", &self.handle)
            .field("pos", &self.pos)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RemoteFile {
    /// Reads up to `len` bytes at `offset`, without moving the position.
    ///
    /// An empty result means end-of-file: a server answering EOF for an
    /// offset at or past the end is surfaced as zero bytes here.
    pub async fn read_at(&self, offset: u64, len: u32) -> SftpResult<Vec<u8>> {
        let id = self.client.next_id();
        let response = self
            .client
            .call(
                Request::Read {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    len,
                },
                false,
            )
            .await?;
        match response {
            Response::Data { data, .. } => Ok(data),
            Response::Status {
                status: StatusCode::Eof,
                ..
            } => Ok(Vec::new()),
            Response::Status {
                status, message, ..
            } => Err(StatusError::new(status, message).into()),
            other => Err(mismatch("DATA", &other)),
        }
    }

    /// Reads up to `len` bytes at the current position and advances it.
    pub async fn read(&mut self, len: u32) -> SftpResult<Vec<u8>> {
        let data = self.read_at(self.pos, len).await?;
        self.pos += data.len() as u64;
        Ok(data)
    }

    /// Reads from the current position to end-of-file.
    pub async fn read_to_end(&mut self) -> SftpResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(READ_CHUNK_SIZE).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Writes `data` at `offset`, without moving the position.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> SftpResult<()> {
        let id = self.client.next_id();
        let response = self
            .client
            .call(
                Request::Write {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    data: data.to_vec(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Writes `data` at the current position and advances it.
    pub async fn write(&mut self, data: &[u8]) -> SftpResult<()> {
        self.write_at(self.pos, data).await?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// The current position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the position.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Attributes of the open file (FSTAT).
    pub async fn stat(&self) -> SftpResult<FileAttributes> {
        let id = self.client.next_id();
        let response = self
            .client
            .call(
                Request::FStat {
                    id,
                    handle: self.handle.clone(),
                },
                false,
            )
            .await?;
        expect_attrs(response)
    }

    /// Applies the present fields of `attrs` to the open file (FSETSTAT).
    pub async fn set_stat(&self, attrs: &FileAttributes) -> SftpResult<()> {
        let id = self.client.next_id();
        let response = self
            .client
            .call(
                Request::FSetStat {
                    id,
                    handle: self.handle.clone(),
                    attrs: attrs.clone(),
                },
                false,
            )
            .await?;
        expect_status_ok(response)
    }

    /// Closes the remote handle.
    pub async fn close(mut self) -> SftpResult<()> {
        self.closed = true;
        let handle = std::mem::take(&mut self.handle);
        self.client.close_handle(&handle).await
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let client = self.client.clone();
        let handle = std::mem::take(&mut self.handle);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = client.close_handle(&handle).await {
                        debug!("error closing remote file handle on drop: {}", e);
                    }
                });
            }
            Err(_) => warn!("remote file dropped outside a runtime; handle leaked"),
        }
    }
}

/// Lazy reader over a remote directory.
///
/// Pages through READDIR responses on demand; `SSH_FX_EOF` completes the
/// sequence. The remote handle is closed on completion, on any failure,
/// and best-effort on drop.
pub struct DirReader {
    client: SftpClient,
    handle: Option<Vec<u8>>,
    buffered: VecDeque<Name>,
}

impl DirReader {
    /// The next directory entry, or `None` after the last one.
    pub async fn next_entry(&mut self) -> SftpResult<Option<Name>> {
        loop {
            if let Some(name) = self.buffered.pop_front() {
                return Ok(Some(name));
            }
            let Some(handle) = self.handle.clone() else {
                return Ok(None);
            };

            let id = self.client.next_id();
            let response = match self
                .client
                .call(Request::ReadDir { id, handle }, false)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    self.abandon().await;
                    return Err(e);
                }
            };
            match response {
                Response::Name { names, .. } => {
                    if names.is_empty() {
                        self.finish().await?;
                        return Ok(None);
                    }
                    self.buffered.extend(names);
                }
                Response::Status {
                    status: StatusCode::Eof,
                    ..
                } => {
                    self.finish().await?;
                    return Ok(None);
                }
                Response::Status {
                    status, message, ..
                } => {
                    self.abandon().await;
                    return Err(StatusError::new(status, message).into());
                }
                other => {
                    self.abandon().await;
                    return Err(mismatch("NAME", &other));
                }
            }
        }
    }

    /// Drains the remaining entries into a vector, closing the handle.
    pub async fn collect(mut self) -> SftpResult<Vec<Name>> {
        let mut names = Vec::new();
        while let Some(name) = self.next_entry().await? {
            names.push(name);
        }
        Ok(names)
    }

    /// Closes the remote handle early.
    pub async fn close(mut self) -> SftpResult<()> {
        self.finish().await
    }

    async fn finish(&mut self) -> SftpResult<()> {
        match self.handle.take() {
            Some(handle) => self.client.close_handle(&handle).await,
            None => Ok(()),
        }
    }

    async fn abandon(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.client.close_handle(&handle).await {
                debug!("error closing directory handle after failure: {}", e);
            }
        }
    }
}

impl Drop for DirReader {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = client.close_handle(&handle).await {
                        debug!("error closing directory handle on drop: {}", e);
                    }
                });
            }
            Err(_) => warn!("directory reader dropped outside a runtime; handle leaked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_counter_is_monotonic() {
        let counter = AtomicU32::new(1);

        let id1 = counter.fetch_add(1, Ordering::SeqCst);
        let id2 = counter.fetch_add(1, Ordering::SeqCst);
        let id3 = counter.fetch_add(1, Ordering::SeqCst);

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(id3, 3);
    }

    #[test]
    fn test_request_id_counter_wraps_on_overflow() {
        let counter = AtomicU32::new(u32::MAX);
        assert_eq!(counter.fetch_add(1, Ordering::SeqCst), u32::MAX);
        assert_eq!(counter.fetch_add(1, Ordering::SeqCst), 0);
    }
}
