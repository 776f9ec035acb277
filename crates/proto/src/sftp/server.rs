//! SFTP server engine.
//!
//! The engine owns one bidirectional byte-stream pair and serves exactly
//! one session on it. It moves through three states:
//!
//! 1. **AwaitingInit** - exactly one frame is read; anything but INIT is
//!    a protocol error. The negotiated version is
//!    `min(client_version, 3)` and the back-end's `init` extensions are
//!    sent back in the VERSION response.
//! 2. **Serving** - one cooperative loop: read a request, dispatch to the
//!    back-end, write the response. Back-end calls may suspend; the next
//!    request is not processed while one does, so back-ends never see
//!    overlapping calls unless they opt in themselves.
//! 3. **Terminated** - on clean end-of-stream, a zero-length frame, or a
//!    failure; every open handle is finalized.
//!
//! Typed back-end failures become STATUS responses carrying their code;
//! anything else becomes `SSH_FX_FAILURE` and is logged. Unknown request
//! tags are answered with `SSH_FX_OP_UNSUPPORTED`, not a disconnect.

use std::io::SeekFrom;

use skiff_platform::{SkiffError, SkiffResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::backend::SftpBackend;
use super::codec::{read_frame, FrameWriter, PacketBuf, DEFAULT_MAX_PACKET_SIZE};
use super::error::{SftpError, StatusError};
use super::handle::{DirState, HandleEntry, HandleTable, DEFAULT_MAX_OPEN_HANDLES};
use super::message::{Request, Response, SFTP_VERSION};
use super::types::{FileAttributes, Name, StatusCode};

/// Default number of name records returned per READDIR page.
pub const DEFAULT_READDIR_PAGE_SIZE: usize = 128;

/// SFTP server configuration.
#[derive(Debug, Clone)]
pub struct SftpServerConfig {
    /// Ceiling for a single frame payload.
    pub max_packet_size: usize,
    /// Ceiling on concurrently open handles.
    pub max_open_handles: usize,
    /// Maximum name records per READDIR response.
    pub readdir_page_size: usize,
}

impl Default for SftpServerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_open_handles: DEFAULT_MAX_OPEN_HANDLES,
            readdir_page_size: DEFAULT_READDIR_PAGE_SIZE,
        }
    }
}

/// SFTP server engine for one session.
pub struct SftpServer<B: SftpBackend> {
    backend: B,
    config: SftpServerConfig,
    handles: HandleTable<B::File>,
    version: u32,
}

impl<B: SftpBackend> SftpServer<B> {
    /// Creates a server with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SftpServerConfig::default())
    }

    /// Creates a server with an explicit configuration.
    pub fn with_config(backend: B, config: SftpServerConfig) -> Self {
        let handles = HandleTable::new(config.max_open_handles);
        Self {
            backend,
            config,
            handles,
            version: SFTP_VERSION,
        }
    }

    /// Serves one session over the given stream pair until the peer
    /// closes its end, a protocol violation occurs, or the caller drops
    /// the future.
    ///
    /// Every open handle is finalized before this returns.
    pub async fn run<R, W>(mut self, mut reader: R, writer: W) -> SkiffResult<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut writer = FrameWriter::new(writer, self.config.max_packet_size);
        let result = self.serve(&mut reader, &mut writer).await;

        for entry in self.handles.drain() {
            if let HandleEntry::File { mut file, .. } = entry {
                if let Err(e) = file.shutdown().await {
                    debug!("error finalizing open file on shutdown: {}", e);
                }
            }
        }

        result
    }

    async fn serve<R, W>(&mut self, reader: &mut R, writer: &mut FrameWriter<W>) -> SkiffResult<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        // AwaitingInit: exactly one frame, and it must be INIT.
        let frame = read_frame(reader, self.config.max_packet_size)
            .await?
            .ok_or_else(|| {
                SkiffError::Protocol("stream closed before INIT".to_string())
            })?;
        let request = Request::decode(&frame)?;
        let Request::Init {
            version: client_version,
            extensions: client_extensions,
        } = request
        else {
            return Err(SkiffError::Protocol(
                "expected INIT as the first message".to_string(),
            ));
        };

        self.version = client_version.min(SFTP_VERSION);
        let server_extensions = self
            .backend
            .init(client_version, &client_extensions)
            .await
            .map_err(|e| match e {
                SftpError::Engine(e) => e,
                SftpError::Status(e) => {
                    SkiffError::Protocol(format!("back-end init failed: {}", e))
                }
            })?;

        self.send(
            writer,
            Response::Version {
                version: self.version,
                extensions: server_extensions,
            },
        )
        .await?;
        info!(
            "sftp session established (client version {}, negotiated {})",
            client_version, self.version
        );

        // Serving.
        loop {
            let Some(frame) = read_frame(reader, self.config.max_packet_size).await? else {
                debug!("sftp session closed by peer");
                return Ok(());
            };
            let request = Request::decode(&frame)?;

            if matches!(request, Request::Init { .. }) {
                return Err(SkiffError::Protocol(
                    "INIT received after session establishment".to_string(),
                ));
            }
            let Some(id) = request.request_id() else {
                return Err(SkiffError::Protocol(
                    "request without a request id".to_string(),
                ));
            };

            let response = match self.dispatch(id, request).await {
                Ok(response) => response,
                Err(SftpError::Status(e)) => {
                    debug!("request {} answered with status {:?}", id, e.code);
                    self.status_response(id, e)
                }
                Err(SftpError::Engine(e)) => {
                    warn!("request {} failed unexpectedly: {}", id, e);
                    self.status_response(id, StatusError::from_code(StatusCode::Failure))
                }
            };
            self.send(writer, response).await?;
        }
    }

    async fn send<W>(&self, writer: &mut FrameWriter<W>, response: Response) -> SkiffResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut buf = PacketBuf::new();
        response.encode(&mut buf, self.version);
        writer.send(buf.as_slice()).await
    }

    fn status_response(&self, id: u32, error: StatusError) -> Response {
        Response::Status {
            id,
            status: error.code,
            message: error.message,
            language: String::new(),
        }
    }

    fn ok_response(&self, id: u32) -> Response {
        self.status_response(id, StatusError::from_code(StatusCode::Ok))
    }

    async fn dispatch(&mut self, id: u32, request: Request) -> Result<Response, SftpError> {
        match request {
            Request::Open {
                path, flags, attrs, ..
            } => {
                let file = self.backend.open(&path, flags, &attrs).await?;
                let handle = self.handles.add(HandleEntry::File { path, file })?;
                Ok(Response::Handle { id, handle })
            }
            Request::Close { handle, .. } => {
                match self.handles.remove(&handle) {
                    Some(HandleEntry::File { mut file, .. }) => {
                        file.shutdown().await?;
                    }
                    Some(HandleEntry::Dir { .. }) => {}
                    None => {
                        return Err(
                            StatusError::new(StatusCode::NoSuchFile, "invalid handle").into()
                        );
                    }
                }
                Ok(self.ok_response(id))
            }
            Request::Read {
                handle,
                offset,
                len,
                ..
            } => self.handle_read(id, &handle, offset, len).await,
            Request::Write {
                handle,
                offset,
                data,
                ..
            } => {
                let file = self.handles.file_mut(&handle)?;
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(&data).await?;
                Ok(self.ok_response(id))
            }
            Request::LStat { path, .. } => {
                let attrs = self.backend.lstat(&path).await?;
                Ok(Response::Attrs { id, attrs })
            }
            Request::Stat { path, .. } => {
                let attrs = self.backend.stat(&path).await?;
                Ok(Response::Attrs { id, attrs })
            }
            Request::FStat { handle, .. } => {
                let path = self.handles.path(&handle)?.to_string();
                let attrs = self.backend.stat(&path).await?;
                Ok(Response::Attrs { id, attrs })
            }
            Request::SetStat { path, attrs, .. } => {
                self.backend.set_stat(&path, &attrs).await?;
                Ok(self.ok_response(id))
            }
            Request::FSetStat { handle, attrs, .. } => {
                let path = self.handles.path(&handle)?.to_string();
                self.backend.set_stat(&path, &attrs).await?;
                Ok(self.ok_response(id))
            }
            Request::OpenDir { path, .. } => {
                let handle = self.handles.add(HandleEntry::Dir {
                    path,
                    state: DirState::Pending,
                })?;
                Ok(Response::Handle { id, handle })
            }
            Request::ReadDir { handle, .. } => self.handle_readdir(id, &handle).await,
            Request::Remove { path, .. } => {
                self.backend.remove(&path).await?;
                Ok(self.ok_response(id))
            }
            Request::MkDir { path, attrs, .. } => {
                self.backend.mkdir(&path, &attrs).await?;
                Ok(self.ok_response(id))
            }
            Request::RmDir { path, .. } => {
                self.backend.rmdir(&path).await?;
                Ok(self.ok_response(id))
            }
            Request::RealPath { path, .. } => {
                let path = if path.is_empty() || path == "." {
                    "/".to_string()
                } else {
                    path
                };
                let resolved = self.backend.real_path(&path).await?;
                let name = Name {
                    filename: resolved.clone(),
                    long_name: resolved,
                    attrs: FileAttributes::new(),
                };
                Ok(Response::Name {
                    id,
                    names: vec![name],
                })
            }
            Request::Rename {
                old_path, new_path, ..
            } => {
                self.backend.rename(&old_path, &new_path).await?;
                Ok(self.ok_response(id))
            }
            Request::ReadLink { path, .. } => {
                let name = self.backend.read_link(&path).await?;
                Ok(Response::Name {
                    id,
                    names: vec![name],
                })
            }
            Request::Symlink {
                link_path,
                target_path,
                ..
            } => {
                self.backend.symlink(&link_path, &target_path).await?;
                Ok(self.ok_response(id))
            }
            Request::Extended { name, data, .. } => {
                self.backend.extended(id, &name, &data).await
            }
            Request::Unknown { tag, .. } => {
                warn!("unsupported request tag {}", tag);
                Err(StatusError::new(
                    StatusCode::OpUnsupported,
                    format!("unsupported request tag {}", tag),
                )
                .into())
            }
            Request::Init { .. } => Err(SftpError::Engine(SkiffError::Protocol(
                "INIT is not dispatchable".to_string(),
            ))),
        }
    }

    async fn handle_read(
        &mut self,
        id: u32,
        handle: &[u8],
        offset: u64,
        len: u32,
    ) -> Result<Response, SftpError> {
        // A DATA response adds a tag, a request id and a length prefix on
        // top of the data; keep the whole frame under the packet ceiling.
        let max_data = self.config.max_packet_size.saturating_sub(64);
        let wanted = (len as usize).min(max_data);

        let file = self.handles.file_mut(handle)?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut data = vec![0u8; wanted];
        let mut filled = 0;
        while filled < wanted {
            let n = file.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            // Reading at or past end-of-file is EOF, never an empty DATA.
            return Err(StatusError::from_code(StatusCode::Eof).into());
        }
        data.truncate(filled);
        Ok(Response::Data { id, data })
    }

    async fn handle_readdir(&mut self, id: u32, handle: &[u8]) -> Result<Response, SftpError> {
        if matches!(self.handles.dir_mut(handle)?, DirState::Pending) {
            let path = self.handles.path(handle)?.to_string();
            let iter = self.backend.read_dir(&path).await?;
            *self.handles.dir_mut(handle)? = DirState::Reading(iter);
        }

        let page_size = self.config.readdir_page_size;
        let DirState::Reading(iter) = self.handles.dir_mut(handle)? else {
            return Err(StatusError::new(StatusCode::Failure, "directory state lost").into());
        };

        let mut names = Vec::new();
        while names.len() < page_size {
            match iter.next() {
                Some(name) => names.push(name),
                None => break,
            }
        }

        if names.is_empty() {
            return Err(StatusError::from_code(StatusCode::Eof).into());
        }
        Ok(Response::Name { id, names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::codec::PacketReader;
    use crate::sftp::message::MessageType;
    use crate::sftp::types::Extensions;
    use async_trait::async_trait;

    struct EmptyBackend;

    #[async_trait]
    impl SftpBackend for EmptyBackend {
        type File = std::io::Cursor<Vec<u8>>;

        async fn open(
            &self,
            _path: &str,
            _flags: crate::sftp::types::OpenFlags,
            _attrs: &FileAttributes,
        ) -> Result<Self::File, SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn stat(&self, _path: &str) -> Result<FileAttributes, SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn lstat(&self, path: &str) -> Result<FileAttributes, SftpError> {
            self.stat(path).await
        }

        async fn set_stat(
            &self,
            _path: &str,
            _attrs: &FileAttributes,
        ) -> Result<(), SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn read_dir(
            &self,
            _path: &str,
        ) -> Result<crate::sftp::handle::NameIter, SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn remove(&self, _path: &str) -> Result<(), SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn mkdir(
            &self,
            _path: &str,
            _attrs: &FileAttributes,
        ) -> Result<(), SftpError> {
            Err(StatusError::from_code(StatusCode::PermissionDenied).into())
        }

        async fn rmdir(&self, _path: &str) -> Result<(), SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }

        async fn real_path(&self, path: &str) -> Result<String, SftpError> {
            Ok(path.to_string())
        }

        async fn rename(&self, _old: &str, _new: &str) -> Result<(), SftpError> {
            Err(StatusError::from_code(StatusCode::NoSuchFile).into())
        }
    }

    async fn write_raw_frame(stream: &mut tokio::io::DuplexStream, payload: &[u8]) {
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_raw_frame(stream: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    #[tokio::test]
    async fn test_version_negotiates_down_to_3() {
        let (mut client, server_stream) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = SftpServer::new(EmptyBackend);
        let task = tokio::spawn(server.run(server_read, server_write));

        let mut buf = PacketBuf::new();
        Request::Init {
            version: 6,
            extensions: Extensions::new(),
        }
        .encode(&mut buf)
        .unwrap();
        write_raw_frame(&mut client, buf.as_slice()).await;

        let payload = read_raw_frame(&mut client).await;
        let mut r = PacketReader::new(&payload);
        assert_eq!(r.get_u8().unwrap(), MessageType::Version as u8);
        assert_eq!(r.get_u32().unwrap(), 3);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_first_message_must_be_init() {
        let (mut client, server_stream) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = SftpServer::new(EmptyBackend);
        let task = tokio::spawn(server.run(server_read, server_write));

        let mut buf = PacketBuf::new();
        Request::Stat {
            id: 1,
            path: "/".to_string(),
        }
        .encode(&mut buf)
        .unwrap();
        write_raw_frame(&mut client, buf.as_slice()).await;

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_second_init_is_fatal() {
        let (mut client, server_stream) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = SftpServer::new(EmptyBackend);
        let task = tokio::spawn(server.run(server_read, server_write));

        let mut buf = PacketBuf::new();
        Request::Init {
            version: 3,
            extensions: Extensions::new(),
        }
        .encode(&mut buf)
        .unwrap();
        write_raw_frame(&mut client, buf.as_slice()).await;
        let _version = read_raw_frame(&mut client).await;

        let mut buf = PacketBuf::new();
        Request::Init {
            version: 3,
            extensions: Extensions::new(),
        }
        .encode(&mut buf)
        .unwrap();
        write_raw_frame(&mut client, buf.as_slice()).await;

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unknown_tag_answered_with_op_unsupported() {
        let (mut client, server_stream) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = SftpServer::new(EmptyBackend);
        let task = tokio::spawn(server.run(server_read, server_write));

        let mut buf = PacketBuf::new();
        Request::Init {
            version: 3,
            extensions: Extensions::new(),
        }
        .encode(&mut buf)
        .unwrap();
        write_raw_frame(&mut client, buf.as_slice()).await;
        let _version = read_raw_frame(&mut client).await;

        // Tag 99 does not exist in protocol version 3.
        write_raw_frame(&mut client, &[99, 0, 0, 0, 7]).await;

        let payload = read_raw_frame(&mut client).await;
        let response = Response::decode(&payload).unwrap();
        match response {
            Response::Status { id, status, .. } => {
                assert_eq!(id, 7);
                assert_eq!(status, StatusCode::OpUnsupported);
            }
            other => panic!("unexpected response {:?}", other),
        }

        drop(client);
        task.await.unwrap().unwrap();
    }
}
