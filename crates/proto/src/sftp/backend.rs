//! The pluggable capability set a server invokes to fulfill requests.
//!
//! A back-end answers in terms of paths and byte streams; the engine owns
//! everything handle-shaped. `open` returns a seekable stream that the
//! engine stores in its handle table and drives for READ/WRITE/CLOSE;
//! `read_dir` returns a lazy iterator the engine pages through for
//! READDIR; FSTAT and FSETSTAT are served against the path the handle
//! was opened with.
//!
//! Typed failures are reported by returning
//! [`SftpError::Status`](super::error::SftpError): the engine turns the
//! carried code into a STATUS response. Any other failure becomes
//! `SSH_FX_FAILURE`. A "not found" path must be reported as
//! `SSH_FX_NO_SUCH_FILE`.
//!
//! Back-end futures are cancelled by being dropped; the engine drops any
//! in-flight call when it shuts down.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use super::error::{SftpResult, StatusError};
use super::handle::NameIter;
use super::message::Response;
use super::types::{Extensions, FileAttributes, Name, OpenFlags, StatusCode};

/// Server back-end contract.
///
/// Implementations supply the storage behind a server engine: a host
/// directory subtree, an in-memory tree for tests, or anything else that
/// can produce seekable byte streams and directory listings.
#[async_trait]
pub trait SftpBackend: Send + Sync {
    /// Seekable byte stream serving READ and WRITE for one open file.
    type File: AsyncRead + AsyncWrite + AsyncSeek + Send + Unpin + 'static;

    /// Called once after version negotiation.
    ///
    /// Receives the client's advertised version and extensions; the
    /// returned extensions are sent back in the VERSION response.
    async fn init(
        &self,
        _client_version: u32,
        _extensions: &Extensions,
    ) -> SftpResult<Extensions> {
        Ok(Extensions::new())
    }

    /// Opens a file and returns its byte stream.
    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpResult<Self::File>;

    /// Attributes of `path`, following symlinks.
    async fn stat(&self, path: &str) -> SftpResult<FileAttributes>;

    /// Attributes of `path` itself, not following symlinks.
    async fn lstat(&self, path: &str) -> SftpResult<FileAttributes>;

    /// Applies the present fields of `attrs` to `path`.
    async fn set_stat(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()>;

    /// Returns a lazy iterator over the entries of a directory.
    ///
    /// The engine calls this on the first READDIR against a directory
    /// handle and pages through the iterator afterwards; the iterator may
    /// produce entries on demand.
    async fn read_dir(&self, path: &str) -> SftpResult<NameIter>;

    /// Deletes a file.
    async fn remove(&self, path: &str) -> SftpResult<()>;

    /// Creates a directory.
    async fn mkdir(&self, path: &str, attrs: &FileAttributes) -> SftpResult<()>;

    /// Deletes a directory.
    async fn rmdir(&self, path: &str) -> SftpResult<()>;

    /// Canonicalizes a path. The engine has already coerced empty and
    /// `"."` inputs to `"/"`.
    async fn real_path(&self, path: &str) -> SftpResult<String>;

    /// Renames `old_path` to `new_path`.
    async fn rename(&self, old_path: &str, new_path: &str) -> SftpResult<()>;

    /// Resolves a symbolic link to a name record.
    async fn read_link(&self, _path: &str) -> SftpResult<Name> {
        Err(StatusError::from_code(StatusCode::OpUnsupported).into())
    }

    /// Creates a symbolic link at `link_path` pointing to `target_path`.
    async fn symlink(&self, _link_path: &str, _target_path: &str) -> SftpResult<()> {
        Err(StatusError::from_code(StatusCode::OpUnsupported).into())
    }

    /// Handles a vendor-specific EXTENDED request.
    ///
    /// `data` is the uninterpreted request tail. The returned response is
    /// sent verbatim and must carry `id`. The default refuses every
    /// request name.
    async fn extended(&self, _id: u32, _name: &str, _data: &[u8]) -> SftpResult<Response> {
        Err(StatusError::from_code(StatusCode::OpUnsupported).into())
    }
}
