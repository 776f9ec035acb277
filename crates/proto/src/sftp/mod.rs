//! SFTP (SSH File Transfer Protocol) version 3.
//!
//! This module implements both peers of SFTP v3, the most widely
//! supported version, over any bidirectional byte stream the caller
//! supplies: an SSH "sftp" subsystem channel, a pair of process
//! standard-I/O handles, or an in-memory duplex pipe. Authentication,
//! encryption, and transport framing belong to the stream's owner; the
//! engines assume a reliable ordered byte stream.
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{OpenFlags, FileAttributes, SftpClient};
//!
//! # async fn example(
//! #     reader: tokio::io::ReadHalf<tokio::io::DuplexStream>,
//! #     writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let client = SftpClient::connect(reader, writer).await?;
//!
//! let mut file = client.open("/remote/file.txt", OpenFlags::READ, &FileAttributes::new()).await?;
//! let contents = file.read_to_end().await?;
//! file.close().await?;
//!
//! let mut dir = client.read_dir("/remote").await?;
//! while let Some(entry) = dir.next_entry().await? {
//!     println!("{}", entry.filename);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Serving works the same way in the other direction: implement
//! [`SftpBackend`] over your storage and hand a stream pair to
//! [`SftpServer::run`].
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - Most common version
//!
//! One deliberate deviation from the draft text: SYMLINK encodes its
//! target path before its link path on the wire, matching OpenSSH and
//! every widely deployed client. See [`message::Request::Symlink`].

pub mod backend;
pub mod client;
pub mod codec;
pub mod error;
pub mod handle;
pub mod message;
pub mod server;
pub mod types;

pub use backend::SftpBackend;
pub use client::{DirReader, RemoteFile, SftpClient, SftpClientConfig};
pub use error::{SftpError, SftpResult, StatusError};
pub use handle::{HandleTable, NameIter};
pub use message::{MessageType, Request, Response, SFTP_VERSION};
pub use server::{SftpServer, SftpServerConfig};
pub use types::{Extensions, FileAttributes, Name, OpenDisposition, OpenFlags, StatusCode};
