//! Protocol implementations for the skiff file-transfer ecosystem.
//!
//! This crate provides a transport-agnostic implementation of the SFTP
//! version 3 protocol (`draft-ietf-secsh-filexfer-02`): a client engine
//! and a server engine that exchange length-prefixed binary messages over
//! any bidirectional byte stream the caller supplies.
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_proto::sftp::{FileAttributes, OpenFlags, SftpClient};
//!
//! # async fn example(
//! #     reader: tokio::io::ReadHalf<tokio::io::DuplexStream>,
//! #     writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let client = SftpClient::connect(reader, writer).await?;
//! let attrs = client.stat("/remote/file.txt").await?;
//! println!("size: {:?}", attrs.size);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod sftp;
