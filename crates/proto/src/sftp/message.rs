//! SFTP protocol messages.
//!
//! Every request and response variant knows its own type tag and how to
//! encode its body after the common `(tag, request-id)` header. Decoding
//! runs in two phases: the caller reads the frame and hands the payload
//! here, where the tag is read generically and a variant-specific decoder
//! consumes the remainder.
//!
//! Unknown request tags decode to [`Request::Unknown`] so a server can
//! answer `SSH_FX_OP_UNSUPPORTED` instead of dropping the connection.
//! Unknown response tags are a protocol error on the client.

use skiff_platform::{SkiffError, SkiffResult};

use super::codec::{PacketBuf, PacketReader};
use super::types::{Extensions, FileAttributes, Name, OpenFlags, StatusCode};

/// SFTP protocol version implemented by both engines (v3).
pub const SFTP_VERSION: u32 = 3;

/// SFTP message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_LSTAT - Get attributes without following symlinks
    LStat = 7,
    /// SSH_FXP_FSTAT - Get attributes by handle
    FStat = 8,
    /// SSH_FXP_SETSTAT - Set attributes by path
    SetStat = 9,
    /// SSH_FXP_FSETSTAT - Set attributes by handle
    FSetStat = 10,
    /// SSH_FXP_OPENDIR - Open directory
    OpenDir = 11,
    /// SSH_FXP_READDIR - Read directory page
    ReadDir = 12,
    /// SSH_FXP_REMOVE - Remove file
    Remove = 13,
    /// SSH_FXP_MKDIR - Create directory
    MkDir = 14,
    /// SSH_FXP_RMDIR - Remove directory
    RmDir = 15,
    /// SSH_FXP_REALPATH - Canonicalize path
    RealPath = 16,
    /// SSH_FXP_STAT - Get attributes following symlinks
    Stat = 17,
    /// SSH_FXP_RENAME - Rename file or directory
    Rename = 18,
    /// SSH_FXP_READLINK - Read symbolic link target
    ReadLink = 19,
    /// SSH_FXP_SYMLINK - Create symbolic link
    Symlink = 20,

    /// SSH_FXP_STATUS - Status response
    Status = 101,
    /// SSH_FXP_HANDLE - Handle response
    Handle = 102,
    /// SSH_FXP_DATA - Data response
    Data = 103,
    /// SSH_FXP_NAME - Name response
    Name = 104,
    /// SSH_FXP_ATTRS - Attributes response
    Attrs = 105,

    /// SSH_FXP_EXTENDED - Extended request
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY - Extended response
    ExtendedReply = 201,
}

impl MessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::LStat),
            8 => Some(Self::FStat),
            9 => Some(Self::SetStat),
            10 => Some(Self::FSetStat),
            11 => Some(Self::OpenDir),
            12 => Some(Self::ReadDir),
            13 => Some(Self::Remove),
            14 => Some(Self::MkDir),
            15 => Some(Self::RmDir),
            16 => Some(Self::RealPath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::ReadLink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }
}

fn decode_extension_pairs(r: &mut PacketReader<'_>) -> SkiffResult<Extensions> {
    let mut extensions = Extensions::new();
    while r.remaining() > 0 {
        let name = r.get_string()?;
        let value = r.get_string()?;
        extensions.insert(name, value);
    }
    Ok(extensions)
}

fn encode_extension_pairs(buf: &mut PacketBuf, extensions: &Extensions) {
    for (name, value) in extensions {
        buf.put_str(name);
        buf.put_str(value);
    }
}

/// A client-to-server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// SSH_FXP_INIT
    Init {
        /// Highest protocol version the client speaks.
        version: u32,
        /// Client extension advertisements.
        extensions: Extensions,
    },
    /// SSH_FXP_OPEN
    Open {
        /// Request id.
        id: u32,
        /// File path.
        path: String,
        /// Access flags.
        flags: OpenFlags,
        /// Initial attributes.
        attrs: FileAttributes,
    },
    /// SSH_FXP_CLOSE
    Close {
        /// Request id.
        id: u32,
        /// Handle to release.
        handle: Vec<u8>,
    },
    /// SSH_FXP_READ
    Read {
        /// Request id.
        id: u32,
        /// File handle.
        handle: Vec<u8>,
        /// Byte offset to read from.
        offset: u64,
        /// Maximum byte count to return.
        len: u32,
    },
    /// SSH_FXP_WRITE
    Write {
        /// Request id.
        id: u32,
        /// File handle.
        handle: Vec<u8>,
        /// Byte offset to write at.
        offset: u64,
        /// Data to write.
        data: Vec<u8>,
    },
    /// SSH_FXP_LSTAT
    LStat {
        /// Request id.
        id: u32,
        /// Path to inspect without following symlinks.
        path: String,
    },
    /// SSH_FXP_FSTAT
    FStat {
        /// Request id.
        id: u32,
        /// Open handle to inspect.
        handle: Vec<u8>,
    },
    /// SSH_FXP_SETSTAT
    SetStat {
        /// Request id.
        id: u32,
        /// Path to modify.
        path: String,
        /// Attributes to apply.
        attrs: FileAttributes,
    },
    /// SSH_FXP_FSETSTAT
    FSetStat {
        /// Request id.
        id: u32,
        /// Open handle to modify.
        handle: Vec<u8>,
        /// Attributes to apply.
        attrs: FileAttributes,
    },
    /// SSH_FXP_OPENDIR
    OpenDir {
        /// Request id.
        id: u32,
        /// Directory path.
        path: String,
    },
    /// SSH_FXP_READDIR
    ReadDir {
        /// Request id.
        id: u32,
        /// Directory handle.
        handle: Vec<u8>,
    },
    /// SSH_FXP_REMOVE
    Remove {
        /// Request id.
        id: u32,
        /// File path to delete.
        path: String,
    },
    /// SSH_FXP_MKDIR
    MkDir {
        /// Request id.
        id: u32,
        /// Directory path to create.
        path: String,
        /// Attributes for the new directory.
        attrs: FileAttributes,
    },
    /// SSH_FXP_RMDIR
    RmDir {
        /// Request id.
        id: u32,
        /// Directory path to delete.
        path: String,
    },
    /// SSH_FXP_REALPATH
    RealPath {
        /// Request id.
        id: u32,
        /// Path to canonicalize.
        path: String,
    },
    /// SSH_FXP_STAT
    Stat {
        /// Request id.
        id: u32,
        /// Path to inspect, following symlinks.
        path: String,
    },
    /// SSH_FXP_RENAME
    Rename {
        /// Request id.
        id: u32,
        /// Current path.
        old_path: String,
        /// New path.
        new_path: String,
    },
    /// SSH_FXP_READLINK
    ReadLink {
        /// Request id.
        id: u32,
        /// Symlink path.
        path: String,
    },
    /// SSH_FXP_SYMLINK
    Symlink {
        /// Request id.
        id: u32,
        /// Path of the link to create.
        link_path: String,
        /// Path the link points at.
        target_path: String,
    },
    /// SSH_FXP_EXTENDED
    Extended {
        /// Request id.
        id: u32,
        /// Vendor-scoped request name (`name@domain`).
        name: String,
        /// Uninterpreted request tail.
        data: Vec<u8>,
    },
    /// A request whose tag this implementation does not know.
    ///
    /// Decoded instead of rejected so the server can answer
    /// `SSH_FX_OP_UNSUPPORTED`.
    Unknown {
        /// Request id.
        id: u32,
        /// The unrecognized tag.
        tag: u8,
    },
}

impl Request {
    /// The request id, absent only for INIT.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Request::Init { .. } => None,
            Request::Open { id, .. }
            | Request::Close { id, .. }
            | Request::Read { id, .. }
            | Request::Write { id, .. }
            | Request::LStat { id, .. }
            | Request::FStat { id, .. }
            | Request::SetStat { id, .. }
            | Request::FSetStat { id, .. }
            | Request::OpenDir { id, .. }
            | Request::ReadDir { id, .. }
            | Request::Remove { id, .. }
            | Request::MkDir { id, .. }
            | Request::RmDir { id, .. }
            | Request::RealPath { id, .. }
            | Request::Stat { id, .. }
            | Request::Rename { id, .. }
            | Request::ReadLink { id, .. }
            | Request::Symlink { id, .. }
            | Request::Extended { id, .. }
            | Request::Unknown { id, .. } => Some(*id),
        }
    }

    /// Serializes the tag and body into `buf`.
    pub fn encode(&self, buf: &mut PacketBuf) -> SkiffResult<()> {
        match self {
            Request::Init {
                version,
                extensions,
            } => {
                buf.put_u8(MessageType::Init as u8);
                buf.put_u32(*version);
                encode_extension_pairs(buf, extensions);
            }
            Request::Open {
                id,
                path,
                flags,
                attrs,
            } => {
                buf.put_u8(MessageType::Open as u8);
                buf.put_u32(*id);
                buf.put_str(path);
                buf.put_u32(flags.0);
                attrs.encode(buf);
            }
            Request::Close { id, handle } => {
                buf.put_u8(MessageType::Close as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
            }
            Request::Read {
                id,
                handle,
                offset,
                len,
            } => {
                buf.put_u8(MessageType::Read as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Request::Write {
                id,
                handle,
                offset,
                data,
            } => {
                buf.put_u8(MessageType::Write as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
                buf.put_u64(*offset);
                buf.put_bytes(data);
            }
            Request::LStat { id, path } => {
                buf.put_u8(MessageType::LStat as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::FStat { id, handle } => {
                buf.put_u8(MessageType::FStat as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
            }
            Request::SetStat { id, path, attrs } => {
                buf.put_u8(MessageType::SetStat as u8);
                buf.put_u32(*id);
                buf.put_str(path);
                attrs.encode(buf);
            }
            Request::FSetStat { id, handle, attrs } => {
                buf.put_u8(MessageType::FSetStat as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
                attrs.encode(buf);
            }
            Request::OpenDir { id, path } => {
                buf.put_u8(MessageType::OpenDir as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::ReadDir { id, handle } => {
                buf.put_u8(MessageType::ReadDir as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
            }
            Request::Remove { id, path } => {
                buf.put_u8(MessageType::Remove as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::MkDir { id, path, attrs } => {
                buf.put_u8(MessageType::MkDir as u8);
                buf.put_u32(*id);
                buf.put_str(path);
                attrs.encode(buf);
            }
            Request::RmDir { id, path } => {
                buf.put_u8(MessageType::RmDir as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::RealPath { id, path } => {
                buf.put_u8(MessageType::RealPath as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::Stat { id, path } => {
                buf.put_u8(MessageType::Stat as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::Rename {
                id,
                old_path,
                new_path,
            } => {
                buf.put_u8(MessageType::Rename as u8);
                buf.put_u32(*id);
                buf.put_str(old_path);
                buf.put_str(new_path);
            }
            Request::ReadLink { id, path } => {
                buf.put_u8(MessageType::ReadLink as u8);
                buf.put_u32(*id);
                buf.put_str(path);
            }
            Request::Symlink {
                id,
                link_path,
                target_path,
            } => {
                // Target travels first, matching widely deployed clients
                // rather than the draft text.
                buf.put_u8(MessageType::Symlink as u8);
                buf.put_u32(*id);
                buf.put_str(target_path);
                buf.put_str(link_path);
            }
            Request::Extended { id, name, data } => {
                buf.put_u8(MessageType::Extended as u8);
                buf.put_u32(*id);
                buf.put_str(name);
                buf.put_raw(data);
            }
            Request::Unknown { tag, .. } => {
                return Err(SkiffError::Protocol(format!(
                    "cannot encode unknown request tag {}",
                    tag
                )));
            }
        }
        Ok(())
    }

    /// Parses one request from a frame payload.
    pub fn decode(payload: &[u8]) -> SkiffResult<Request> {
        let mut r = PacketReader::new(payload);
        let tag = r.get_u8()?;

        if tag == MessageType::Init as u8 {
            let version = r.get_u32()?;
            let extensions = decode_extension_pairs(&mut r)?;
            return Ok(Request::Init {
                version,
                extensions,
            });
        }

        let id = r.get_u32()?;
        let request = match MessageType::from_u8(tag) {
            Some(MessageType::Open) => {
                let path = r.get_string()?;
                let flags = OpenFlags(r.get_u32()?);
                let attrs = FileAttributes::decode(&mut r)?;
                Request::Open {
                    id,
                    path,
                    flags,
                    attrs,
                }
            }
            Some(MessageType::Close) => Request::Close {
                id,
                handle: r.get_bytes()?,
            },
            Some(MessageType::Read) => Request::Read {
                id,
                handle: r.get_bytes()?,
                offset: r.get_u64()?,
                len: r.get_u32()?,
            },
            Some(MessageType::Write) => Request::Write {
                id,
                handle: r.get_bytes()?,
                offset: r.get_u64()?,
                data: r.get_bytes()?,
            },
            Some(MessageType::LStat) => Request::LStat {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::FStat) => Request::FStat {
                id,
                handle: r.get_bytes()?,
            },
            Some(MessageType::SetStat) => Request::SetStat {
                id,
                path: r.get_string()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            Some(MessageType::FSetStat) => Request::FSetStat {
                id,
                handle: r.get_bytes()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            Some(MessageType::OpenDir) => Request::OpenDir {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::ReadDir) => Request::ReadDir {
                id,
                handle: r.get_bytes()?,
            },
            Some(MessageType::Remove) => Request::Remove {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::MkDir) => Request::MkDir {
                id,
                path: r.get_string()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            Some(MessageType::RmDir) => Request::RmDir {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::RealPath) => Request::RealPath {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::Stat) => Request::Stat {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::Rename) => Request::Rename {
                id,
                old_path: r.get_string()?,
                new_path: r.get_string()?,
            },
            Some(MessageType::ReadLink) => Request::ReadLink {
                id,
                path: r.get_string()?,
            },
            Some(MessageType::Symlink) => {
                // Reversed field order; see `encode`.
                let target_path = r.get_string()?;
                let link_path = r.get_string()?;
                Request::Symlink {
                    id,
                    link_path,
                    target_path,
                }
            }
            Some(MessageType::Extended) => Request::Extended {
                id,
                name: r.get_string()?,
                data: r.get_rest(),
            },
            Some(MessageType::Init) => unreachable!("handled above"),
            _ => Request::Unknown { id, tag },
        };
        Ok(request)
    }
}

/// A server-to-client response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_FXP_VERSION
    Version {
        /// Negotiated protocol version.
        version: u32,
        /// Server extension advertisements.
        extensions: Extensions,
    },
    /// SSH_FXP_STATUS
    Status {
        /// Request id this answers.
        id: u32,
        /// Outcome code.
        status: StatusCode,
        /// UTF-8 error message (protocol >= 3; empty allowed).
        message: String,
        /// RFC 1766 language tag (protocol >= 3; empty allowed).
        language: String,
    },
    /// SSH_FXP_HANDLE
    Handle {
        /// Request id this answers.
        id: u32,
        /// Opaque handle bytes.
        handle: Vec<u8>,
    },
    /// SSH_FXP_DATA
    Data {
        /// Request id this answers.
        id: u32,
        /// Bytes read.
        data: Vec<u8>,
    },
    /// SSH_FXP_NAME
    Name {
        /// Request id this answers.
        id: u32,
        /// Directory entries or resolved paths.
        names: Vec<Name>,
    },
    /// SSH_FXP_ATTRS
    Attrs {
        /// Request id this answers.
        id: u32,
        /// The attributes.
        attrs: FileAttributes,
    },
    /// SSH_FXP_EXTENDED_REPLY
    ExtendedReply {
        /// Request id this answers.
        id: u32,
        /// Uninterpreted reply tail.
        data: Vec<u8>,
    },
}

impl Response {
    /// The request id this response answers, absent only for VERSION.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Response::Version { .. } => None,
            Response::Status { id, .. }
            | Response::Handle { id, .. }
            | Response::Data { id, .. }
            | Response::Name { id, .. }
            | Response::Attrs { id, .. }
            | Response::ExtendedReply { id, .. } => Some(*id),
        }
    }

    /// Serializes the tag and body into `buf`.
    ///
    /// `version` is the negotiated protocol version: STATUS responses
    /// carry their message and language tag only at version 3 and above.
    pub fn encode(&self, buf: &mut PacketBuf, version: u32) {
        match self {
            Response::Version {
                version: negotiated,
                extensions,
            } => {
                buf.put_u8(MessageType::Version as u8);
                buf.put_u32(*negotiated);
                encode_extension_pairs(buf, extensions);
            }
            Response::Status {
                id,
                status,
                message,
                language,
            } => {
                buf.put_u8(MessageType::Status as u8);
                buf.put_u32(*id);
                buf.put_u32(*status as u32);
                if version >= 3 {
                    buf.put_str(message);
                    buf.put_str(language);
                }
            }
            Response::Handle { id, handle } => {
                buf.put_u8(MessageType::Handle as u8);
                buf.put_u32(*id);
                buf.put_bytes(handle);
            }
            Response::Data { id, data } => {
                buf.put_u8(MessageType::Data as u8);
                buf.put_u32(*id);
                buf.put_bytes(data);
            }
            Response::Name { id, names } => {
                buf.put_u8(MessageType::Name as u8);
                buf.put_u32(*id);
                buf.put_u32(names.len() as u32);
                for name in names {
                    name.encode(buf);
                }
            }
            Response::Attrs { id, attrs } => {
                buf.put_u8(MessageType::Attrs as u8);
                buf.put_u32(*id);
                attrs.encode(buf);
            }
            Response::ExtendedReply { id, data } => {
                buf.put_u8(MessageType::ExtendedReply as u8);
                buf.put_u32(*id);
                buf.put_raw(data);
            }
        }
    }

    /// Parses one response from a frame payload.
    pub fn decode(payload: &[u8]) -> SkiffResult<Response> {
        let mut r = PacketReader::new(payload);
        let tag = r.get_u8()?;

        let response = match MessageType::from_u8(tag) {
            Some(MessageType::Version) => {
                let version = r.get_u32()?;
                let extensions = decode_extension_pairs(&mut r)?;
                Response::Version {
                    version,
                    extensions,
                }
            }
            Some(MessageType::Status) => {
                let id = r.get_u32()?;
                let code = r.get_u32()?;
                let status = StatusCode::from_u32(code).unwrap_or(StatusCode::Failure);
                // Protocol versions below 3 omit these fields.
                let message = if r.remaining() > 0 {
                    r.get_string()?
                } else {
                    String::new()
                };
                let language = if r.remaining() > 0 {
                    r.get_string()?
                } else {
                    String::new()
                };
                Response::Status {
                    id,
                    status,
                    message,
                    language,
                }
            }
            Some(MessageType::Handle) => Response::Handle {
                id: r.get_u32()?,
                handle: r.get_bytes()?,
            },
            Some(MessageType::Data) => Response::Data {
                id: r.get_u32()?,
                data: r.get_bytes()?,
            },
            Some(MessageType::Name) => {
                let id = r.get_u32()?;
                let count = r.get_u32()?;
                let mut names = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    names.push(Name::decode(&mut r)?);
                }
                Response::Name { id, names }
            }
            Some(MessageType::Attrs) => Response::Attrs {
                id: r.get_u32()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            Some(MessageType::ExtendedReply) => Response::ExtendedReply {
                id: r.get_u32()?,
                data: r.get_rest(),
            },
            _ => {
                return Err(SkiffError::Protocol(format!(
                    "unknown response tag {}",
                    tag
                )));
            }
        };
        Ok(response)
    }
}
