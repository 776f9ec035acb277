//! SFTP data types and structures.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use skiff_platform::SkiffResult;

use super::codec::{PacketBuf, PacketReader};

/// Extension set exchanged during INIT/VERSION and carried in attributes.
///
/// Keys are vendor-scoped capability names such as `posix-rename@openssh.com`.
pub type Extensions = HashMap<String, String>;

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation unsupported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns the canonical error message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation unsupported",
        }
    }
}

/// File open flags carried by the OPEN request (SSH_FXF_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: OpenFlags = OpenFlags(0x0000_0001);
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: OpenFlags = OpenFlags(0x0000_0002);
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: OpenFlags = OpenFlags(0x0000_0004);
    /// SSH_FXF_CREAT - Create if the file does not exist
    pub const CREAT: OpenFlags = OpenFlags(0x0000_0008);
    /// SSH_FXF_TRUNC - Truncate to zero length
    pub const TRUNC: OpenFlags = OpenFlags(0x0000_0010);
    /// SSH_FXF_EXCL - Fail if the file exists
    pub const EXCL: OpenFlags = OpenFlags(0x0000_0020);

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the READ access bit is set.
    pub fn wants_read(&self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether the WRITE access bit is set.
    pub fn wants_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Translates the creation/truncation bits into an open disposition.
    pub fn disposition(&self) -> OpenDisposition {
        if self.contains(Self::APPEND) {
            OpenDisposition::Append
        } else if self.contains(OpenFlags(Self::CREAT.0 | Self::EXCL.0)) {
            OpenDisposition::CreateNew
        } else if self.contains(OpenFlags(Self::CREAT.0 | Self::TRUNC.0)) {
            OpenDisposition::CreateOrTruncate
        } else if self.contains(Self::CREAT) {
            OpenDisposition::OpenOrCreate
        } else if self.contains(Self::TRUNC) {
            OpenDisposition::TruncateExisting
        } else {
            OpenDisposition::OpenExisting
        }
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// How an OPEN request maps onto a conventional file API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Create the file or truncate an existing one.
    CreateOrTruncate,
    /// Open the file, creating it if absent.
    OpenOrCreate,
    /// Truncate an existing file; fail if absent.
    TruncateExisting,
    /// Open for appending.
    Append,
    /// Open an existing file; fail if absent.
    OpenExisting,
}

/// File attribute flags (SSH_FILEXFER_ATTR_*).
pub struct AttrFlags;

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x0000_0001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x0000_0002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x0000_0004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x0000_0008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x8000_0000;
}

/// POSIX directory bit within the permissions word.
const S_IFDIR: u32 = 0o040000;

/// File attributes.
///
/// Every field is optional; the wire encoding is preceded by a flag word
/// naming which fields follow. `uid`/`gid` and `atime`/`mtime` travel as
/// pairs: their flag is set only when both halves are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// POSIX permission bits
    pub permissions: Option<u32>,
    /// Access time (Unix seconds)
    pub atime: Option<u32>,
    /// Modification time (Unix seconds)
    pub mtime: Option<u32>,
    /// Vendor-specific extended attributes
    pub extended: Option<Extensions>,
}

impl FileAttributes {
    /// Creates empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the flag word from the fields that are present.
    pub fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        if self.extended.is_some() {
            flags |= AttrFlags::EXTENDED;
        }
        flags
    }

    /// Whether the permissions mark a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .map(|p| p & S_IFDIR == S_IFDIR)
            .unwrap_or(false)
    }

    /// Serializes the flag word followed by the present fields.
    pub fn encode(&self, buf: &mut PacketBuf) {
        buf.put_u32(self.flags());

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if let Some(extended) = &self.extended {
            buf.put_u32(extended.len() as u32);
            for (name, value) in extended {
                buf.put_str(name);
                buf.put_str(value);
            }
        }
    }

    /// Parses the flag word and the fields it names.
    pub fn decode(r: &mut PacketReader<'_>) -> SkiffResult<Self> {
        let flags = r.get_u32()?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(r.get_u64()?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(r.get_u32()?);
            attrs.gid = Some(r.get_u32()?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(r.get_u32()?);
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(r.get_u32()?);
            attrs.mtime = Some(r.get_u32()?);
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = r.get_u32()?;
            let mut extended = Extensions::new();
            for _ in 0..count {
                let name = r.get_string()?;
                let value = r.get_string()?;
                extended.insert(name, value);
            }
            attrs.extended = Some(extended);
        }

        Ok(attrs)
    }
}

/// One entry of a NAME response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    /// Bare file name (no path).
    pub filename: String,
    /// Human-readable `ls -l`-style line.
    pub long_name: String,
    /// Attributes of the entry.
    pub attrs: FileAttributes,
}

impl Name {
    /// Creates a name record, deriving the long-name line from the attributes.
    pub fn new(filename: impl Into<String>, attrs: FileAttributes) -> Self {
        let filename = filename.into();
        let long_name = format_long_name(&filename, &attrs);
        Self {
            filename,
            long_name,
            attrs,
        }
    }

    /// Serializes `filename`, `long_name`, then the attributes.
    pub fn encode(&self, buf: &mut PacketBuf) {
        buf.put_str(&self.filename);
        buf.put_str(&self.long_name);
        self.attrs.encode(buf);
    }

    /// Parses one name record.
    pub fn decode(r: &mut PacketReader<'_>) -> SkiffResult<Self> {
        let filename = r.get_string()?;
        let long_name = r.get_string()?;
        let attrs = FileAttributes::decode(r)?;
        Ok(Self {
            filename,
            long_name,
            attrs,
        })
    }
}

fn permission_string(attrs: &FileAttributes) -> String {
    let Some(mode) = attrs.permissions else {
        return "?".repeat(10);
    };

    let mut out = String::with_capacity(10);
    out.push(if mode & S_IFDIR == S_IFDIR { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Formats the human-readable line carried next to a file name in NAME
/// responses:
///
/// ```text
/// -rw-r--r--   ? 1000     1000         1234 Mar  1 12:30 file.txt
/// ```
///
/// Fields the attributes do not carry render as `?`.
pub fn format_long_name(filename: &str, attrs: &FileAttributes) -> String {
    let perms = permission_string(attrs);
    let user = attrs
        .uid
        .map(|u| u.to_string())
        .unwrap_or_else(|| "?".to_string());
    let group = attrs
        .gid
        .map(|g| g.to_string())
        .unwrap_or_else(|| "?".to_string());
    let size = attrs
        .size
        .map(|s| s.to_string())
        .unwrap_or_else(|| "?".to_string());
    let when = attrs
        .mtime
        .and_then(|t| DateTime::<Utc>::from_timestamp(i64::from(t), 0))
        .map(|t| t.format("%b %e %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string());

    format!(
        "{} {:>3} {:<8} {:<8} {:>8} {} {}",
        perms, "?", user, group, size, when, filename
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(attrs: &FileAttributes) -> FileAttributes {
        let mut buf = PacketBuf::new();
        attrs.encode(&mut buf);
        let mut r = PacketReader::new(buf.as_slice());
        let decoded = FileAttributes::decode(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        decoded
    }

    #[test]
    fn test_status_code_conversion() {
        assert_eq!(StatusCode::from_u32(0), Some(StatusCode::Ok));
        assert_eq!(StatusCode::from_u32(2), Some(StatusCode::NoSuchFile));
        assert_eq!(StatusCode::from_u32(999), None);
    }

    #[test]
    fn test_empty_attributes_roundtrip() {
        let attrs = FileAttributes::new();
        assert_eq!(attrs.flags(), 0);
        assert_eq!(roundtrip(&attrs), attrs);
    }

    #[test]
    fn test_attribute_flags_match_present_fields() {
        let mut attrs = FileAttributes::new();
        attrs.size = Some(1024);
        attrs.permissions = Some(0o644);
        assert_eq!(attrs.flags(), AttrFlags::SIZE | AttrFlags::PERMISSIONS);
        assert_eq!(roundtrip(&attrs), attrs);
    }

    #[test]
    fn test_uid_without_gid_is_not_encoded() {
        let mut attrs = FileAttributes::new();
        attrs.uid = Some(1000);
        assert_eq!(attrs.flags(), 0);

        let decoded = roundtrip(&attrs);
        assert_eq!(decoded.uid, None);
        assert_eq!(decoded.gid, None);
    }

    #[test]
    fn test_paired_fields_roundtrip() {
        let mut attrs = FileAttributes::new();
        attrs.uid = Some(1000);
        attrs.gid = Some(100);
        attrs.atime = Some(1_700_000_000);
        attrs.mtime = Some(1_700_000_001);
        assert_eq!(roundtrip(&attrs), attrs);
    }

    #[test]
    fn test_extended_attributes_roundtrip() {
        let mut attrs = FileAttributes::new();
        let mut ext = Extensions::new();
        ext.insert("acl@example.com".to_string(), "none".to_string());
        attrs.extended = Some(ext);
        assert_eq!(attrs.flags(), AttrFlags::EXTENDED);
        assert_eq!(roundtrip(&attrs), attrs);
    }

    #[test]
    fn test_open_flag_dispositions() {
        let cases = [
            (OpenFlags::CREAT | OpenFlags::EXCL, OpenDisposition::CreateNew),
            (
                OpenFlags::CREAT | OpenFlags::TRUNC,
                OpenDisposition::CreateOrTruncate,
            ),
            (OpenFlags::CREAT, OpenDisposition::OpenOrCreate),
            (OpenFlags::TRUNC, OpenDisposition::TruncateExisting),
            (OpenFlags::APPEND, OpenDisposition::Append),
            (OpenFlags::READ, OpenDisposition::OpenExisting),
        ];
        for (flags, expected) in cases {
            assert_eq!(flags.disposition(), expected, "flags {:#x}", flags.0);
        }
    }

    #[test]
    fn test_long_name_known_fields() {
        let mut attrs = FileAttributes::new();
        attrs.size = Some(37);
        attrs.permissions = Some(0o100644);
        attrs.uid = Some(1000);
        attrs.gid = Some(100);
        attrs.atime = Some(0);
        attrs.mtime = Some(0);

        let line = format_long_name("example.txt", &attrs);
        assert!(line.starts_with("-rw-r--r--"), "line: {}", line);
        assert!(line.contains("Jan  1 00:00"), "line: {}", line);
        assert!(line.ends_with("example.txt"), "line: {}", line);
    }

    #[test]
    fn test_long_name_unknown_fields_render_as_question_marks() {
        let line = format_long_name("f", &FileAttributes::new());
        assert!(line.starts_with("??????????"), "line: {}", line);
        assert!(line.contains(" ? "), "line: {}", line);
    }

    #[test]
    fn test_directory_permission_string() {
        let mut attrs = FileAttributes::new();
        attrs.permissions = Some(0o40755);
        let line = format_long_name("test-dir", &attrs);
        assert!(line.starts_with("drwxr-xr-x"), "line: {}", line);
    }
}
