//! Server-side registry of open file and directory handles.
//!
//! Handles are opaque to the client: the server hands out fresh random
//! 16-byte identifiers and compares them bytewise. The table enforces a
//! configurable ceiling on concurrently open entries; hitting it is a
//! typed failure, never a silent leak, and the rejected entry is
//! finalized before the failure is reported.

use std::collections::HashMap;

use rand::RngCore;

use super::error::StatusError;
use super::types::{Name, StatusCode};

/// Byte length of a server-issued handle.
pub const HANDLE_LEN: usize = 16;

/// Default ceiling on concurrently open handles per session.
pub const DEFAULT_MAX_OPEN_HANDLES: usize = 16;

/// A lazy sequence of directory entries supplied by the back-end.
pub type NameIter = Box<dyn Iterator<Item = Name> + Send + Sync>;

/// Pagination state of an open directory handle.
///
/// The back-end's iterator is materialized on the first READDIR and kept
/// alive between pages.
pub enum DirState {
    /// No READDIR seen yet; the iterator has not been requested.
    Pending,
    /// The iterator is live and partially consumed.
    Reading(NameIter),
}

/// One open entry: a file with its byte stream, or a directory with its
/// pagination state. Both remember the path they were opened with so
/// handle-scoped stat operations can be served.
pub enum HandleEntry<F> {
    /// An open file.
    File {
        /// Path the file was opened with.
        path: String,
        /// The back-end's byte stream.
        file: F,
    },
    /// An open directory.
    Dir {
        /// Path the directory was opened with.
        path: String,
        /// Iterator state across READDIR pages.
        state: DirState,
    },
}

impl<F> HandleEntry<F> {
    /// The path this entry was opened with.
    pub fn path(&self) -> &str {
        match self {
            HandleEntry::File { path, .. } | HandleEntry::Dir { path, .. } => path,
        }
    }
}

/// Bounded registry mapping handle bytes to open entries.
pub struct HandleTable<F> {
    entries: HashMap<Vec<u8>, HandleEntry<F>>,
    max_handles: usize,
}

impl<F> HandleTable<F> {
    /// Creates a table that admits at most `max_handles` entries.
    pub fn new(max_handles: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_handles,
        }
    }

    /// Number of currently open entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh_handle(&self) -> Vec<u8> {
        loop {
            let mut handle = vec![0u8; HANDLE_LEN];
            rand::thread_rng().fill_bytes(&mut handle);
            if !self.entries.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Registers `entry` and returns the handle bytes chosen for it.
    ///
    /// At capacity the entry is dropped (finalizing whatever it owns) and
    /// a FAILURE status is returned.
    pub fn add(&mut self, entry: HandleEntry<F>) -> Result<Vec<u8>, StatusError> {
        if self.entries.len() >= self.max_handles {
            drop(entry);
            return Err(StatusError::new(
                StatusCode::Failure,
                format!("too many open handles (limit {})", self.max_handles),
            ));
        }
        let handle = self.fresh_handle();
        self.entries.insert(handle.clone(), entry);
        Ok(handle)
    }

    /// Removes and returns the entry for `handle`, if present.
    pub fn remove(&mut self, handle: &[u8]) -> Option<HandleEntry<F>> {
        self.entries.remove(handle)
    }

    /// Looks up the entry for `handle` without removing it.
    pub fn get_mut(&mut self, handle: &[u8]) -> Option<&mut HandleEntry<F>> {
        self.entries.get_mut(handle)
    }

    /// The path an open handle refers to, or NO_SUCH_FILE.
    pub fn path(&self, handle: &[u8]) -> Result<&str, StatusError> {
        self.entries
            .get(handle)
            .map(HandleEntry::path)
            .ok_or_else(invalid_handle)
    }

    /// The file stream behind `handle`, or NO_SUCH_FILE when the handle is
    /// absent or refers to a directory.
    pub fn file_mut(&mut self, handle: &[u8]) -> Result<&mut F, StatusError> {
        match self.entries.get_mut(handle) {
            Some(HandleEntry::File { file, .. }) => Ok(file),
            _ => Err(invalid_handle()),
        }
    }

    /// The directory state behind `handle`, or NO_SUCH_FILE when the
    /// handle is absent or refers to a file.
    pub fn dir_mut(&mut self, handle: &[u8]) -> Result<&mut DirState, StatusError> {
        match self.entries.get_mut(handle) {
            Some(HandleEntry::Dir { state, .. }) => Ok(state),
            _ => Err(invalid_handle()),
        }
    }

    /// Removes every entry, returning them so the caller can finalize the
    /// streams they own.
    pub fn drain(&mut self) -> Vec<HandleEntry<F>> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }
}

fn invalid_handle() -> StatusError {
    StatusError::new(StatusCode::NoSuchFile, "invalid handle")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(path: &str) -> HandleEntry<Vec<u8>> {
        HandleEntry::File {
            path: path.to_string(),
            file: Vec::new(),
        }
    }

    fn dir_entry(path: &str) -> HandleEntry<Vec<u8>> {
        HandleEntry::Dir {
            path: path.to_string(),
            state: DirState::Pending,
        }
    }

    #[test]
    fn test_add_get_remove() {
        let mut table = HandleTable::new(4);
        let handle = table.add(file_entry("/a")).unwrap();
        assert_eq!(handle.len(), HANDLE_LEN);
        assert_eq!(table.len(), 1);
        assert_eq!(table.path(&handle).unwrap(), "/a");

        assert!(table.remove(&handle).is_some());
        assert!(table.is_empty());
        assert!(table.remove(&handle).is_none());
    }

    #[test]
    fn test_handles_are_distinct() {
        let mut table = HandleTable::new(8);
        let a = table.add(file_entry("/a")).unwrap();
        let b = table.add(file_entry("/b")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_overflow_is_a_typed_failure() {
        let mut table = HandleTable::new(2);
        table.add(file_entry("/a")).unwrap();
        table.add(file_entry("/b")).unwrap();

        let err = table.add(file_entry("/c")).unwrap_err();
        assert_eq!(err.code, StatusCode::Failure);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_file_mut_rejects_directories() {
        let mut table = HandleTable::new(4);
        let dir = table.add(dir_entry("/dir")).unwrap();
        let err = table.file_mut(&dir).unwrap_err();
        assert_eq!(err.code, StatusCode::NoSuchFile);
        assert!(table.dir_mut(&dir).is_ok());
    }

    #[test]
    fn test_unknown_handle_is_no_such_file() {
        let mut table: HandleTable<Vec<u8>> = HandleTable::new(4);
        let err = table.file_mut(b"missing").unwrap_err();
        assert_eq!(err.code, StatusCode::NoSuchFile);
    }

    #[test]
    fn test_drain_empties_the_table() {
        let mut table = HandleTable::new(4);
        table.add(file_entry("/a")).unwrap();
        table.add(dir_entry("/dir")).unwrap();
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
