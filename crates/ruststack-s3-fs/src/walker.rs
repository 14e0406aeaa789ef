//! Lazy depth-first directory traversal with subtree pruning.
//!
//! [`DirectoryWalker`] yields regular file paths in pre-order. Siblings are
//! visited in the order of a caller-supplied sort key, and every directory is
//! offered to a `should_descend` predicate before it is read, so a rejected
//! subtree costs nothing beyond its own directory entry.
//!
//! The walker keeps one sorted listing per open directory on an explicit
//! stack and reads a directory only when the walk reaches it. It is
//! synchronous; async callers drive it on the blocking pool.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::vec;

use tracing::trace;

/// Decides whether the walker should enter a directory.
pub type DescendPredicate<'a> = Box<dyn FnMut(&Path) -> bool + 'a>;

/// Computes the visiting order of sibling entries: `(file name, is_dir)`.
pub type SortKeyFn<'a> = Box<dyn Fn(&str, bool) -> String + 'a>;

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

/// Pre-order iterator over the files beneath a root directory.
pub struct DirectoryWalker<'a> {
    root: PathBuf,
    should_descend: DescendPredicate<'a>,
    sort_key: SortKeyFn<'a>,
    stack: Vec<vec::IntoIter<Entry>>,
    started: bool,
}

impl fmt::Debug for DirectoryWalker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWalker")
            .field("root", &self.root)
            .field("started", &self.started)
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

impl<'a> DirectoryWalker<'a> {
    /// Walk every file under `root`, descending into every directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            should_descend: Box::new(|_| true),
            sort_key: Box::new(default_sort_key),
            stack: Vec::new(),
            started: false,
        }
    }

    /// Skip every directory for which `predicate` returns `false`.
    ///
    /// The root itself is always read.
    #[must_use]
    pub fn should_descend(mut self, predicate: impl FnMut(&Path) -> bool + 'a) -> Self {
        self.should_descend = Box::new(predicate);
        self
    }

    /// Visit siblings in ascending order of `sort_key(name, is_dir)`.
    ///
    /// The key is computed once per entry, only for directories the walk
    /// actually reads.
    #[must_use]
    pub fn sort_by(mut self, sort_key: impl Fn(&str, bool) -> String + 'a) -> Self {
        self.sort_key = Box::new(sort_key);
        self
    }

    /// Read and sort one directory level.
    ///
    /// A directory that no longer exists reads as empty, as does an entry
    /// removed between the listing and its type lookup.
    fn read_level(&self, dir: &Path) -> io::Result<vec::IntoIter<Entry>> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new().into_iter()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            // `DirEntry::file_type` does not follow symlinks.
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !file_type.is_dir() && !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                trace!(path = %entry.path().display(), "skipping non-UTF-8 entry");
                continue;
            };
            entries.push(Entry {
                path: entry.path(),
                name,
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by_cached_key(|e| (self.sort_key)(&e.name, e.is_dir));
        Ok(entries.into_iter())
    }
}

impl Iterator for DirectoryWalker<'_> {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            match self.read_level(&self.root) {
                Ok(level) => self.stack.push(level),
                Err(e) => return Some(Err(e)),
            }
        }
        loop {
            let Some(entry) = self.stack.last_mut()?.next() else {
                self.stack.pop();
                continue;
            };
            if !entry.is_dir {
                return Some(Ok(entry.path));
            }
            if !(self.should_descend)(&entry.path) {
                trace!(dir = %entry.path.display(), "pruned subtree");
                continue;
            }
            match self.read_level(&entry.path) {
                Ok(level) => self.stack.push(level),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Sort by name, with directories treated as if their name ended in `/`.
fn default_sort_key(name: &str, is_dir: bool) -> String {
    if is_dir {
        format!("{name}/")
    } else {
        name.to_owned()
    }
}
