//! Unsorted recursive filesystem walk.
//!
//! Yields regular files only, in directory-iteration order. Entries that
//! disappear mid-walk (concurrent removal) are skipped, not errors.

use std::fs::{self, ReadDir};
use std::io;
use std::path::{Path, PathBuf};

/// Iterator over the files under a root directory.
pub struct Walk {
    stack: Vec<ReadDir>,
}

impl Walk {
    /// Walk the tree rooted at `root`. A missing root yields an empty walk.
    pub fn new(root: &Path) -> io::Result<Self> {
        let stack = match fs::read_dir(root) {
            Ok(rd) => vec![rd],
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { stack })
    }
}

impl Iterator for Walk {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rd = self.stack.last_mut()?;
            let entry = match rd.next() {
                Some(Ok(e)) => e,
                Some(Err(e)) if e.kind() == io::ErrorKind::NotFound => continue,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            let ft = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Some(Err(e)),
            };
            if ft.is_dir() {
                match fs::read_dir(entry.path()) {
                    Ok(rd) => self.stack.push(rd),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Some(Err(e)),
                }
                continue;
            }
            if ft.is_file() {
                return Some(Ok(entry.path()));
            }
        }
    }
}
