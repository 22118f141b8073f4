//! On-disk execution units.
//!
//! One private temporary directory per request holding a single,
//! uniquely named source file. The directory is removed when the unit is
//! closed or dropped, whichever comes first.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};
use tempfile::TempDir;
use uuid::Uuid;

use crate::identity::Identity;

const DIR_PREFIX: &str = "code-sandbox-";

/// The materialized source of one request.
#[derive(Debug)]
pub struct ExecutionUnit {
    id: Uuid,
    dir: TempDir,
    source: PathBuf,
}

impl ExecutionUnit {
    /// Write `code` to `<uuid>.<extension>` inside a fresh temporary directory.
    ///
    /// With `owner` set, directory and file are handed to that identity so a
    /// downgraded guest can read them; the directory stays mode 0700.
    pub fn create(code: &str, extension: &str, owner: Option<&Identity>) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new().prefix(DIR_PREFIX).tempdir()?;
        let source = dir.path().join(format!("{id}.{extension}"));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&source)?;
        file.write_all(code.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Some(owner) = owner {
            let uid = Some(Uid::from_raw(owner.uid));
            let gid = Some(Gid::from_raw(owner.gid));
            chown(&source, uid, gid).map_err(io::Error::from)?;
            chown(dir.path(), uid, gid).map_err(io::Error::from)?;
        }

        Ok(Self { id, dir, source })
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Working directory for the guest.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the source file.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Remove the directory, reporting failures.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_source_into_private_directory() {
        let unit = ExecutionUnit::create("print(1)\n", "py", None).unwrap();

        assert!(unit.dir().is_dir());
        assert_eq!(unit.source().parent(), Some(unit.dir()));
        assert_eq!(
            unit.source().file_name().unwrap().to_string_lossy(),
            format!("{}.py", unit.id())
        );
        assert_eq!(std::fs::read_to_string(unit.source()).unwrap(), "print(1)\n");

        let name = unit.dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(DIR_PREFIX));
    }

    #[test]
    fn close_removes_directory() {
        let unit = ExecutionUnit::create("x = 1", "py", None).unwrap();
        let dir = unit.dir().to_path_buf();

        unit.close().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let dir = {
            let unit = ExecutionUnit::create("x = 1", "py", None).unwrap();
            unit.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn units_are_distinct() {
        let a = ExecutionUnit::create("", "py", None).unwrap();
        let b = ExecutionUnit::create("", "py", None).unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.dir(), b.dir());
    }
}
