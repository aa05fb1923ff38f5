//! # Format Marker File
//!
//! The `iamchert` file identifies a directory as a database of this
//! format and carries the database's identity UUID. Replication compares
//! UUIDs to detect that a master has been replaced wholesale, in which
//! case accumulated changesets no longer apply.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       12    Magic: "IAmChert1.0\n"
//! 12      16    Database UUID (random v4, assigned at create)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use uuid::Uuid;

use crate::config::VERSION_FILE_NAME;
use crate::error::DbError;

const VERSION_MAGIC: &[u8; 12] = b"IAmChert1.0\n";

#[derive(Debug)]
pub struct VersionFile {
    path: PathBuf,
    uuid: Option<Uuid>,
}

impl VersionFile {
    pub fn new(db_dir: &Path) -> Self {
        VersionFile {
            path: db_dir.join(VERSION_FILE_NAME),
            uuid: None,
        }
    }

    /// Writes a fresh marker with a newly generated UUID.
    pub fn create(&mut self) -> Result<()> {
        let uuid = Uuid::new_v4();
        let mut contents = Vec::with_capacity(VERSION_MAGIC.len() + 16);
        contents.extend_from_slice(VERSION_MAGIC);
        contents.extend_from_slice(uuid.as_bytes());
        fs::write(&self.path, &contents)
            .wrap_err_with(|| format!("failed to write '{}'", self.path.display()))?;
        self.uuid = Some(uuid);
        Ok(())
    }

    /// Reads and validates the marker, caching the UUID.
    pub fn read_and_check(&mut self) -> Result<()> {
        let contents = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DbError::Opening(format!(
                    "no version file at '{}'",
                    self.path.display()
                ))
                .into());
            }
            Err(e) => {
                return Err(e)
                    .wrap_err_with(|| format!("failed to read '{}'", self.path.display()));
            }
        };

        if contents.len() != VERSION_MAGIC.len() + 16
            || &contents[..VERSION_MAGIC.len()] != VERSION_MAGIC
        {
            return Err(DbError::Corrupt(format!(
                "version file '{}' has wrong magic or size",
                self.path.display()
            ))
            .into());
        }

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&contents[VERSION_MAGIC.len()..]);
        self.uuid = Some(Uuid::from_bytes(bytes));
        Ok(())
    }

    /// The database UUID; empty string before the file has been read.
    pub fn uuid_string(&self) -> String {
        match self.uuid {
            Some(u) => u.to_string(),
            None => String::new(),
        }
    }

    pub fn is_read(&self) -> bool {
        self.uuid.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::db_error_kind;
    use tempfile::tempdir;

    #[test]
    fn create_then_check_keeps_uuid() {
        let dir = tempdir().unwrap();
        let mut vf = VersionFile::new(dir.path());
        vf.create().unwrap();
        let written = vf.uuid_string();

        let mut vf2 = VersionFile::new(dir.path());
        vf2.read_and_check().unwrap();
        assert_eq!(vf2.uuid_string(), written);
    }

    #[test]
    fn missing_file_is_opening_error() {
        let dir = tempdir().unwrap();
        let mut vf = VersionFile::new(dir.path());
        let err = vf.read_and_check().unwrap_err();
        assert!(matches!(db_error_kind(&err), Some(DbError::Opening(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(VERSION_FILE_NAME), b"NotTheRightMagic????????????").unwrap();
        let mut vf = VersionFile::new(dir.path());
        let err = vf.read_and_check().unwrap_err();
        assert!(matches!(db_error_kind(&err), Some(DbError::Corrupt(_))));
    }
}
