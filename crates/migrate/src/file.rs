//! Migration files
//!
//! A [`MigrationFile`] is one directional script plus the identity the version
//! table records for it. Discovery and ordering happen elsewhere; this module
//! only loads the script body on demand and checksums it.

use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DriverError, DriverResult};

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// One migration script and its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    pub version: i32,
    /// Position in installed order; recorded as both version and installed rank
    pub rank: i32,
    pub name: String,
    pub file_name: String,
    pub path: Option<PathBuf>,
    pub checksum: Option<i32>,
    pub content: Option<Vec<u8>>,
    pub direction: Direction,
}

impl MigrationFile {
    /// A file whose content is read from `path` when the run needs it
    pub fn new(
        version: i32,
        rank: i32,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        direction: Direction,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            version,
            rank,
            name: name.into(),
            file_name,
            path: Some(path),
            checksum: None,
            content: None,
            direction,
        }
    }

    /// A file whose content is already in memory
    pub fn with_content(
        version: i32,
        rank: i32,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        direction: Direction,
    ) -> Self {
        let content = content.into();
        Self {
            version,
            rank,
            name: name.into(),
            file_name: file_name.into(),
            path: None,
            checksum: Some(checksum(&content)),
            content: Some(content),
            direction,
        }
    }

    /// Load the script body and compute its checksum, unless already loaded
    pub async fn read_content(&mut self) -> DriverResult<()> {
        if let Some(content) = &self.content {
            if self.checksum.is_none() {
                self.checksum = Some(checksum(content));
            }
            return Ok(());
        }

        let path = self.path.as_ref().ok_or_else(|| {
            DriverError::Read(format!("Migration {} has neither content nor a path", self.file_name))
        })?;

        let content = tokio::fs::read(path).await.map_err(|e| {
            DriverError::Read(format!("Failed to read migration {}: {}", path.display(), e))
        })?;

        tracing::debug!("Read {} bytes from {}", content.len(), path.display());
        self.checksum = Some(checksum(&content));
        self.content = Some(content);
        Ok(())
    }

    /// The loaded script as text
    pub fn script(&self) -> DriverResult<&str> {
        let content = self.content.as_deref().ok_or_else(|| {
            DriverError::Read(format!("Content of {} has not been read", self.file_name))
        })?;

        std::str::from_utf8(content).map_err(|e| {
            DriverError::Read(format!("Migration {} is not valid UTF-8: {}", self.file_name, e))
        })
    }
}

impl fmt::Display for MigrationFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {}, {})", self.file_name, self.direction, self.version, self.name)
    }
}

/// First four bytes of the SHA-256 digest, read as a big-endian signed integer
pub fn checksum(content: &[u8]) -> i32 {
    let digest = Sha256::digest(content);
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
