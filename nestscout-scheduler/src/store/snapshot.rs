//! Score store snapshot file format.
//!
//! A snapshot is a four byte `NSSC` tag, a `u16` format version and a
//! `bincode` payload of [`Score`] entries. Loading checks the header before
//! decoding the payload so foreign or outdated files fail with a precise
//! error.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use bincode::{deserialize_from, serialize_into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Score, ScoreStore};

/// File identifier for score snapshots.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"NSSC";

/// Supported snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    magic: [u8; 4],
    version: u16,
    scores: Vec<Score>,
}

/// Error emitted when loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot could not be read.
    #[error("failed to read score snapshot from {path}: {source}")]
    Io {
        /// Snapshot location.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The payload could not be decoded.
    #[error("failed to decode score snapshot from {path}: {source}")]
    Decode {
        /// Snapshot location.
        path: PathBuf,
        /// Decoder error returned by `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// The file did not start with the snapshot tag.
    #[error("invalid score snapshot magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected tag.
        expected: [u8; 4],
        /// Bytes read from the file.
        found: [u8; 4],
    },
    /// The file uses a format version this build cannot read.
    #[error("unsupported score snapshot version {found}; supported version is {supported}")]
    UnsupportedVersion {
        /// Version present in the file header.
        found: u16,
        /// Version supported by this build.
        supported: u16,
    },
}

/// Error emitted when writing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotWriteError {
    /// Writing bytes to disk failed.
    #[error("failed to write score snapshot to {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The scores could not be encoded.
    #[error("failed to encode score snapshot for {path}: {source}")]
    Encode {
        /// Destination path.
        path: PathBuf,
        /// Encoder failure from `bincode`.
        #[source]
        source: bincode::Error,
    },
}

impl ScoreStore {
    /// Persist every stored score to `path`, truncating existing files.
    ///
    /// # Errors
    /// Returns [`SnapshotWriteError`] when the file cannot be created or
    /// written.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), SnapshotWriteError> {
        let io_error = |source| SnapshotWriteError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        let payload = SnapshotFile {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            scores: self.to_vec(),
        };
        serialize_into(&mut writer, &payload).map_err(|source| SnapshotWriteError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_error)?;
        writer.get_ref().sync_all().map_err(io_error)
    }

    /// Load a store previously written by [`ScoreStore::write_snapshot`].
    ///
    /// # Errors
    /// Returns [`SnapshotError`] when the file is missing, carries a foreign
    /// header or fails to decode.
    pub fn load_snapshot(path: &Path) -> Result<Self, SnapshotError> {
        let file = File::open(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic {
                expected: SNAPSHOT_MAGIC,
                found: magic,
            });
        }

        let decode_error = |source| SnapshotError::Decode {
            path: path.to_path_buf(),
            source,
        };
        let version: u16 = deserialize_from(&mut reader).map_err(decode_error)?;
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: version,
                supported: SNAPSHOT_VERSION,
            });
        }

        let scores: Vec<Score> = deserialize_from(&mut reader).map_err(decode_error)?;
        Ok(Self::from_scores(scores))
    }
}
