//! Snapshot of managed descriptors used to resurrect processes after a
//! daemon restart.

use std::fs;
use std::io;
use std::path::Path;

use drover_daemon_types::AppDescriptor;
use serde::{Deserialize, Serialize};

use super::SupervisorError;
use crate::process::files::atomic_write;

const DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DumpFile {
    pub(crate) version: u32,
    pub(crate) saved_at: u64,
    pub(crate) apps: Vec<AppDescriptor>,
}

impl DumpFile {
    /// Builds a snapshot; each entry stands for exactly one record.
    pub(crate) fn new(saved_at: u64, apps: impl IntoIterator<Item = AppDescriptor>) -> Self {
        let apps = apps
            .into_iter()
            .map(|descriptor| AppDescriptor {
                instances: 1,
                ..descriptor
            })
            .collect();
        Self {
            version: DUMP_VERSION,
            saved_at,
            apps,
        }
    }

    pub(crate) fn write(&self, path: &Path) -> Result<(), SupervisorError> {
        let encoded = serde_json::to_vec_pretty(self).map_err(|source| SupervisorError::Dump {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, &encoded)
            .map_err(|source| SupervisorError::io("failed to write dump", path, source))
    }

    /// Reads a snapshot; a missing file is an empty one.
    pub(crate) fn read(path: &Path) -> Result<Self, SupervisorError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new(0, Vec::new()));
            }
            Err(source) => return Err(SupervisorError::io("failed to read dump", path, source)),
        };
        serde_json::from_slice(&bytes).map_err(|source| SupervisorError::Dump {
            path: path.to_path_buf(),
            source,
        })
    }
}
