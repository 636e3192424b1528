//! IPC socket pairs and descriptor remapping for children.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use tokio::net::UnixStream;

use super::{ChildChannel, SpawnError};

/// Staged duplicates are parked above this descriptor so that remapping
/// never clobbers a source that is also a target.
const STAGING_FLOOR: RawFd = 10;
const MAX_MAPPINGS: usize = 4;

/// Moves `source` onto `target` in the child.
#[derive(Debug, Clone, Copy)]
pub(super) struct FdMapping {
    pub(super) source: RawFd,
    pub(super) target: RawFd,
}

/// Parent and child ends of a fresh channel.
pub(super) struct ChannelPair {
    parent: StdUnixStream,
    child: OwnedFd,
}

impl ChannelPair {
    pub(super) fn new() -> Result<Self, SpawnError> {
        let (parent, child) =
            StdUnixStream::pair().map_err(|source| SpawnError::Channel { source })?;
        Ok(Self {
            parent,
            child: OwnedFd::from(child),
        })
    }

    pub(super) fn child_fd(&self) -> RawFd {
        self.child.as_raw_fd()
    }

    /// Closes the child's end in the parent and wraps the parent's end for
    /// async use. Must run inside the tokio runtime.
    pub(super) fn into_parent(self) -> Result<ChildChannel, SpawnError> {
        drop(self.child);
        self.parent
            .set_nonblocking(true)
            .map_err(|source| SpawnError::Channel { source })?;
        let stream =
            UnixStream::from_std(self.parent).map_err(|source| SpawnError::Channel { source })?;
        let (reader, writer) = stream.into_split();
        Ok(ChildChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// Applies descriptor mappings between fork and exec.
///
/// Sources are first duplicated above [`STAGING_FLOOR`] with close-on-exec
/// set, then `dup2`'d onto their targets, which clears close-on-exec on the
/// target only. Runs in the forked child so it must not allocate.
pub(super) fn apply_mappings(mappings: &[FdMapping]) -> io::Result<()> {
    let mut staged: [RawFd; MAX_MAPPINGS] = [-1; MAX_MAPPINGS];
    if mappings.len() > MAX_MAPPINGS {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    for (slot, mapping) in staged.iter_mut().zip(mappings) {
        // SAFETY: fcntl on a descriptor inherited from the parent.
        let duplicate = unsafe { libc::fcntl(mapping.source, libc::F_DUPFD_CLOEXEC, STAGING_FLOOR) };
        if duplicate < 0 {
            return Err(io::Error::last_os_error());
        }
        *slot = duplicate;
    }
    for (duplicate, mapping) in staged.iter().zip(mappings) {
        // SAFETY: both descriptors are valid in the child.
        if unsafe { libc::dup2(*duplicate, mapping.target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
