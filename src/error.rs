//! Error type shared by every core operation.
//!
//! Resolver and handle failures are ordinary `Result`s.
//! [`VfsError::errno`] recovers the errno a POSIX-shaped dispatcher
//! surfaces to its callers.

use std::io;

use thiserror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("file exists")]
    Exists,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("invalid argument")]
    InvalidArgument,

    /// A symlink inode carries no link body.
    #[error("symlink has no target")]
    BadLink,

    #[error("too many levels of symbolic links")]
    LinkLoop,

    /// The inode has no naming entry, so its path cannot be rebuilt.
    #[error("inode has no naming entry")]
    Unnamed,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("operation interrupted")]
    Interrupted,

    /// No live superblock matched and opening a new one was not allowed.
    #[error("no live superblock for archive")]
    NoLiveSuper,

    /// `open_archive` failed while mounting a new superblock.
    #[error("cannot open archive")]
    ArchiveOpen(#[source] Box<VfsError>),

    /// Failure reported by a backend hook.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Local-disk syscall failure; the captured errno is preserved.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// The errno a POSIX-shaped dispatcher would surface for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsADirectory => libc::EISDIR,
            Self::InvalidArgument => libc::EINVAL,
            Self::BadLink => libc::EFAULT,
            Self::LinkLoop => libc::ELOOP,
            Self::Unnamed => libc::EAGAIN,
            Self::ReadOnly => libc::EROFS,
            Self::Interrupted => libc::EINTR,
            Self::NoLiveSuper | Self::ArchiveOpen(_) | Self::Backend(_) => libc::EIO,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<&VfsError> for i32 {
    fn from(e: &VfsError) -> Self {
        e.errno()
    }
}

impl From<nix::errno::Errno> for VfsError {
    fn from(e: nix::errno::Errno) -> Self {
        Self::Io(io::Error::from_raw_os_error(e as i32))
    }
}
