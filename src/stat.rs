//! POSIX-shaped metadata carried by every inode.

use nix::sys::stat::Mode;
use nix::unistd;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    /// Seconds since the epoch.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stat {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }
}

/// Current wall-clock time in whole seconds since the epoch.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// A fresh stat for a node created by the core itself: current owner and
/// time, `mode` masked by the process umask.
#[must_use]
pub fn default_stat(mode: u32) -> Stat {
    let mask = nix::sys::stat::umask(Mode::from_bits_truncate(0o022));
    nix::sys::stat::umask(mask);
    let now = now_secs();

    Stat {
        mode: mode & !mask.bits(),
        uid: unistd::getuid().as_raw(),
        gid: unistd::getgid().as_raw(),
        atime: now,
        mtime: now,
        ctime: now,
        ..Stat::default()
    }
}
