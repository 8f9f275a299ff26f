//! Shared directory-cache core for pluggable virtual filesystems.
//!
//! Concrete backends (tar-like archive readers, ftp-like remote session
//! drivers) implement [`Backend`] and get a POSIX-shaped file API in
//! return: open/read/write/seek/close, stat/lstat/fstat,
//! opendir/readdir/closedir, readlink and chdir, plus the mount
//! bookkeeping an outer dispatcher needs (`getid`, `fill_names`,
//! `free_super`, `setctl`).
//!
//! Two resolution strategies share one data model. An archive class has
//! full knowledge of its contents, so its superblock holds a complete
//! in-memory tree and paths walk parent to child. A remote class cannot
//! afford to materialize every ancestor of a listed directory, and its
//! listings go stale, so its root is a flat bag of *directory
//! fingerprints*: entries named by full path (`usr/src/linux`), each
//! owning that directory's listing, loaded on demand through
//! [`Backend::dir_load`] and expired by timestamp.
//!
//! Paths inside a mount never begin with a separator; the root of an
//! archive or site is the empty string. Full paths carry the mount
//! spelling `archive#op/inner`.
//!
//! The core is single-threaded cooperative: callers serialize, backend
//! hooks are the suspension points, and no internal locking exists.

mod backend;
mod dcache;
mod dir;
mod error;
mod flags;
mod handle;
mod mount;
mod path;
mod resolve;
mod stat;
mod wire;

use std::path::PathBuf;
use std::rc::Rc;

pub use backend::{Backend, NoStamps, ScanVerdict, StampTracker};
pub use dcache::{
    CoreStats, Dcache, Entry, EntryId, Inode, InodeId, InterruptFlag, Super, SuperId,
};
pub use dir::{DirEnt, DirHandle, SetCtl};
pub use error::{VfsError, VfsResult};
pub use flags::{BackendCaps, ClassFlags, Follow, OpenFlags, ResolveFlags, FOLLOW_DEPTH};
pub use handle::{FileHandle, LinearState};
pub use stat::{default_stat, now_secs, Stat};

/// Static identity and behavior switches of a backend class.
#[derive(Debug, Clone)]
pub struct ClassConfig {
    /// Class name; used for scratch file templates.
    pub name: String,
    /// Path prefix reported by `fill_names` (`name#prefix/`).
    pub prefix: String,
    pub flags: ClassFlags,
    /// Device number stamped into every inode's `st.dev`.
    pub rdev: u64,
    /// Where scratch files live; defaults to the system temp directory.
    pub scratch_dir: PathBuf,
}

impl ClassConfig {
    #[must_use]
    pub fn new(name: &str, prefix: &str, flags: ClassFlags) -> Self {
        Self {
            name: name.to_owned(),
            prefix: prefix.to_owned(),
            flags,
            rdev: 0,
            scratch_dir: std::env::temp_dir(),
        }
    }

    #[must_use]
    pub fn rdev(mut self, rdev: u64) -> Self {
        self.rdev = rdev;
        self
    }

    #[must_use]
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

/// One mounted backend class: the directory cache plus the backend it
/// delegates to. All operations go through this type; the resolution
/// strategy, the availability of writes and of local copies are wired
/// from [`ClassConfig::flags`] at construction.
pub struct Vfs<B: Backend> {
    pub(crate) backend: B,
    pub(crate) state: Dcache<B>,
}

impl<B: Backend> Vfs<B> {
    /// Wire a backend class with fresh instrumentation counters.
    #[must_use]
    pub fn new(backend: B, config: ClassConfig) -> Self {
        Self::with_stats(backend, config, Rc::new(CoreStats::default()))
    }

    /// Wire a backend class sharing `stats` with other classes (or with
    /// a test harness).
    #[must_use]
    pub fn with_stats(backend: B, config: ClassConfig, stats: Rc<CoreStats>) -> Self {
        Self {
            backend,
            state: Dcache::new(config, stats, Box::new(NoStamps)),
        }
    }

    /// Attach an external ager's stamp tracker.
    pub fn set_stamp_tracker(&mut self, stamps: Box<dyn StampTracker>) {
        self.state.stamps = stamps;
    }

    #[must_use]
    pub fn state(&self) -> &Dcache<B> {
        &self.state
    }

    #[must_use]
    pub fn state_mut(&mut self) -> &mut Dcache<B> {
        &mut self.state
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// A clonable handle to the cooperative interrupt flag.
    #[must_use]
    pub fn interrupt(&self) -> InterruptFlag {
        self.state.interrupt()
    }
}
