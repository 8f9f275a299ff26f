//! The capability set a concrete backend plugs into the core.
//!
//! A backend (a tar-like archive reader, an ftp-like session driver)
//! implements [`Backend`] and receives the whole POSIX-shaped API in
//! return. Most hooks are optional: a backend advertises the ones it has
//! through [`BackendCaps`] and the core only calls what is advertised.
//!
//! Per-node backend state lives in the associated payload types: built
//! with `Default` when the core allocates the node, released by `Drop`
//! when the node is destroyed.

use std::path::Path;

use crate::dcache::{Dcache, InodeId, SuperId};
use crate::error::VfsResult;
use crate::flags::{BackendCaps, OpenFlags};
use crate::handle::FileHandle;
use crate::stat::now_secs;

/// Verdict returned by [`Backend::archive_same`] while the superblock
/// list is scanned for a reusable mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    /// Not this one; keep scanning.
    Other,
    /// Reuse this superblock.
    Match,
    /// Not this one, and stop scanning: a fresh superblock must be
    /// opened even if an older candidate would have matched.
    Stop,
}

pub trait Backend: Sized {
    /// Per-inode backend payload.
    type InodeData: Default;
    /// Per-entry backend payload.
    type EntryData: Default;
    /// Per-superblock backend payload; its `Drop` is the archive
    /// teardown hook.
    type SuperData: Default;
    /// Per-file-handle backend payload (streaming cursors and the like).
    type FileData: Default;
    /// Pre-validation state produced by [`archive_check`] and threaded
    /// to every [`archive_same`] call of one lookup.
    ///
    /// [`archive_check`]: Backend::archive_check
    /// [`archive_same`]: Backend::archive_same
    type Cookie: Default;

    /// Which optional hooks this backend provides.
    fn capabilities(&self) -> BackendCaps {
        BackendCaps::empty()
    }

    /// Pre-validate an archive name before the superblock list is
    /// scanned. An error aborts the whole lookup.
    fn archive_check(&mut self, _archive_name: &str, _op: &str) -> VfsResult<Self::Cookie> {
        Ok(Self::Cookie::default())
    }

    /// Decide whether a live superblock serves `archive_name`.
    fn archive_same(
        &mut self,
        fs: &Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        op: &str,
        cookie: &Self::Cookie,
    ) -> ScanVerdict;

    /// Mount a new superblock: the backend must set the superblock name
    /// and root inode before returning success. Leaving either unset is
    /// a backend bug and aborts the process.
    ///
    /// Tree classes should give the root inode one link of its own: the
    /// root can be pinned directly (an iterator over the mount root),
    /// and the pin's release must not destroy it.
    fn open_archive(
        &mut self,
        fs: &mut Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        op: &str,
    ) -> VfsResult<()>;

    /// Populate the children of a freshly created directory inode.
    /// Required for REMOTE classes; tree classes never see it. The
    /// backend should also stamp `timestamp` on the inode with its
    /// expiry deadline (`now + ttl`).
    fn dir_load(&mut self, _fs: &mut Dcache<Self>, _dir: InodeId, _path: &str) -> VfsResult<()> {
        unreachable!("dir_load is required for REMOTE classes")
    }

    /// Freshness of a cached directory listing. The default compares the
    /// wall clock against the inode's expiry deadline; the class-wide
    /// flush flag is consumed by the core before this is consulted.
    fn dir_uptodate(&mut self, fs: &Dcache<Self>, ino: InodeId) -> bool {
        now_secs() < fs.inode(ino).timestamp
    }

    /// Non-linear open hook, called once per handle after resolution.
    /// Only called when [`BackendCaps::FH_OPEN`] is advertised.
    fn fh_open(
        &mut self,
        _fs: &mut Dcache<Self>,
        _fh: &mut FileHandle<Self>,
        _flags: OpenFlags,
        _mode: u32,
    ) -> VfsResult<()> {
        Ok(())
    }

    /// Close hook; its result becomes the handle's close result unless a
    /// later write-back step overrides it. Only called when
    /// [`BackendCaps::FH_CLOSE`] is advertised.
    fn fh_close(&mut self, _fs: &mut Dcache<Self>, _fh: &mut FileHandle<Self>) -> VfsResult<()> {
        Ok(())
    }

    /// Open a streaming cursor at `offset` for a linear read.
    fn linear_start(
        &mut self,
        _fs: &mut Dcache<Self>,
        _fh: &mut FileHandle<Self>,
        _offset: u64,
    ) -> VfsResult<()> {
        unreachable!("backend does not advertise BackendCaps::LINEAR")
    }

    /// Stream bytes from an open cursor; `Ok(0)` is end of stream.
    fn linear_read(
        &mut self,
        _fs: &mut Dcache<Self>,
        _fh: &mut FileHandle<Self>,
        _buf: &mut [u8],
    ) -> VfsResult<usize> {
        unreachable!("backend does not advertise BackendCaps::LINEAR")
    }

    /// Release a streaming cursor.
    fn linear_close(&mut self, _fs: &mut Dcache<Self>, _fh: &mut FileHandle<Self>) {
        unreachable!("backend does not advertise BackendCaps::LINEAR")
    }

    /// Write back a dirty handle: `full_path` is the inode's path inside
    /// the mount, `local` the scratch file holding the new body. Only
    /// called when [`BackendCaps::FILE_STORE`] is advertised.
    fn file_store(
        &mut self,
        _fs: &mut Dcache<Self>,
        _fh: &mut FileHandle<Self>,
        _full_path: &str,
        _local: &Path,
    ) -> VfsResult<()> {
        Ok(())
    }
}

/// External ager notifications driven by file-descriptor usage.
///
/// The core stamps a superblock whenever its last handle closes and
/// removes the stamp when a handle opens; an external garbage collector
/// decides when a stamped superblock is actually freed.
pub trait StampTracker {
    /// The superblock became idle and is eligible for aging out.
    fn stamp_create(&mut self, _sb: SuperId) {}

    /// The superblock is in use again; cancel any pending stamp.
    fn rmstamp(&mut self, _sb: SuperId) {}
}

/// Default tracker: no ager is attached.
pub struct NoStamps;

impl StampTracker for NoStamps {}
