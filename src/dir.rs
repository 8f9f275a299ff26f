//! Directory iteration and the metadata surface: stat family, readlink,
//! chdir and the control operations.

use std::fs::File;
use std::path::Path;

use tracing::warn;

use crate::backend::Backend;
use crate::dcache::InodeId;
use crate::error::{VfsError, VfsResult};
use crate::flags::ResolveFlags;
use crate::handle::FileHandle;
use crate::stat::Stat;
use crate::Vfs;

/// Directory iterator. The inode is pinned (through `nlink`) for the
/// iterator's lifetime; [`Vfs::closedir`] releases it.
pub struct DirHandle {
    dir: InodeId,
    cursor: usize,
}

impl DirHandle {
    /// The directory being iterated.
    #[must_use]
    pub fn inode(&self) -> InodeId {
        self.dir
    }
}

/// One yielded directory entry. The name buffer belongs to the yielded
/// value, not to process-global storage, so iterators are independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    pub name: String,
    pub ino: InodeId,
}

/// Control operations applied to a mount through [`Vfs::setctl`].
pub enum SetCtl<'a> {
    /// Whether the superblock should keep serving its cached tree after
    /// the endpoint went away. Clearing also invalidates.
    StaleData(bool),
    /// Install a protocol log file on the class.
    Logfile(&'a Path),
    /// Force the next directory freshness check to report stale.
    Flush,
}

impl<B: Backend> Vfs<B> {
    /// Open a directory for iteration; entries come back in insertion
    /// order, which for a single `dir_load` equals delivery order.
    pub fn opendir(&mut self, path: &str) -> VfsResult<DirHandle> {
        let dir = self.inode_from_path(path, ResolveFlags::DIR | ResolveFlags::FOLLOW)?;
        if !self.state.inode(dir).st.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        self.state.inode_mut(dir).st.nlink += 1;
        Ok(DirHandle { dir, cursor: 0 })
    }

    /// The next entry, or `None` past the end.
    pub fn readdir(&self, h: &mut DirHandle) -> Option<DirEnt> {
        let ent = self.state.children(h.dir).get(h.cursor).copied()?;
        h.cursor += 1;
        let e = self.state.entry(ent);
        Some(DirEnt {
            name: e.name().to_owned(),
            ino: e.inode(),
        })
    }

    /// Release the iterator and its pin on the directory inode.
    pub fn closedir(&mut self, h: DirHandle) {
        self.state.free_inode(h.dir);
    }

    /// Verify that `path` is an enterable directory.
    pub fn chdir(&mut self, path: &str) -> VfsResult<()> {
        let h = self.opendir(path)?;
        self.closedir(h);
        Ok(())
    }

    fn internal_stat(&mut self, path: &str, flags: ResolveFlags) -> VfsResult<Stat> {
        let ino = self.inode_from_path(path, flags)?;
        Ok(self.state.inode(ino).st)
    }

    /// Stat following symlinks.
    pub fn stat(&mut self, path: &str) -> VfsResult<Stat> {
        self.internal_stat(path, ResolveFlags::FOLLOW)
    }

    /// Stat without following a trailing symlink.
    pub fn lstat(&mut self, path: &str) -> VfsResult<Stat> {
        self.internal_stat(path, ResolveFlags::empty())
    }

    /// Stat through an open handle.
    #[must_use]
    pub fn fstat(&self, fh: &FileHandle<B>) -> Stat {
        self.state.inode(fh.inode()).st
    }

    /// Copy up to `buf.len()` bytes of the link target, without NUL
    /// termination, returning how many were copied.
    pub fn readlink(&mut self, path: &str, buf: &mut [u8]) -> VfsResult<usize> {
        let ino = self.inode_from_path(path, ResolveFlags::empty())?;
        let node = self.state.inode(ino);
        if !node.st.is_symlink() {
            return Err(VfsError::InvalidArgument);
        }
        let Some(link) = &node.linkname else {
            return Err(VfsError::BadLink);
        };
        let n = link.len().min(buf.len());
        buf[..n].copy_from_slice(&link.as_bytes()[..n]);
        Ok(n)
    }

    /// Apply a control operation. Returns whether the operation was
    /// handled (a missing path under `StaleData` is reported as
    /// unhandled, not an error).
    pub fn setctl(&mut self, path: &str, op: SetCtl<'_>) -> VfsResult<bool> {
        match op {
            SetCtl::StaleData(stale) => {
                let Ok(ino) = self.inode_from_path(path, ResolveFlags::empty()) else {
                    return Ok(false);
                };
                let sb = self.state.inode(ino).superblock();
                self.state.superblock_mut(sb).want_stale = stale;
                if !stale {
                    self.state.invalidate(sb);
                }
                Ok(true)
            }
            SetCtl::Logfile(p) => {
                self.state.logfile = match File::create(p) {
                    Ok(f) => Some(f),
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "cannot open protocol log");
                        None
                    }
                };
                Ok(true)
            }
            SetCtl::Flush => {
                self.state.flush = true;
                Ok(true)
            }
        }
    }
}
