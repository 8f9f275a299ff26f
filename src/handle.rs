//! File handles: open/read/write/seek/close plus the linear fast path.
//!
//! A handle reads either through the backend's streamed (linear) hooks
//! or through a local scratch file that caches or stages the body. The
//! linear path is single-pass: seeking after the stream opened or
//! writing with any linear state set is a caller bug and aborts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::backend::Backend;
use crate::dcache::{Dcache, InodeId};
use crate::error::{VfsError, VfsResult};
use crate::flags::{BackendCaps, ClassFlags, Follow, OpenFlags, ResolveFlags};
use crate::path::split_dir_name;
use crate::Vfs;

/// Where a handle stands in the streamed-read protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearState {
    /// Plain handle; reads go to the local scratch file.
    Inactive,
    /// Linear transfer requested; the stream opens on the first read.
    Preopen,
    /// Stream cursor open; reads are delegated to the backend.
    Open,
    /// Stream cursor released.
    Closed,
}

/// An open file. Obtained from [`Vfs::open`] and returned to
/// [`Vfs::close`] exactly once.
pub struct FileHandle<B: Backend> {
    pub(crate) ino: InodeId,
    pub(crate) pos: u64,
    pub(crate) local: Option<File>,
    pub(crate) changed: bool,
    pub(crate) linear: LinearState,
    pub data: B::FileData,
}

impl<B: Backend> FileHandle<B> {
    fn new(ino: InodeId, changed: bool) -> Self {
        Self {
            ino,
            pos: 0,
            local: None,
            changed,
            linear: LinearState::Inactive,
            data: B::FileData::default(),
        }
    }

    /// Internal handle used by [`Vfs::retrieve_file`]; carries no open
    /// accounting.
    pub(crate) fn transfer(ino: InodeId) -> Self {
        Self::new(ino, false)
    }

    #[must_use]
    pub fn inode(&self) -> InodeId {
        self.ino
    }

    #[must_use]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[must_use]
    pub fn linear(&self) -> LinearState {
        self.linear
    }
}

fn open_local(path: &Path, flags: OpenFlags, mode: u32) -> VfsResult<File> {
    let acc = flags.bits() & libc::O_ACCMODE;
    let mut opts = OpenOptions::new();
    opts.read(acc == libc::O_RDONLY || acc == libc::O_RDWR)
        .write(acc == libc::O_WRONLY || acc == libc::O_RDWR)
        .append(flags.contains(OpenFlags::APPEND))
        .truncate(flags.contains(OpenFlags::TRUNC))
        .create(flags.contains(OpenFlags::CREAT))
        .mode(mode);
    Ok(opts.open(path)?)
}

impl<B: Backend> Vfs<B> {
    /// Open `path`, following symlinks. `O_CREAT` creates a missing file
    /// (on a writable class) backed by a fresh scratch file; combined
    /// with `O_EXCL` an existing file is an error.
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> VfsResult<FileHandle<B>> {
        let (sb, q) = self.get_path(path, ResolveFlags::empty())?;

        let mut created = None;
        let ino = match self.find_inode(sb, &q, Follow::default(), ResolveFlags::empty()) {
            Ok(ino) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(VfsError::Exists);
                }
                ino
            }
            Err(e) => {
                if !flags.contains(OpenFlags::CREAT)
                    || self.state.config.flags.contains(ClassFlags::READONLY)
                {
                    return Err(e);
                }
                let (dirname, name) = split_dir_name(&q);
                let dir = self.find_inode(sb, dirname, Follow::default(), ResolveFlags::DIR)?;
                let ent = self.state.generate_entry(name, dir, mode);
                let ino = self.state.entry(ent).inode();
                self.state.insert_entry(dir, ent);
                match self.state.make_scratch(name) {
                    Ok(p) => self.state.inode_mut(ino).localname = Some(p),
                    Err(e) => {
                        self.state.free_entry(ent);
                        return Err(e);
                    }
                }
                created = Some(ent);
                ino
            }
        };

        if self.state.inode(ino).st.is_dir() {
            return Err(VfsError::IsADirectory);
        }

        let mut fh = FileHandle::new(ino, created.is_some());

        if flags.contains(OpenFlags::LINEAR) {
            if self.backend.capabilities().contains(BackendCaps::LINEAR) {
                trace!(ino = ino.0, "starting linear transfer");
                fh.linear = LinearState::Preopen;
            }
        } else if self.backend.capabilities().contains(BackendCaps::FH_OPEN) {
            let Self { backend, state } = self;
            if let Err(e) = backend.fh_open(state, &mut fh, flags, mode) {
                if let Some(ent) = created {
                    self.state.free_entry(ent);
                }
                return Err(e);
            }
        }

        if let Some(local) = self.state.inode(ino).localname.clone() {
            match open_local(&local, flags.sans_linear(), mode) {
                Ok(f) => fh.local = Some(f),
                Err(e) => {
                    if let Some(ent) = created {
                        self.state.free_entry(ent);
                    }
                    return Err(e);
                }
            }
        }

        // We had no open files and now we have one.
        self.state.rmstamp(sb);
        self.state.superblock_mut(sb).fd_usage += 1;
        self.state.inode_mut(ino).st.nlink += 1;
        Ok(fh)
    }

    pub fn read(&mut self, fh: &mut FileHandle<B>, buf: &mut [u8]) -> VfsResult<usize> {
        assert!(
            fh.linear != LinearState::Closed,
            "read on a closed linear handle"
        );
        if fh.linear == LinearState::Preopen {
            let pos = fh.pos;
            let Self { backend, state } = self;
            backend.linear_start(state, fh, pos)?;
            fh.linear = LinearState::Open;
        }
        if fh.linear == LinearState::Open {
            let Self { backend, state } = self;
            return backend.linear_read(state, fh, buf);
        }
        match fh.local.as_mut() {
            Some(f) => Ok(f.read(buf)?),
            None => unreachable!("handle has no data path to read from"),
        }
    }

    /// Write to the handle's scratch file and mark it dirty. Any linear
    /// state is a caller bug: streamed handles cannot be written.
    pub fn write(&mut self, fh: &mut FileHandle<B>, buf: &[u8]) -> VfsResult<usize> {
        assert!(
            fh.linear == LinearState::Inactive,
            "no writing to linear files"
        );
        if self.state.config.flags.contains(ClassFlags::READONLY) {
            return Err(VfsError::ReadOnly);
        }
        fh.changed = true;
        match fh.local.as_mut() {
            Some(f) => Ok(f.write(buf)?),
            None => unreachable!("write on a handle without a scratch file"),
        }
    }

    /// Reposition the handle. With a local scratch file the seek is
    /// delegated; otherwise the position is computed against the inode
    /// size and clamped to `[0, size]`. Seeking after a linear stream
    /// opened is a caller bug.
    pub fn lseek(&mut self, fh: &mut FileHandle<B>, pos: SeekFrom) -> VfsResult<u64> {
        assert!(
            fh.linear != LinearState::Open,
            "cannot seek after a linear read started"
        );
        if let Some(f) = fh.local.as_mut() {
            return Ok(f.seek(pos)?);
        }
        let size = self.state.inode(fh.ino).st.size as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => fh.pos as i64 + d,
            SeekFrom::End(d) => size + d,
        };
        fh.pos = target.clamp(0, size) as u64;
        Ok(fh.pos)
    }

    /// Close the handle. A dirty handle is written back through the
    /// backend (when it can store files) and the superblock's cached
    /// tree is invalidated; the write-back outcome is the close result.
    pub fn close(&mut self, mut fh: FileHandle<B>) -> VfsResult<()> {
        let sb = self.state.inode(fh.ino).superblock();
        self.state.superblock_mut(sb).fd_usage -= 1;
        if self.state.superblock(sb).fd_usage == 0 {
            self.state.stamp_create(sb);
        }

        if fh.linear == LinearState::Open {
            let Self { backend, state } = self;
            backend.linear_close(state, &mut fh);
            fh.linear = LinearState::Closed;
        }

        let caps = self.backend.capabilities();
        let mut res = if caps.contains(BackendCaps::FH_CLOSE) {
            let Self { backend, state } = self;
            backend.fh_close(state, &mut fh)
        } else {
            Ok(())
        };

        if fh.changed && caps.contains(BackendCaps::FILE_STORE) {
            match self.state.fullpath(fh.ino) {
                Err(e) => res = Err(e),
                Ok(full) => {
                    let local = self
                        .state
                        .inode(fh.ino)
                        .localname
                        .clone()
                        .unwrap_or_else(|| unreachable!("dirty handle without a scratch file"));
                    let Self { backend, state } = self;
                    res = backend.file_store(state, &mut fh, &full, &local);
                }
            }
            self.state.invalidate(sb);
        }

        fh.local.take();
        self.state.free_inode(fh.ino);
        res
    }

    /// Materialize a remote inode's body into a scratch file over the
    /// linear hooks, 8 KiB at a time, honoring the interrupt flag
    /// between chunks. On success the scratch path stays recorded as the
    /// inode's local body; on failure the partial file is unlinked.
    pub fn retrieve_file(&mut self, ino: InodeId) -> VfsResult<()> {
        let Self { backend, state } = self;

        let eid = state
            .inode(ino)
            .naming_entry()
            .unwrap_or_else(|| unreachable!("retrieving a file with no naming entry"));
        let leaf = state.entry(eid).name().to_owned();
        let need = state.inode(ino).st.size;

        let scratch = state.make_scratch(&leaf)?;
        state.inode_mut(ino).localname = Some(scratch.clone());

        let mut out = match File::create(&scratch) {
            Ok(f) => f,
            Err(e) => {
                Self::drop_scratch(state, ino);
                return Err(e.into());
            }
        };

        let mut fh = FileHandle::transfer(ino);
        state.interrupt.take(); // clear any stale interrupt
        if let Err(e) = backend.linear_start(state, &mut fh, 0) {
            drop(out);
            Self::drop_scratch(state, ino);
            return Err(e);
        }
        fh.linear = LinearState::Open;

        let mut have: u64 = 0;
        let mut buf = [0u8; 8192];
        let res = loop {
            match backend.linear_read(state, &mut fh, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    have += n as u64;
                    trace!(file = %leaf, have, need, "retrieving file");
                    if state.interrupt.take() {
                        break Err(VfsError::Interrupted);
                    }
                    if let Err(e) = out.write_all(&buf[..n]) {
                        break Err(e.into());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        backend.linear_close(state, &mut fh);
        fh.linear = LinearState::Closed;

        if res.is_err() {
            drop(out);
            Self::drop_scratch(state, ino);
        }
        res
    }

    fn drop_scratch(state: &mut Dcache<B>, ino: InodeId) {
        if let Some(p) = state.inode_mut(ino).localname.take() {
            if let Err(e) = std::fs::remove_file(&p) {
                tracing::warn!(path = %p.display(), error = %e,
                    "failed to unlink partial scratch file");
            }
        }
    }

    /// A local copy of the file at `path`, if the class caches bodies
    /// on disk. REMOTE classes reuse the scratch cache; for other
    /// classes the caller is expected to extract through the normal
    /// read path, and `None` is returned.
    pub fn getlocalcopy(&mut self, path: &str) -> VfsResult<Option<PathBuf>> {
        if !self.state.config.flags.contains(ClassFlags::REMOTE) {
            return Ok(None);
        }
        let fh = self.open(path, OpenFlags::RDONLY, 0)?;
        let local = self.state.inode(fh.inode()).localname.clone();
        let _ = self.close(fh);
        Ok(local)
    }

    /// The scratch cache owns the local copy; it is reclaimed when the
    /// inode goes away, so handing it back is a no-op.
    pub fn ungetlocalcopy(&mut self, _path: &str, _local: &Path) -> VfsResult<()> {
        Ok(())
    }
}
