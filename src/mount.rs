//! Superblock lookup and mount management.

use crate::backend::{Backend, ScanVerdict};
use crate::dcache::SuperId;
use crate::error::{VfsError, VfsResult};
use crate::flags::ResolveFlags;
use crate::path::split_archive;
use crate::Vfs;

impl<B: Backend> Vfs<B> {
    /// Dissect a full path into its superblock and inner path, reusing a
    /// live superblock when the backend recognizes one and mounting a
    /// new one otherwise (unless `NO_OPEN` forbids it).
    pub(crate) fn get_path(
        &mut self,
        full: &str,
        flags: ResolveFlags,
    ) -> VfsResult<(SuperId, String)> {
        let (archive_name, op, inner) = split_archive(full);
        let cookie = self.backend.archive_check(archive_name, op)?;

        let live: Vec<SuperId> = self.state.super_order.clone();
        for sb in live {
            match self
                .backend
                .archive_same(&self.state, sb, archive_name, op, &cookie)
            {
                ScanVerdict::Match => return Ok((sb, inner.to_owned())),
                ScanVerdict::Stop => break,
                ScanVerdict::Other => {}
            }
        }

        if flags.contains(ResolveFlags::NO_OPEN) {
            return Err(VfsError::NoLiveSuper);
        }

        let sb = self.state.new_super();
        {
            let Self { backend, state } = self;
            if let Err(e) = backend.open_archive(state, sb, archive_name, op) {
                self.state.free_super(sb);
                return Err(VfsError::ArchiveOpen(Box::new(e)));
            }
        }
        {
            let s = self.state.superblock(sb);
            assert!(!s.name.is_empty(), "open_archive must set the superblock name");
            assert!(s.root.is_some(), "open_archive must set the root inode");
        }
        self.state.super_order.insert(0, sb);
        self.state.stamp_create(sb);
        Ok((sb, inner.to_owned()))
    }

    /// The superblock serving `path`, without mounting anything new.
    pub fn getid(&mut self, path: &str) -> VfsResult<SuperId> {
        self.get_path(path, ResolveFlags::NO_OPEN).map(|(sb, _)| sb)
    }

    /// Handle lifetime pins superblocks directly, so an ager may free a
    /// stamped superblock at any time.
    #[must_use]
    pub fn nothingisopen(&self, _sb: SuperId) -> bool {
        true
    }

    /// Tear a superblock down; typically invoked by the external ager on
    /// a stamped mount.
    pub fn free_super(&mut self, sb: SuperId) {
        self.state.free_super(sb);
    }

    /// Throw away a superblock's cached tree (kept intact when the
    /// superblock wants stale data).
    pub fn invalidate(&mut self, sb: SuperId) {
        self.state.invalidate(sb);
    }

    /// Report one `name#prefix/` spelling per live mount, most recent
    /// first, so an outer dispatcher can enumerate active mounts.
    pub fn fill_names(&self, mut f: impl FnMut(&str)) {
        for &sb in &self.state.super_order {
            let s = self.state.superblock(sb);
            f(&format!("{}#{}/", s.name, self.state.config.prefix));
        }
    }
}
