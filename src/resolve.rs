//! Path resolution.
//!
//! Tree mode walks a fully materialized tree segment by segment; it is
//! what archive classes get. Linear mode serves REMOTE classes, whose
//! root is a flat bag of *fingerprint* entries named by full directory
//! path, each owning one lazily loaded, expirable listing. Both share
//! the entry/inode primitives; only the root semantics differ.

use tracing::debug;

use crate::backend::Backend;
use crate::dcache::{EntryId, InodeId, SuperId};
use crate::error::{VfsError, VfsResult};
use crate::flags::{ClassFlags, Follow, ResolveFlags};
use crate::path::{canonicalize, split_dir_name};
use crate::stat::default_stat;
use crate::Vfs;

impl<B: Backend> Vfs<B> {
    /// Resolve `path` against `root` with the strategy selected at class
    /// construction.
    pub(crate) fn find_entry(
        &mut self,
        root: InodeId,
        path: &str,
        follow: Follow,
        flags: ResolveFlags,
    ) -> VfsResult<EntryId> {
        if self.state.config.flags.contains(ClassFlags::REMOTE) {
            self.find_entry_linear(root, path, follow, flags)
        } else {
            self.find_entry_tree(root, path, follow, flags)
        }
    }

    /// Resolve `path` to an inode inside `sb`. The empty path is the
    /// mount root for tree classes; REMOTE classes resolve it like any
    /// other fingerprint.
    pub fn find_inode(
        &mut self,
        sb: SuperId,
        path: &str,
        follow: Follow,
        flags: ResolveFlags,
    ) -> VfsResult<InodeId> {
        let root = self
            .state
            .superblock(sb)
            .root
            .unwrap_or_else(|| unreachable!("live superblock without root"));
        if !self.state.config.flags.contains(ClassFlags::REMOTE) && path.is_empty() {
            return Ok(root);
        }
        let ent = self.find_entry(root, path, follow, flags)?;
        Ok(self.state.entry(ent).inode())
    }

    /// Resolve a full outer path (`archive#op/inner`) to an inode,
    /// mounting the superblock if needed. An empty inner path that
    /// misses is retried as a directory: the root of a remote site is
    /// assumed to exist.
    pub(crate) fn inode_from_path(
        &mut self,
        name: &str,
        flags: ResolveFlags,
    ) -> VfsResult<InodeId> {
        let (sb, q) = self.get_path(name, ResolveFlags::empty())?;
        let follow = if flags.contains(ResolveFlags::FOLLOW) {
            Follow::default()
        } else {
            Follow::Never
        };
        let flags = flags.difference(ResolveFlags::FOLLOW);

        match self.find_inode(sb, &q, follow, flags) {
            Ok(ino) => Ok(ino),
            Err(e) if q.is_empty() => self
                .find_inode(sb, &q, follow, flags | ResolveFlags::DIR)
                .map_err(|_| e),
            Err(e) => Err(e),
        }
    }

    // ── Tree mode ───────────────────────────────────────────────────

    fn find_entry_tree(
        &mut self,
        root: InodeId,
        path: &str,
        follow: Follow,
        flags: ResolveFlags,
    ) -> VfsResult<EntryId> {
        let canon = canonicalize(path);
        let mut rest = canon.as_str();
        let mut dir = root;
        let mut found: Option<EntryId> = None;

        loop {
            rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                return found.ok_or(VfsError::NotFound);
            }
            let (seg, tail) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            };

            let mut ent = self.state.lookup_child(dir, seg);
            if ent.is_none() && flags.intersects(ResolveFlags::MKDIR | ResolveFlags::MKFILE) {
                ent = Some(self.automake(dir, seg, flags));
            }
            let Some(ent) = ent else {
                return Err(VfsError::NotFound);
            };

            // Leading directories are always followed; only the final
            // segment honors the caller's intent.
            let eff = if tail.is_empty() { follow } else { Follow::default() };
            let ent = self.resolve_symlink(ent, eff)?;

            dir = self.state.entry(ent).inode();
            found = Some(ent);
            rest = tail;
        }
    }

    /// Create a missing segment on the fly, as a directory or a regular
    /// file depending on what the caller asked for.
    fn automake(&mut self, dir: InodeId, seg: &str, flags: ResolveFlags) -> EntryId {
        let mode = if flags.contains(ResolveFlags::MKDIR) {
            libc::S_IFDIR | 0o777
        } else {
            0o777
        };
        let ent = self.state.generate_entry(seg, dir, mode);
        self.state.insert_entry(dir, ent);
        ent
    }

    /// If the entry is a symlink, find the entry for its target.
    ///
    /// A relative target is made absolute by prefixing the parent
    /// directory's full path, then re-resolved from the superblock root
    /// through the class strategy. Each hop consumes one unit of depth;
    /// a link met with no budget left is a loop.
    fn resolve_symlink(&mut self, ent: EntryId, follow: Follow) -> VfsResult<EntryId> {
        let depth = match follow {
            Follow::Never => return Ok(ent),
            Follow::Depth(d) => d,
        };
        let ino = self.state.entry(ent).inode();
        if !self.state.inode(ino).st.is_symlink() {
            return Ok(ent);
        }
        if depth == 0 {
            return Err(VfsError::LinkLoop);
        }
        let Some(linkname) = self.state.inode(ino).linkname.clone() else {
            return Err(VfsError::BadLink);
        };

        let target = if linkname.starts_with('/') {
            linkname
        } else {
            let dir = self
                .state
                .entry(ent)
                .parent()
                .unwrap_or_else(|| unreachable!("resolving symlink on a detached entry"));
            // A parent with no naming entry is the root itself; the
            // relative target then already resolves from the root.
            match self.state.fullpath(dir) {
                Ok(prefix) => format!("{prefix}/{linkname}"),
                Err(_) => linkname,
            }
        };

        let sb = self.state.inode(ino).superblock();
        let root = self
            .state
            .superblock(sb)
            .root
            .unwrap_or_else(|| unreachable!("live superblock without root"));
        self.find_entry(root, &target, Follow::Depth(depth - 1), ResolveFlags::empty())
    }

    // ── Linear mode ─────────────────────────────────────────────────

    fn find_entry_linear(
        &mut self,
        root: InodeId,
        path: &str,
        follow: Follow,
        flags: ResolveFlags,
    ) -> VfsResult<EntryId> {
        let sb = self.state.inode(root).superblock();
        assert!(
            self.state.superblock(sb).root == Some(root),
            "linear resolution requires the real superblock root"
        );

        let canon = canonicalize(path);

        if !flags.contains(ResolveFlags::DIR) {
            // Resolve the parent listing first, then the leaf inside it.
            let (dirname, name) = split_dir_name(&canon);
            let dir = self.find_inode(sb, dirname, follow, flags | ResolveFlags::DIR)?;
            return self.find_entry_tree(dir, name, follow, flags);
        }

        let mut found = self.state.lookup_child(root, &canon);
        if let Some(ent) = found {
            let ino = self.state.entry(ent).inode();
            if !self.dir_uptodate(ino) {
                debug!(path = %canon, "directory cache expired");
                self.state.free_entry(ent);
                found = None;
            }
        }

        if found.is_none() {
            let ino = self
                .state
                .new_inode(sb, default_stat(libc::S_IFDIR | 0o755));
            let ent = self.state.new_entry(&canon, ino);
            {
                let Self { backend, state } = self;
                if let Err(e) = backend.dir_load(state, ino, &canon) {
                    self.state.free_entry(ent);
                    return Err(e);
                }
            }
            self.state.insert_entry(root, ent);
            found = self.state.lookup_child(root, &canon);
        }

        Ok(found
            .unwrap_or_else(|| unreachable!("loaded directory missing from the fingerprint root")))
    }

    /// Freshness gate: the class-wide flush flag forces one stale
    /// verdict, then the backend's own check runs.
    fn dir_uptodate(&mut self, ino: InodeId) -> bool {
        if self.state.flush {
            self.state.flush = false;
            return false;
        }
        self.backend.dir_uptodate(&self.state, ino)
    }
}
