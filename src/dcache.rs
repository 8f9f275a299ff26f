//! The shared directory-entry graph: inodes, entries and superblocks.
//!
//! Ownership runs downward: a superblock owns its root inode, a
//! directory inode owns its child entries, and each entry holds one
//! *naming reference* to its inode, counted in `nlink`. Inodes are
//! therefore shared between the entries that name them (hard links) and
//! live as long as the longest holder; transient pins (open handles,
//! directory iterators) also count through `nlink`. The `ent`
//! back-pointer on an inode is a weak reference used only for path
//! reconstruction.
//!
//! Nodes live in id-keyed tables rather than owning pointers, so the
//! back and parent links are plain optional ids.

use std::cell::Cell;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::backend::{Backend, StampTracker};
use crate::error::VfsResult;
use crate::stat::Stat;
use crate::ClassConfig;

// ── Identities ──────────────────────────────────────────────────────

/// Inode identity; doubles as the POSIX `st.ino`, stamped from the
/// class-wide counter, so it is unique and strictly increasing across
/// the class's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuperId(pub u64);

// ── Nodes ───────────────────────────────────────────────────────────

/// A file, directory or symlink inside a mount.
pub struct Inode<B: Backend> {
    pub st: Stat,
    /// Symlink target, when the inode is a link.
    pub linkname: Option<String>,
    /// Local scratch file backing the body; unlinked when the inode is
    /// destroyed.
    pub localname: Option<PathBuf>,
    /// Expiry deadline (epoch seconds) used by linear-mode freshness.
    pub timestamp: i64,
    pub data: B::InodeData,
    pub(crate) sb: SuperId,
    /// Weak back-pointer to the entry that canonically names this inode.
    pub(crate) ent: Option<EntryId>,
    /// Child entries in insertion order; part of readdir's contract.
    pub(crate) children: Vec<EntryId>,
}

impl<B: Backend> Inode<B> {
    /// The superblock this inode belongs to.
    #[must_use]
    pub fn superblock(&self) -> SuperId {
        self.sb
    }

    /// The entry canonically naming this inode, if any.
    #[must_use]
    pub fn naming_entry(&self) -> Option<EntryId> {
        self.ent
    }
}

/// A named link from a parent directory to an inode.
pub struct Entry<B: Backend> {
    pub data: B::EntryData,
    pub(crate) name: String,
    pub(crate) ino: InodeId,
    /// Weak link to the parent directory inode; `None` while detached.
    pub(crate) dir: Option<InodeId>,
}

impl<B: Backend> Entry<B> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn inode(&self) -> InodeId {
        self.ino
    }

    #[must_use]
    pub fn parent(&self) -> Option<InodeId> {
        self.dir
    }
}

/// A mounted archive or remote session.
pub struct Super<B: Backend> {
    /// Human-readable identifier, filled by `open_archive`.
    pub name: String,
    /// Root inode; always present while the superblock is alive.
    pub root: Option<InodeId>,
    /// Live inodes belonging to this superblock.
    pub ino_usage: i64,
    /// Live file handles into this superblock.
    pub fd_usage: u32,
    /// When set, `invalidate` keeps the existing tree so a snapshot
    /// survives an endpoint known to be offline.
    pub want_stale: bool,
    pub data: B::SuperData,
}

// ── Shared instrumentation ──────────────────────────────────────────

/// Process-wide node counters. Injected into the class instead of
/// living in hidden statics so tests can share and reset them.
#[derive(Debug, Default)]
pub struct CoreStats {
    total_inodes: Cell<i64>,
    total_entries: Cell<i64>,
}

impl CoreStats {
    #[must_use]
    pub fn total_inodes(&self) -> i64 {
        self.total_inodes.get()
    }

    #[must_use]
    pub fn total_entries(&self) -> i64 {
        self.total_entries.get()
    }

    fn add_inodes(&self, d: i64) {
        self.total_inodes.set(self.total_inodes.get() + d);
    }

    fn add_entries(&self, d: i64) {
        self.total_entries.set(self.total_entries.get() + d);
    }
}

/// Cooperative cancellation flag polled between transfer chunks.
///
/// The core is single-threaded; whoever owns the other clone (a TTY
/// layer, a test) raises the flag and the transfer loop notices at its
/// next chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Rc<Cell<bool>>);

impl InterruptFlag {
    pub fn raise(&self) {
        self.0.set(true);
    }

    /// Read and clear the flag.
    pub fn take(&self) -> bool {
        self.0.replace(false)
    }
}

// ── The cache itself ────────────────────────────────────────────────

/// The directory-cache state shared by one backend class: node tables,
/// the live-superblock list, and the class-wide knobs (flush flag,
/// protocol log file, stamping hooks).
///
/// This is the state backend hooks receive; the [`Vfs`](crate::Vfs)
/// wrapper pairs it with the backend itself.
pub struct Dcache<B: Backend> {
    pub(crate) config: ClassConfig,
    inodes: FxHashMap<InodeId, Inode<B>>,
    entries: FxHashMap<EntryId, Entry<B>>,
    supers: FxHashMap<SuperId, Super<B>>,
    /// Live superblocks, most recently inserted first.
    pub(crate) super_order: Vec<SuperId>,
    next_ino: u64,
    next_entry: u64,
    next_super: u64,
    /// One-shot staleness override consumed by the next freshness check.
    pub(crate) flush: bool,
    /// Protocol log installed via `setctl`.
    pub(crate) logfile: Option<File>,
    pub(crate) stamps: Box<dyn StampTracker>,
    pub(crate) interrupt: InterruptFlag,
    stats: Rc<CoreStats>,
}

impl<B: Backend> Dcache<B> {
    pub(crate) fn new(config: ClassConfig, stats: Rc<CoreStats>, stamps: Box<dyn StampTracker>) -> Self {
        Self {
            config,
            inodes: FxHashMap::default(),
            entries: FxHashMap::default(),
            supers: FxHashMap::default(),
            super_order: Vec::new(),
            next_ino: 1,
            next_entry: 1,
            next_super: 1,
            flush: false,
            logfile: None,
            stamps,
            interrupt: InterruptFlag::default(),
            stats,
        }
    }

    // ── Access ──────────────────────────────────────────────────────

    /// Panics on an unknown id: node ids are only handed out by this
    /// cache, so a dangling one is a caller bug.
    #[must_use]
    pub fn inode(&self, ino: InodeId) -> &Inode<B> {
        self.inodes
            .get(&ino)
            .unwrap_or_else(|| unreachable!("unknown inode {}", ino.0))
    }

    #[must_use]
    pub fn inode_mut(&mut self, ino: InodeId) -> &mut Inode<B> {
        self.inodes
            .get_mut(&ino)
            .unwrap_or_else(|| unreachable!("unknown inode {}", ino.0))
    }

    #[must_use]
    pub fn entry(&self, ent: EntryId) -> &Entry<B> {
        self.entries
            .get(&ent)
            .unwrap_or_else(|| unreachable!("unknown entry {}", ent.0))
    }

    #[must_use]
    pub fn entry_mut(&mut self, ent: EntryId) -> &mut Entry<B> {
        self.entries
            .get_mut(&ent)
            .unwrap_or_else(|| unreachable!("unknown entry {}", ent.0))
    }

    #[must_use]
    pub fn superblock(&self, sb: SuperId) -> &Super<B> {
        self.supers
            .get(&sb)
            .unwrap_or_else(|| unreachable!("unknown superblock {}", sb.0))
    }

    #[must_use]
    pub fn superblock_mut(&mut self, sb: SuperId) -> &mut Super<B> {
        self.supers
            .get_mut(&sb)
            .unwrap_or_else(|| unreachable!("unknown superblock {}", sb.0))
    }

    /// Live superblocks, most recently inserted first.
    #[must_use]
    pub fn supers(&self) -> &[SuperId] {
        &self.super_order
    }

    /// Child entries of a directory in insertion order.
    #[must_use]
    pub fn children(&self, dir: InodeId) -> &[EntryId] {
        &self.inode(dir).children
    }

    /// Scan a directory's children for an exact name match.
    #[must_use]
    pub fn lookup_child(&self, dir: InodeId, name: &str) -> Option<EntryId> {
        self.inode(dir)
            .children
            .iter()
            .copied()
            .find(|&e| self.entry(e).name == name)
    }

    #[must_use]
    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    #[must_use]
    pub fn interrupt(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    // ── Inode & entry store ─────────────────────────────────────────

    /// Allocate an inode inside `sb`. The caller's stat is kept except
    /// for identity: `nlink` starts at zero, `ino` is stamped from the
    /// class counter and `dev` from the class.
    pub fn new_inode(&mut self, sb: SuperId, st: Stat) -> InodeId {
        let id = InodeId(self.next_ino);
        self.next_ino += 1;

        let mut st = st;
        st.nlink = 0;
        st.ino = id.0;
        st.dev = self.config.rdev;

        self.inodes.insert(
            id,
            Inode {
                st,
                linkname: None,
                localname: None,
                timestamp: 0,
                data: B::InodeData::default(),
                sb,
                ent: None,
                children: Vec::new(),
            },
        );
        self.superblock_mut(sb).ino_usage += 1;
        self.stats.add_inodes(1);
        id
    }

    /// Create a detached entry naming `ino` and point the inode's
    /// canonical back-pointer at it.
    pub fn new_entry(&mut self, name: &str, ino: InodeId) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;

        self.entries.insert(
            id,
            Entry {
                data: B::EntryData::default(),
                name: name.to_owned(),
                ino,
                dir: None,
            },
        );
        self.inode_mut(ino).ent = Some(id);
        self.stats.add_entries(1);
        id
    }

    /// Link a detached entry into a directory: sets the parent link,
    /// takes a naming reference on the inode and appends to the child
    /// sequence.
    pub fn insert_entry(&mut self, dir: InodeId, ent: EntryId) {
        let ino = {
            let e = self.entry_mut(ent);
            e.dir = Some(dir);
            e.ino
        };
        self.inode_mut(ino).st.nlink += 1;
        self.inode_mut(dir).children.push(ent);
    }

    /// Destroy an entry: unlink it from its parent, clear the inode's
    /// canonical back-pointer if it points here, and release the naming
    /// reference (which may cascade into destroying the inode).
    pub fn free_entry(&mut self, ent: EntryId) {
        let (ino, dir) = {
            let e = self.entry(ent);
            (e.ino, e.dir)
        };
        if let Some(dir) = dir {
            self.inode_mut(dir).children.retain(|&e| e != ent);
        }
        self.entries.remove(&ent);
        self.stats.add_entries(-1);

        let node = self.inode_mut(ino);
        if node.ent == Some(ent) {
            node.ent = None;
        }
        self.free_inode(ino);
    }

    /// Release one reference to an inode. With other holders left the
    /// link count just drops; releasing the last reference destroys the
    /// inode: child entries are freed first, head of the sequence at a
    /// time, then the scratch file is unlinked and the payload dropped.
    pub fn free_inode(&mut self, ino: InodeId) {
        {
            let node = self
                .inodes
                .get_mut(&ino)
                .unwrap_or_else(|| unreachable!("free of unknown inode {}", ino.0));
            // nlink == 0 happens when a freshly created entry is deleted.
            if node.st.nlink > 1 {
                node.st.nlink -= 1;
                return;
            }
        }

        loop {
            let Some(first) = self.inode(ino).children.first().copied() else {
                break;
            };
            self.free_entry(first);
        }

        let node = self
            .inodes
            .remove(&ino)
            .unwrap_or_else(|| unreachable!("inode {} vanished during teardown", ino.0));
        if let Some(local) = &node.localname {
            trace!(ino = ino.0, path = %local.display(), "unlinking scratch file");
            if let Err(e) = std::fs::remove_file(local) {
                warn!(path = %local.display(), error = %e, "failed to unlink scratch file");
            }
        }
        self.stats.add_inodes(-1);
        self.superblock_mut(node.sb).ino_usage -= 1;
    }

    /// Allocate an inode with a default stat for `mode` plus a detached
    /// entry naming it under `parent`'s superblock.
    pub fn generate_entry(&mut self, name: &str, parent: InodeId, mode: u32) -> EntryId {
        let sb = self.inode(parent).sb;
        let ino = self.new_inode(sb, crate::stat::default_stat(mode));
        self.new_entry(name, ino)
    }

    // ── Path reconstruction ─────────────────────────────────────────

    /// Rebuild an inode's path inside its mount through the naming-entry
    /// chain. Tree classes join every segment below the root; REMOTE
    /// classes join the fingerprint parent's name and the leaf.
    pub fn fullpath(&self, ino: InodeId) -> VfsResult<String> {
        let node = self.inode(ino);
        let Some(eid) = node.ent else {
            return Err(crate::error::VfsError::Unnamed);
        };

        if self.config.flags.contains(crate::flags::ClassFlags::REMOTE) {
            let ent = self.entry(eid);
            return Ok(match ent.dir.and_then(|d| self.inode(d).ent) {
                None => ent.name.clone(),
                Some(parent_ent) => {
                    format!("{}/{}", self.entry(parent_ent).name, ent.name)
                }
            });
        }

        let root = self.superblock(node.sb).root;
        let mut path = self.entry(eid).name.clone();
        let mut e = eid;
        loop {
            let dir = self
                .entry(e)
                .dir
                .unwrap_or_else(|| unreachable!("detached entry in fullpath chain"));
            if Some(dir) == root {
                break;
            }
            let parent_ent = self
                .inode(dir)
                .ent
                .unwrap_or_else(|| unreachable!("unnamed ancestor in fullpath chain"));
            path = format!("{}/{}", self.entry(parent_ent).name, path);
            e = parent_ent;
        }
        Ok(path)
    }

    // ── Superblock registry ─────────────────────────────────────────

    /// Allocate an empty superblock, not yet in the live list.
    pub(crate) fn new_super(&mut self) -> SuperId {
        let id = SuperId(self.next_super);
        self.next_super += 1;
        self.supers.insert(
            id,
            Super {
                name: String::new(),
                root: None,
                ino_usage: 0,
                fd_usage: 0,
                want_stale: false,
                data: B::SuperData::default(),
            },
        );
        id
    }

    /// Tear down a superblock: the root tree is freed first, then the
    /// superblock leaves the live list and its payload is dropped.
    pub fn free_super(&mut self, sb: SuperId) {
        let root = self.superblock_mut(sb).root.take();
        if let Some(root) = root {
            self.free_inode(root);
        }
        {
            let s = self.superblock(sb);
            if s.ino_usage != 0 {
                warn!(sb = sb.0, name = %s.name, ino_usage = s.ino_usage,
                    "superblock freed with live inodes");
            }
        }
        self.super_order.retain(|&x| x != sb);
        self.supers.remove(&sb);
    }

    /// Throw away a superblock's cached tree and install a fresh empty
    /// root. Honors `want_stale`: a retained snapshot is left alone.
    pub fn invalidate(&mut self, sb: SuperId) {
        if self.superblock(sb).want_stale {
            return;
        }
        trace!(sb = sb.0, "invalidating cached tree");
        let root = self.superblock_mut(sb).root.take();
        if let Some(root) = root {
            self.free_inode(root);
        }
        let fresh = self.new_inode(sb, crate::stat::default_stat(libc::S_IFDIR | 0o755));
        self.superblock_mut(sb).root = Some(fresh);
    }

    // ── Scratch files ───────────────────────────────────────────────

    /// Create a scratch file in the class scratch directory, named after
    /// the class and the leaf it caches. The file is left closed; the
    /// caller records the path as an inode's `localname` or opens it.
    pub fn make_scratch(&self, leaf: &str) -> VfsResult<PathBuf> {
        let template = self
            .config
            .scratch_dir
            .join(format!("{}-{}-XXXXXX", self.config.name, leaf));
        let (fd, path) = nix::unistd::mkstemp(&template)?;
        nix::unistd::close(fd)?;
        Ok(path)
    }

    // ── Stamping ────────────────────────────────────────────────────

    pub(crate) fn stamp_create(&mut self, sb: SuperId) {
        self.stamps.stamp_create(sb);
    }

    pub(crate) fn rmstamp(&mut self, sb: SuperId) {
        self.stamps.rmstamp(sb);
    }
}
