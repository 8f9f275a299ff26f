#![allow(missing_docs, clippy::unwrap_used, dead_code)]
//! Stub backends shared by the integration tests.
//!
//! `ArchiveBackend` is a tree-mode class with a fixed in-memory archive;
//! `RemoteBackend` is a linear-mode class serving listings out of a map,
//! with streamed reads and write-back capture.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use dcachefs::{
    default_stat, now_secs, Backend, BackendCaps, ClassConfig, ClassFlags, Dcache, FileHandle,
    InodeId, InterruptFlag, OpenFlags, ScanVerdict, Stat, StampTracker, SuperId, Vfs, VfsError,
    VfsResult,
};

// ── Shared helpers ──────────────────────────────────────────────────

fn child_stat(mode: u32, size: u64) -> Stat {
    let mut st = default_stat(mode);
    st.size = size;
    st
}

pub fn add_dir<B: Backend<InodeData = Vec<u8>>>(
    fs: &mut Dcache<B>,
    parent: InodeId,
    name: &str,
) -> InodeId {
    let sb = fs.inode(parent).superblock();
    let ino = fs.new_inode(sb, child_stat(libc::S_IFDIR | 0o755, 0));
    let ent = fs.new_entry(name, ino);
    fs.insert_entry(parent, ent);
    ino
}

pub fn add_file<B: Backend<InodeData = Vec<u8>>>(
    fs: &mut Dcache<B>,
    parent: InodeId,
    name: &str,
    body: &[u8],
) -> InodeId {
    let sb = fs.inode(parent).superblock();
    let ino = fs.new_inode(sb, child_stat(libc::S_IFREG | 0o644, body.len() as u64));
    fs.inode_mut(ino).data = body.to_vec();
    let ent = fs.new_entry(name, ino);
    fs.insert_entry(parent, ent);
    ino
}

pub fn add_link<B: Backend<InodeData = Vec<u8>>>(
    fs: &mut Dcache<B>,
    parent: InodeId,
    name: &str,
    target: &str,
) -> InodeId {
    let sb = fs.inode(parent).superblock();
    let ino = fs.new_inode(sb, child_stat(libc::S_IFLNK | 0o777, target.len() as u64));
    fs.inode_mut(ino).linkname = Some(target.to_owned());
    let ent = fs.new_entry(name, ino);
    fs.insert_entry(parent, ent);
    ino
}

/// Stage an inode's body into a scratch file, as a real driver would on
/// its non-linear open path.
fn materialize<B: Backend<InodeData = Vec<u8>>>(
    fs: &mut Dcache<B>,
    ino: InodeId,
) -> VfsResult<()> {
    if fs.inode(ino).localname.is_some() {
        return Ok(());
    }
    let leaf = fs
        .inode(ino)
        .naming_entry()
        .map(|e| fs.entry(e).name().to_owned())
        .unwrap_or_default();
    let p = fs.make_scratch(&leaf)?;
    std::fs::write(&p, &fs.inode(ino).data)?;
    fs.inode_mut(ino).localname = Some(p);
    Ok(())
}

// ── Archive (tree) backend ──────────────────────────────────────────

#[derive(Default)]
pub struct ArchiveBackend {
    pub opens: Rc<Cell<u32>>,
    /// When cleared, `archive_same` answers `Stop` so every lookup
    /// mounts a fresh superblock.
    pub unify: Rc<Cell<bool>>,
    /// Also populate symlinks and follow-depth chains.
    pub with_links: bool,
}

impl Backend for ArchiveBackend {
    type InodeData = Vec<u8>;
    type EntryData = ();
    type SuperData = ();
    type FileData = ();
    type Cookie = ();

    fn capabilities(&self) -> BackendCaps {
        BackendCaps::FH_OPEN
    }

    fn archive_same(
        &mut self,
        fs: &Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        _op: &str,
        _cookie: &(),
    ) -> ScanVerdict {
        if !self.unify.get() {
            return ScanVerdict::Stop;
        }
        if fs.superblock(sb).name == archive_name {
            ScanVerdict::Match
        } else {
            ScanVerdict::Other
        }
    }

    fn open_archive(
        &mut self,
        fs: &mut Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        _op: &str,
    ) -> VfsResult<()> {
        self.opens.set(self.opens.get() + 1);
        fs.superblock_mut(sb).name = archive_name.to_owned();

        let root = fs.new_inode(sb, child_stat(libc::S_IFDIR | 0o755, 0));
        // The archive root can be pinned directly (opendir of ""), so it
        // carries one link of its own; free_super releases it.
        fs.inode_mut(root).st.nlink = 1;
        fs.superblock_mut(sb).root = Some(root);

        let a = add_dir(fs, root, "a");
        add_file(fs, a, "b", b"ping");

        if self.with_links {
            add_link(fs, root, "x", "y");
            add_link(fs, root, "y", "x");
            add_link(fs, root, "l", "a/b");
            add_link(fs, root, "c5", "a/b");
            add_link(fs, root, "c4", "c5");
            add_link(fs, root, "c3", "c4");
            add_link(fs, root, "c2", "c3");
            add_link(fs, root, "c1", "c2");
            add_link(fs, root, "c0", "c1");
        }
        Ok(())
    }

    fn fh_open(
        &mut self,
        fs: &mut Dcache<Self>,
        fh: &mut FileHandle<Self>,
        _flags: OpenFlags,
        _mode: u32,
    ) -> VfsResult<()> {
        materialize(fs, fh.inode())
    }
}

pub struct ArchiveFixture {
    pub vfs: Vfs<ArchiveBackend>,
    pub opens: Rc<Cell<u32>>,
    pub unify: Rc<Cell<bool>>,
    _scratch: tempfile::TempDir,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn archive(with_links: bool) -> ArchiveFixture {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let opens = Rc::new(Cell::new(0));
    let unify = Rc::new(Cell::new(true));
    let backend = ArchiveBackend {
        opens: Rc::clone(&opens),
        unify: Rc::clone(&unify),
        with_links,
    };
    let config =
        ClassConfig::new("tarish", "tar", ClassFlags::empty()).scratch_dir(scratch.path());
    ArchiveFixture {
        vfs: Vfs::new(backend, config),
        opens,
        unify,
        _scratch: scratch,
    }
}

// ── Remote (linear) backend ─────────────────────────────────────────

pub struct Listing {
    pub name: String,
    pub dir: bool,
    pub body: Vec<u8>,
}

pub fn file(name: &str, body: &[u8]) -> Listing {
    Listing {
        name: name.to_owned(),
        dir: false,
        body: body.to_vec(),
    }
}

pub fn dir(name: &str) -> Listing {
    Listing {
        name: name.to_owned(),
        dir: true,
        body: Vec::new(),
    }
}

#[derive(Default)]
pub struct RemoteBackend {
    /// Listings by full directory path; the site root is the empty key.
    pub listings: HashMap<String, Vec<Listing>>,
    pub loads: Rc<RefCell<Vec<String>>>,
    pub stored: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
    pub ttl: i64,
    /// When set, raised after every streamed chunk, as a TTY layer
    /// would on a keypress.
    pub raise_on_read: Option<InterruptFlag>,
}

impl Backend for RemoteBackend {
    type InodeData = Vec<u8>;
    type EntryData = ();
    type SuperData = ();
    type FileData = Option<std::io::Cursor<Vec<u8>>>;
    type Cookie = ();

    fn capabilities(&self) -> BackendCaps {
        BackendCaps::LINEAR | BackendCaps::FH_OPEN | BackendCaps::FILE_STORE
    }

    fn archive_same(
        &mut self,
        fs: &Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        _op: &str,
        _cookie: &(),
    ) -> ScanVerdict {
        if fs.superblock(sb).name == archive_name {
            ScanVerdict::Match
        } else {
            ScanVerdict::Other
        }
    }

    fn open_archive(
        &mut self,
        fs: &mut Dcache<Self>,
        sb: SuperId,
        archive_name: &str,
        _op: &str,
    ) -> VfsResult<()> {
        fs.superblock_mut(sb).name = archive_name.to_owned();
        let root = fs.new_inode(sb, child_stat(libc::S_IFDIR | 0o755, 0));
        fs.superblock_mut(sb).root = Some(root);
        Ok(())
    }

    fn dir_load(&mut self, fs: &mut Dcache<Self>, dir: InodeId, path: &str) -> VfsResult<()> {
        self.loads.borrow_mut().push(path.to_owned());
        let Some(kids) = self.listings.get(path) else {
            return Err(VfsError::Backend(format!("no such directory: {path:?}")));
        };
        let sb = fs.inode(dir).superblock();
        for k in kids {
            let mode = if k.dir {
                libc::S_IFDIR | 0o755
            } else {
                libc::S_IFREG | 0o644
            };
            let ino = fs.new_inode(sb, child_stat(mode, k.body.len() as u64));
            fs.inode_mut(ino).data = k.body.clone();
            let ent = fs.new_entry(&k.name, ino);
            fs.insert_entry(dir, ent);
        }
        fs.inode_mut(dir).timestamp = now_secs() + self.ttl;
        Ok(())
    }

    fn fh_open(
        &mut self,
        fs: &mut Dcache<Self>,
        fh: &mut FileHandle<Self>,
        _flags: OpenFlags,
        _mode: u32,
    ) -> VfsResult<()> {
        materialize(fs, fh.inode())
    }

    fn linear_start(
        &mut self,
        fs: &mut Dcache<Self>,
        fh: &mut FileHandle<Self>,
        offset: u64,
    ) -> VfsResult<()> {
        let mut cur = std::io::Cursor::new(fs.inode(fh.inode()).data.clone());
        cur.set_position(offset);
        fh.data = Some(cur);
        Ok(())
    }

    fn linear_read(
        &mut self,
        _fs: &mut Dcache<Self>,
        fh: &mut FileHandle<Self>,
        buf: &mut [u8],
    ) -> VfsResult<usize> {
        let cur = fh.data.as_mut().expect("stream not open");
        let n = cur.read(buf)?;
        if let Some(flag) = &self.raise_on_read {
            flag.raise();
        }
        Ok(n)
    }

    fn linear_close(&mut self, _fs: &mut Dcache<Self>, fh: &mut FileHandle<Self>) {
        fh.data = None;
    }

    fn file_store(
        &mut self,
        _fs: &mut Dcache<Self>,
        _fh: &mut FileHandle<Self>,
        full_path: &str,
        local: &Path,
    ) -> VfsResult<()> {
        let body = std::fs::read(local)?;

        // The "server" now has the file: upsert it into the listing so a
        // later reload sees it.
        let trimmed = full_path.trim_start_matches('/');
        let (dir_path, name) = match trimmed.rsplit_once('/') {
            Some(t) => t,
            None => ("", trimmed),
        };
        let list = self.listings.entry(dir_path.to_owned()).or_default();
        match list.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.body = body.clone(),
            None => list.push(file(name, &body)),
        }

        self.stored.borrow_mut().push((full_path.to_owned(), body));
        Ok(())
    }
}

pub struct RemoteFixture {
    pub vfs: Vfs<RemoteBackend>,
    pub loads: Rc<RefCell<Vec<String>>>,
    pub stored: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
    _scratch: tempfile::TempDir,
}

pub fn remote(ttl: i64) -> RemoteFixture {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let loads = Rc::new(RefCell::new(Vec::new()));
    let stored = Rc::new(RefCell::new(Vec::new()));

    let mut listings = HashMap::new();
    listings.insert(String::new(), vec![file("f", b"abc"), dir("u")]);
    listings.insert(
        "u/s/l".to_owned(),
        vec![file("l1", b"one"), file("l2", b"two")],
    );

    let backend = RemoteBackend {
        listings,
        loads: Rc::clone(&loads),
        stored: Rc::clone(&stored),
        ttl,
        raise_on_read: None,
    };
    let config =
        ClassConfig::new("ftpish", "ftp", ClassFlags::REMOTE).scratch_dir(scratch.path());
    RemoteFixture {
        vfs: Vfs::new(backend, config),
        loads,
        stored,
        _scratch: scratch,
    }
}

// ── Stamp recorder ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct StampLog(pub Rc<RefCell<Vec<(&'static str, u64)>>>);

impl StampTracker for StampLog {
    fn stamp_create(&mut self, sb: SuperId) {
        self.0.borrow_mut().push(("stamp", sb.0));
    }

    fn rmstamp(&mut self, sb: SuperId) {
        self.0.borrow_mut().push(("rm", sb.0));
    }
}
