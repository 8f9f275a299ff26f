#![allow(missing_docs, clippy::unwrap_used)]
//! Linear-mode resolution: fingerprint root, lazy loading, expiry.

mod common;

use dcachefs::{now_secs, SetCtl, VfsError};

use common::remote;

#[test]
fn listing_loads_once_within_ttl() {
    let mut f = remote(60);

    let mut h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    let mut names = Vec::new();
    while let Some(ent) = f.vfs.readdir(&mut h) {
        names.push(ent.name);
    }
    f.vfs.closedir(h);
    assert_eq!(names, ["l1", "l2"]);
    assert_eq!(f.loads.borrow().as_slice(), ["u/s/l"]);

    // A second resolution inside the TTL serves the cache.
    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    f.vfs.closedir(h);
    assert_eq!(f.loads.borrow().len(), 1);
}

#[test]
fn expired_listing_is_reloaded() {
    let mut f = remote(60);

    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    let first = h.inode();
    f.vfs.closedir(h);
    assert_eq!(f.loads.borrow().len(), 1);

    // Age the fingerprint past its deadline.
    f.vfs.state_mut().inode_mut(first).timestamp = now_secs() - 1;

    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    let second = h.inode();
    f.vfs.closedir(h);
    assert_eq!(f.loads.borrow().len(), 2);
    assert_ne!(first, second, "the stale entry must have been freed");
}

#[test]
fn same_inode_within_ttl_fresh_after_flush() {
    let mut f = remote(60);

    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    let first = h.inode();
    f.vfs.closedir(h);
    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    assert_eq!(h.inode(), first);
    f.vfs.closedir(h);

    f.vfs.setctl("site#ftp", SetCtl::Flush).unwrap();

    let h = f.vfs.opendir("site#ftp/u/s/l").unwrap();
    assert_ne!(h.inode(), first);
    f.vfs.closedir(h);
    assert_eq!(f.loads.borrow().len(), 2);
}

#[test]
fn site_root_is_a_fingerprint_like_any_other() {
    let mut f = remote(60);

    let mut h = f.vfs.opendir("site#ftp").unwrap();
    let mut names = Vec::new();
    while let Some(ent) = f.vfs.readdir(&mut h) {
        names.push(ent.name);
    }
    f.vfs.closedir(h);
    assert_eq!(names, ["f", "u"]);
    assert_eq!(f.loads.borrow().as_slice(), [""]);
}

#[test]
fn leaf_resolves_through_its_parent_listing() {
    let mut f = remote(60);

    let st = f.vfs.stat("site#ftp/u/s/l/l1").unwrap();
    assert!(st.is_regular());
    assert_eq!(st.size, 3);
    // Only the parent fingerprint was loaded, not every ancestor.
    assert_eq!(f.loads.borrow().as_slice(), ["u/s/l"]);
}

#[test]
fn failed_load_leaves_no_residue() {
    let mut f = remote(60);

    let stats_inodes = f.vfs.state().stats().total_inodes();
    let stats_entries = f.vfs.state().stats().total_entries();

    assert!(matches!(
        f.vfs.opendir("site#ftp/no/such/dir"),
        Err(VfsError::Backend(_))
    ));

    // The provisional fingerprint entry and inode were torn down; only
    // the superblock root from the mount remains.
    assert_eq!(f.vfs.state().stats().total_inodes(), stats_inodes + 1);
    assert_eq!(f.vfs.state().stats().total_entries(), stats_entries);
}

#[test]
fn want_stale_preserves_the_tree() {
    let mut f = remote(60);

    // Materialize the root listing and remember the superblock root.
    f.vfs.chdir("site#ftp").unwrap();
    let sb = f.vfs.getid("site#ftp").unwrap();
    let root_before = f.vfs.state().superblock(sb).root;

    assert!(f.vfs.setctl("site#ftp", SetCtl::StaleData(true)).unwrap());
    f.vfs.invalidate(sb);
    assert_eq!(f.vfs.state().superblock(sb).root, root_before);

    // Clearing the wish also invalidates: the root is replaced.
    assert!(f.vfs.setctl("site#ftp", SetCtl::StaleData(false)).unwrap());
    assert_ne!(f.vfs.state().superblock(sb).root, root_before);
}
