//! Namespace mount table: union directories and bind/mount bookkeeping.
//!
//! A `FileID` is a content-addressed identity for a file on some server
//! (its device number plus its qid). The mount table records, for each
//! `FileID` that has something mounted under it, the chain of replacement
//! `FileID`s a walk should try in order (a union directory), indexed both
//! forward (`children`, what's mounted where) and backward (`parents`,
//! where does this FileID appear as a mount target) so that an upward `..`
//! walk can find its way back out of a mount point, plus per-device edge
//! lists (`from_dev`/`to_dev`) used when an entire client disconnects and
//! every mount it contributed must be torn down together.
//!
//! All four indices live behind one coarse `tokio::sync::Mutex`: mutations
//! are rare and small compared to the walks that read them, and a single
//! lock avoids the lock-ordering hazards a finer-grained scheme would
//! invite (this table is always the outermost lock acquired, before any
//! per-client or per-fid lock).

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::fcall::Qid;

/// Content-addressed identity for a file: which server (`dev`) and which
/// qid on that server. The top bit of `typ` is the `NOREMAP` marker (masked
/// out by `unmapped` for comparisons that must ignore it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId {
    pub typ: u16,
    pub dev: u32,
    pub qid: Qid,
}

/// Top bit of `FileId.typ`: "do not re-enter the mount table at this node".
pub const FILEID_NOREMAP: u16 = 0x8000;

impl FileId {
    /// This identity with the `NOREMAP` marker bit cleared, for comparisons
    /// that must ignore it (e.g. matching a walked qid against a mount
    /// table entry regardless of how that entry was seeded).
    pub fn unmapped(self) -> FileId {
        FileId { typ: self.typ & !FILEID_NOREMAP, ..self }
    }
}

/// How a mount's replacement chain is ordered relative to what was already
/// mounted there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountOrder {
    /// Replace anything already mounted at this point.
    Repl,
    /// Try the new mount before the existing chain.
    Before,
    /// Try the new mount after the existing chain.
    After,
}

/// Bit on a mount edge that stops a self-referential mount from recursing
/// into itself when seeding a union chain (e.g. binding a directory onto
/// itself to establish the head of a union without looping forever).
pub const NOREMAP: u32 = 1;
/// Mount-local policy bit: files created in this directory should land in
/// this union member.
pub const MCREATE: u32 = 0x10;
/// Mount-local policy bit: this union member's contents may be cached.
pub const MCACHE: u32 = 0x20;
/// Any flag at or above this value is rejected by `mount`.
pub const MMASK: u32 = 0x40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Edge {
    to: FileId,
    flags: u32,
}

impl Edge {
    fn may_create(&self) -> bool {
        self.flags & MCREATE != 0
    }

    fn is_noremap(&self) -> bool {
        self.flags & NOREMAP != 0
    }
}

/// A resolved union-chain member, as returned to callers walking through a
/// mount point: the target file plus the policy bits carried on its edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Child {
    pub file: FileId,
    pub may_create: bool,
    pub may_cache: bool,
    pub noremap: bool,
}

struct Inner {
    /// What replaces a given FileID when walked: the union chain, in order.
    children: HashMap<FileId, Vec<Edge>>,
    /// Inverse of `children`: everywhere a FileID appears as a replacement.
    parents: HashMap<FileId, Vec<FileId>>,
    /// `(parent, child)` edges whose source (`parent`) lives on a device.
    from_dev: HashMap<u32, Vec<(FileId, FileId)>>,
    /// `(parent, child)` edges whose target (`child`) lives on a device.
    to_dev: HashMap<u32, Vec<(FileId, FileId)>>,
    /// The namespace's root device: never cascaded out as "unreachable".
    root_dev: Option<u32>,
    generation: u64,
}

/// The namespace's mount table.
pub struct MountTable {
    inner: Mutex<Inner>,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    pub fn new() -> MountTable {
        MountTable {
            inner: Mutex::new(Inner {
                children: HashMap::new(),
                parents: HashMap::new(),
                from_dev: HashMap::new(),
                to_dev: HashMap::new(),
                root_dev: None,
                generation: 0,
            }),
        }
    }

    /// Current mount-table generation, bumped on every structural change.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Record which device is the namespace root, so its last incoming
    /// mount edge disappearing is never mistaken for "device unreachable".
    pub async fn set_root_dev(&self, dev: u32) {
        self.inner.lock().await.root_dev = Some(dev);
    }

    /// Mount `new` under `old`, with the given ordering and policy flags
    /// (`NOREMAP` plus the external `MCREATE`/`MCACHE` bits). Rejects a
    /// mount that would make `old` transitively reachable from `new` via
    /// the existing `children` edges, which would create a cycle a walk
    /// could never terminate out of.
    pub async fn mount(
        &self,
        old: FileId,
        new: FileId,
        order: MountOrder,
        flags: u32,
    ) -> Result<()> {
        if flags >= MMASK {
            return Err(Error::Namespace(format!("mount flags {:#x} out of range", flags)));
        }

        let mut inner = self.inner.lock().await;

        let old_dev_reachable = inner.root_dev == Some(old.dev)
            || inner.from_dev.contains_key(&old.dev)
            || inner.to_dev.contains_key(&old.dev);
        if !old_dev_reachable {
            return Err(Error::No(crate::error::errno::ENOSYS));
        }

        if reaches(&inner.children, new, old) {
            return Err(Error::Namespace("mount would create a cycle".into()));
        }

        let self_replace = order == MountOrder::Repl && old.unmapped() == new.unmapped();
        let edge_flags = if self_replace { flags | NOREMAP } else { flags };

        match order {
            MountOrder::Repl => {
                if let Some(old_chain) = inner.children.remove(&old) {
                    for edge in old_chain {
                        teardown_pair(&mut inner, old, edge.to);
                    }
                }
                link(&mut inner, old, Edge { to: new, flags: edge_flags });
            }
            MountOrder::Before | MountOrder::After => {
                if !inner.children.contains_key(&old) {
                    let seed = Edge {
                        to: FileId { typ: old.typ | FILEID_NOREMAP, ..old },
                        flags: NOREMAP | MCREATE,
                    };
                    link(&mut inner, old, seed);
                }
                // Collapse a duplicate occurrence of `new` already in the chain.
                if let Some(chain) = inner.children.get(&old) {
                    if let Some(dup) = chain.iter().find(|e| e.to.unmapped() == new.unmapped()) {
                        let dup_to = dup.to;
                        unlink(&mut inner, old, dup_to);
                    }
                }
                let edge = Edge { to: new, flags: edge_flags };
                match order {
                    MountOrder::Before => insert_front(&mut inner, old, edge),
                    MountOrder::After => link(&mut inner, old, edge),
                    MountOrder::Repl => unreachable!(),
                }
            }
        }

        inner.generation += 1;
        Ok(())
    }

    /// Remove one entry (`new`) from `old`'s union chain, or the whole
    /// chain when `new` is `None`, cascading into anything that mount
    /// transitively made unreachable.
    pub async fn unmount(&self, old: FileId, new: Option<FileId>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(chain) = inner.children.get(&old) else {
            return Err(Error::No(crate::error::errno::ENOENT));
        };

        let work: Vec<(FileId, FileId)> = match new {
            Some(target) => {
                let found = chain.iter().any(|e| e.to == target);
                if !found {
                    return Err(Error::No(crate::error::errno::ENOENT));
                }
                vec![(old, target)]
            }
            None => chain.iter().map(|e| (old, e.to)).collect(),
        };

        run_teardown(&mut inner, work);
        inner.generation += 1;
        Ok(())
    }

    /// The union chain mounted at `id`, if any, in try-order, with each
    /// member's policy bits resolved.
    pub async fn children(&self, id: FileId) -> Vec<Child> {
        self.inner
            .lock()
            .await
            .children
            .get(&id)
            .map(|c| {
                c.iter()
                    .map(|e| Child {
                        file: e.to,
                        may_create: e.may_create(),
                        may_cache: e.flags & MCACHE != 0,
                        noremap: e.is_noremap(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All mount points that have `id` appearing somewhere in their union
    /// chain, used to walk back up through a mount boundary on `..`.
    pub async fn parents(&self, id: FileId) -> Vec<FileId> {
        self.inner.lock().await.parents.get(&id).cloned().unwrap_or_default()
    }

    /// Whether an edge from `old` to `new` carries `NOREMAP`.
    pub async fn is_noremap(&self, old: FileId, new: FileId) -> bool {
        let inner = self.inner.lock().await;
        inner
            .children
            .get(&old)
            .map(|chain| chain.iter().any(|e| e.to == new && e.is_noremap()))
            .unwrap_or(false)
    }

    /// Tear down every mount edge whose source or target lives on `dev`,
    /// used when a client disconnects: both the edges this device
    /// contributed as a parent (something mounted under one of its
    /// directories) and the edges where this device was itself mounted
    /// as a child somewhere else.
    pub async fn teardown_device(&self, dev: u32) {
        let mut inner = self.inner.lock().await;

        let mut work = Vec::new();
        if let Some(pairs) = inner.from_dev.get(&dev).cloned() {
            work.extend(pairs);
        }
        if let Some(pairs) = inner.to_dev.get(&dev).cloned() {
            work.extend(pairs);
        }
        run_teardown(&mut inner, work);
        inner.generation += 1;
    }
}

fn link(inner: &mut Inner, parent: FileId, edge: Edge) {
    inner.children.entry(parent).or_default().push(edge);
    inner.parents.entry(edge.to).or_default().push(parent);
    inner.from_dev.entry(parent.dev).or_default().push((parent, edge.to));
    inner.to_dev.entry(edge.to.dev).or_default().push((parent, edge.to));
}

fn insert_front(inner: &mut Inner, parent: FileId, edge: Edge) {
    inner.children.entry(parent).or_default().insert(0, edge);
    inner.parents.entry(edge.to).or_default().push(parent);
    inner.from_dev.entry(parent.dev).or_default().push((parent, edge.to));
    inner.to_dev.entry(edge.to.dev).or_default().push((parent, edge.to));
}

/// Unlink one `(parent, child)` edge from every index without cascading.
fn unlink(inner: &mut Inner, parent: FileId, child: FileId) {
    if let Some(chain) = inner.children.get_mut(&parent) {
        chain.retain(|e| e.to != child);
        if chain.is_empty() {
            inner.children.remove(&parent);
        }
    }
    if let Some(ps) = inner.parents.get_mut(&child) {
        if let Some(pos) = ps.iter().position(|&p| p == parent) {
            ps.remove(pos);
        }
        if ps.is_empty() {
            inner.parents.remove(&child);
        }
    }
    if let Some(v) = inner.from_dev.get_mut(&parent.dev) {
        if let Some(pos) = v.iter().position(|&(p, c)| p == parent && c == child) {
            v.remove(pos);
        }
    }
    if let Some(v) = inner.to_dev.get_mut(&child.dev) {
        if let Some(pos) = v.iter().position(|&(p, c)| p == parent && c == child) {
            v.remove(pos);
        }
    }
}

/// Remove a single edge and cascade into whatever it made unreachable, per
/// spec.md's teardown algorithm (one step, no work-stack bookkeeping — used
/// by `mount`'s replace-order eviction of a prior chain).
fn teardown_pair(inner: &mut Inner, parent: FileId, child: FileId) {
    run_teardown(inner, vec![(parent, child)]);
}

/// The core teardown algorithm (spec.md §4.5.4): given a work-stack of
/// `(parent, child)` edges to remove, unlink each one and, if removing it
/// leaves `child`'s device with no more incoming edges, cascade into the
/// edges that device itself originates (the device is now unreachable).
fn run_teardown(inner: &mut Inner, mut work: Vec<(FileId, FileId)>) {
    while let Some((p, c)) = work.pop() {
        unlink(inner, p, c);

        let still_reachable = inner.to_dev.get(&c.dev).map(|v| !v.is_empty()).unwrap_or(false);
        if !still_reachable && inner.root_dev != Some(c.dev) {
            if let Some(out_edges) = inner.from_dev.remove(&c.dev) {
                work.extend(out_edges);
            }
        }
    }
}

fn reaches(children: &HashMap<FileId, Vec<Edge>>, from: FileId, to: FileId) -> bool {
    let mut stack = vec![from];
    let mut seen = std::collections::HashSet::new();
    while let Some(cur) = stack.pop() {
        if cur.unmapped() == to.unmapped() {
            return true;
        }
        if !seen.insert(cur) {
            continue;
        }
        if let Some(chain) = children.get(&cur) {
            stack.extend(chain.iter().map(|e| e.to));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(dev: u32, path: u64) -> FileId {
        FileId { typ: 0, dev, qid: Qid { path, ..Qid::default() } }
    }

    fn children_files(table: &MountTable, id: FileId) -> Vec<FileId> {
        futures::executor::block_on(table.children(id)).into_iter().map(|c| c.file).collect()
    }

    #[tokio::test]
    async fn mount_and_lookup_children() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let old = fid(1, 1);
        let new = fid(2, 1);
        table.mount(old, new, MountOrder::Repl, 0).await.unwrap();
        assert_eq!(children_files(&table, old), vec![new]);
        assert_eq!(table.parents(new).await, vec![old]);
    }

    #[tokio::test]
    async fn before_order_prepends() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let old = fid(1, 1);
        let a = fid(2, 1);
        let b = fid(3, 1);
        table.mount(old, a, MountOrder::Repl, 0).await.unwrap();
        table.mount(old, b, MountOrder::Before, 0).await.unwrap();
        assert_eq!(children_files(&table, old), vec![b, a]);
    }

    #[tokio::test]
    async fn union_mount_seeds_chain_with_parent() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let old = fid(1, 1);
        let new = fid(2, 1);
        table.mount(old, new, MountOrder::After, 0).await.unwrap();
        let kids = table.children(old).await;
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].file.unmapped(), old.unmapped());
        assert!(kids[0].noremap);
        assert_eq!(kids[1].file, new);
    }

    #[tokio::test]
    async fn rejects_cyclic_mount() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let a = fid(1, 1);
        let b = fid(2, 1);
        table.mount(a, b, MountOrder::Repl, 0).await.unwrap();
        assert!(table.mount(b, a, MountOrder::Repl, 0).await.is_err());
    }

    #[tokio::test]
    async fn rejects_flags_above_mmask() {
        let table = MountTable::new();
        let a = fid(1, 1);
        let b = fid(2, 1);
        assert!(table.mount(a, b, MountOrder::Repl, MMASK).await.is_err());
    }

    #[tokio::test]
    async fn unmount_cascades_to_nested_mounts() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let a = fid(1, 1);
        let b = fid(2, 1);
        let c = fid(3, 1);
        table.mount(a, b, MountOrder::Repl, 0).await.unwrap();
        table.mount(b, c, MountOrder::Repl, 0).await.unwrap();
        table.unmount(a, None).await.unwrap();
        assert!(children_files(&table, a).is_empty());
        assert!(children_files(&table, b).is_empty());
    }

    #[tokio::test]
    async fn teardown_device_removes_its_mounts() {
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let a = fid(1, 1);
        let b = fid(2, 1);
        table.mount(a, b, MountOrder::Repl, 0).await.unwrap();
        table.teardown_device(2).await;
        assert!(children_files(&table, a).is_empty());
    }

    #[tokio::test]
    async fn teardown_device_as_parent_cascades_children() {
        // a/b mounts server on dev 2 at root; dev2's root then has dev3
        // mounted under it. Detaching dev 2 must also drop dev 3.
        let table = MountTable::new();
        table.set_root_dev(1).await;
        let a = fid(1, 1);
        let b = fid(2, 1);
        let c = fid(3, 1);
        table.mount(a, b, MountOrder::Repl, 0).await.unwrap();
        table.mount(b, c, MountOrder::Repl, 0).await.unwrap();
        table.teardown_device(2).await;
        assert!(children_files(&table, a).is_empty());
        assert!(children_files(&table, b).is_empty());
    }
}
