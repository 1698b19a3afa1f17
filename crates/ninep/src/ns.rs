//! Per-process namespace: attach points, the mount table, and the
//! high-level walk/open/create/stat/remove operations built on top of a
//! raw [`crate::client::Client`] connection.
//!
//! A [`Fid`] here is not the wire fid (a bare `u32`); it is a namespace
//! handle bundling the client it was walked through, the wire fid on that
//! client, the qid it resolved to, and the logical path that got it there
//! (`Cname`), so that `Cd`/`LsMounts` have something printable and
//! `FWalkTo` has something to re-walk when a union directory needs the
//! next candidate tried.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use tokio::sync::Mutex;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::fcall::{dm, om, FCall, Qid, Stat, NOFID};
use crate::mount::{Child, FileId, MountOrder, MountTable, FILEID_NOREMAP, NOREMAP};
use crate::path::{self, Path, Root};

const WALK_LIMIT: usize = 16;

fn file_id(dev: u32, qid: Qid) -> FileId {
    FileId { typ: 0, dev, qid }
}

/// A namespace handle to a remote file: the client it lives on, the wire
/// fid, and enough of its identity to re-walk or print it.
#[derive(Clone)]
pub struct Fid {
    client: Client,
    fid: u32,
    dev: u32,
    qid: Qid,
    path: Path,
    /// The mount point this fid currently stands in for, if it was reached
    /// by resolving into a union chain — lets a later failed step retry
    /// the next sibling in that chain (spec.md's `MUntil`).
    union_at: Option<FileId>,
    may_create: bool,
    may_cache: bool,
}

impl Fid {
    pub fn qid(&self) -> Qid {
        self.qid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render this fid's identity the way `LsMounts`/dump tooling wants:
    /// `dev:qid.path[.version]`, prefixed with `*` when it carries
    /// `NOREMAP`.
    pub fn describe(&self) -> String {
        let star = if self.file_id().typ & FILEID_NOREMAP != 0 { "*" } else { "" };
        format!("{}{}:{:#x}.{}", star, self.dev, self.qid.path, self.qid.version)
    }

    fn file_id(&self) -> FileId {
        file_id(self.dev, self.qid)
    }

    /// Allocate a new wire fid aliasing the same file on the same server
    /// (a zero-name `Twalk`), used to fork a fid before an operation that
    /// mutates server-side state (open, create, remove).
    async fn clone_fid(&self) -> Result<Fid> {
        let newfid = self.client.new_fid().await;
        let reply = self
            .client
            .rpc(FCall::TWalk { fid: self.fid, newfid, wnames: Vec::new() })
            .await;
        match reply {
            Ok(FCall::RWalk { .. }) => Ok(Fid { fid: newfid, ..self.clone() }),
            Ok(_) => {
                self.client.release_fid(newfid).await;
                Err(Error::Protocol("expected Rwalk".into()))
            }
            Err(e) => {
                self.client.release_fid(newfid).await;
                Err(e)
            }
        }
    }

    /// Read the whole file from offset 0 to EOF, issuing as many `Tread`s
    /// as `msize` requires.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let iounit = self.client.msize().saturating_sub(crate::fcall::IOHDRSZ);
        let mut out = Vec::new();
        let mut offset = 0u64;
        loop {
            let reply = self
                .client
                .rpc(FCall::TRead { fid: self.fid, offset, count: iounit })
                .await?;
            let data = match reply {
                FCall::RRead { data } => data.0,
                _ => return Err(Error::Protocol("expected Rread".into())),
            };
            if data.is_empty() {
                break;
            }
            offset += data.len() as u64;
            out.extend_from_slice(&data);
            if (data.len() as u32) < iounit {
                break;
            }
        }
        Ok(out)
    }

    /// Write the whole buffer starting at offset 0, issuing as many
    /// `Twrite`s as `msize` requires.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let iounit = self.client.msize().saturating_sub(crate::fcall::IOHDRSZ) as usize;
        let mut offset = 0u64;
        for chunk in data.chunks(iounit.max(1)) {
            let reply = self
                .client
                .rpc(FCall::TWrite {
                    fid: self.fid,
                    offset,
                    data: crate::fcall::Data(chunk.to_vec()),
                })
                .await?;
            let written = match reply {
                FCall::RWrite { count } => count,
                _ => return Err(Error::Protocol("expected Rwrite".into())),
            };
            offset += written as u64;
        }
        Ok(())
    }

    /// Clunk this fid, releasing the server-side handle and returning the
    /// wire fid to the client's pool.
    pub async fn clunk(self) -> Result<()> {
        self.client.rpc(FCall::TClunk { fid: self.fid }).await?;
        self.client.release_fid(self.fid).await;
        Ok(())
    }
}

struct Attach {
    client: Client,
    root: Fid,
}

/// A process-wide namespace: one mount table, the set of servers attached
/// into it, and the caller's current directory.
pub struct Namespace {
    mounts: MountTable,
    attaches: Mutex<HashMap<u32, Attach>>,
    /// Mount points keyed by their own (unmapped) `FileID`, so an upward
    /// `..` walk that lands back on a mounted-over directory can recover a
    /// usable fid for the real parent instead of falling off the edge of
    /// the mounted server's own root.
    mount_points: Mutex<HashMap<FileId, Fid>>,
    next_dev: AtomicU32,
    root: Mutex<Option<Fid>>,
    cwd: Mutex<Option<Fid>>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace {
            mounts: MountTable::new(),
            attaches: Mutex::new(HashMap::new()),
            mount_points: Mutex::new(HashMap::new()),
            next_dev: AtomicU32::new(1),
            root: Mutex::new(None),
            cwd: Mutex::new(None),
        }
    }

    /// Attach to a freshly connected client under `aname`, claiming the
    /// next device number, and return a `Fid` for the attach root. The
    /// first attach becomes both the namespace root and the initial
    /// current directory.
    pub async fn attach(&self, client: Client, uname: &str, aname: &str) -> Result<Fid> {
        let dev = self.next_dev.fetch_add(1, Ordering::SeqCst);
        let fid = client.new_fid().await;
        let reply = client
            .rpc(FCall::TAttach {
                fid,
                afid: NOFID,
                uname: uname.to_owned(),
                aname: aname.to_owned(),
                n_uname: crate::fcall::NONUNAME,
            })
            .await?;
        let qid = match reply {
            FCall::RAttach { qid } => qid,
            _ => return Err(Error::Protocol("expected Rattach".into())),
        };

        let root = Fid {
            client: client.clone(),
            fid,
            dev,
            qid,
            path: Path::rooted(Vec::new()),
            union_at: None,
            may_create: true,
            may_cache: false,
        };

        self.attaches.lock().await.insert(dev, Attach { client, root: root.clone() });

        let mut root_slot = self.root.lock().await;
        if root_slot.is_none() {
            *root_slot = Some(root.clone());
            self.mounts.set_root_dev(dev).await;
        }
        drop(root_slot);

        let mut cwd = self.cwd.lock().await;
        if cwd.is_none() {
            *cwd = Some(root.clone());
        }

        debug!("attached dev={} aname={}", dev, aname);
        Ok(root)
    }

    /// Detach a previously attached device, tearing down every mount that
    /// originated from or targeted it.
    pub async fn detach(&self, dev: u32) {
        self.attaches.lock().await.remove(&dev);
        self.mounts.teardown_device(dev).await;
    }

    async fn cwd_fid(&self) -> Result<Fid> {
        self.cwd
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Namespace("namespace has no attach point yet".into()))
    }

    async fn root_fid(&self) -> Result<Fid> {
        self.root
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Namespace("namespace has no attach point yet".into()))
    }

    /// Walk `path` from `base` (or the current directory, when `base` is
    /// `None`), following a plain remote walk with no mount resolution.
    pub async fn fwalk(&self, base: Option<&Fid>, p: &Path) -> Result<Fid> {
        let base = match base {
            Some(b) => b.clone(),
            None => self.cwd_fid().await?,
        };
        if matches!(p.root, Root::Device) {
            return Err(Error::Namespace("device-relative paths are reserved, not resolvable".into()));
        }
        let base = if matches!(p.root, Root::Rooted) { self.root_fid().await? } else { base };
        self.walk_elements(base, &p.elements).await
    }

    /// Walk `names` from `base` in blocks of at most 16 (the protocol
    /// limit per `Twalk`), with no mount-table resolution. The logical
    /// path is extended with `path::path_join`'s leading-`..`-collapsing
    /// rule.
    async fn walk_elements(&self, base: Fid, names: &[String]) -> Result<Fid> {
        if names.is_empty() {
            return Ok(base);
        }
        let mut cur = base;
        for chunk in names.chunks(WALK_LIMIT) {
            cur = self.walk_block(cur, chunk).await?;
        }
        Ok(cur)
    }

    /// Issue one `Twalk` for up to 16 names, with no mount resolution.
    async fn walk_block(&self, base: Fid, chunk: &[String]) -> Result<Fid> {
        let newfid = base.client.new_fid().await;
        let reply = base
            .client
            .rpc(FCall::TWalk { fid: base.fid, newfid, wnames: chunk.to_vec() })
            .await;
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                base.client.release_fid(newfid).await;
                return Err(e);
            }
        };
        let wqids = match reply {
            FCall::RWalk { wqids } => wqids,
            _ => {
                base.client.release_fid(newfid).await;
                return Err(Error::Protocol("expected Rwalk".into()));
            }
        };
        if wqids.len() != chunk.len() {
            base.client.release_fid(newfid).await;
            return Err(Error::No(crate::error::errno::ENOENT));
        }
        let qid = *wqids.last().unwrap_or(&base.qid);
        let elements = path::path_join(&base.path.elements, chunk);
        Ok(Fid {
            client: base.client.clone(),
            fid: newfid,
            dev: base.dev,
            qid,
            path: Path { root: base.path.root, device: base.path.device.clone(), elements, must_be_dir: false },
            union_at: None,
            may_create: base.may_create,
            may_cache: base.may_cache,
        })
    }

    /// Walk `path`, resolving through the mount table at every step: `..`
    /// crosses mount boundaries upward via the `parents` index, a mount
    /// boundary found partway through a walked block switches to the
    /// target device for the remaining elements, and a step that fails on
    /// a union member retries the next member in try-order.
    pub async fn fwalk_to(&self, base: Option<&Fid>, p: &Path) -> Result<Fid> {
        if matches!(p.root, Root::Device) {
            return Err(Error::Namespace("device-relative paths are reserved, not resolvable".into()));
        }

        let mut cur = match p.root {
            Root::Rooted => self.root_fid().await?,
            Root::Device => unreachable!(),
            Root::Relative => match base {
                Some(b) => b.clone(),
                None => self.cwd_fid().await?,
            },
        };

        let mut remaining = &p.elements[..];
        while !remaining.is_empty() {
            if remaining[0] == ".." {
                cur = self.walk_up(cur).await?;
                remaining = &remaining[1..];
                continue;
            }
            let run_len = remaining.iter().take_while(|e| e.as_str() != "..").count().min(WALK_LIMIT);
            let (landed, consumed) = self.step_through_mounts(cur, &remaining[..run_len]).await?;
            cur = landed;
            remaining = &remaining[consumed..];
        }
        Ok(cur)
    }

    /// Walk one forward run of names (no `..`), switching at the first
    /// mount boundary encountered in the returned qids, and retrying the
    /// next union sibling of `base` if the whole run fails.
    async fn step_through_mounts(&self, base: Fid, run: &[String]) -> Result<(Fid, usize)> {
        let mut candidate = base;
        loop {
            match self.walk_block_with_mount_detection(candidate.clone(), run).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if let Some(mountpoint) = candidate.union_at {
                        if let Some((sibling, _)) = self.next_union_sibling(mountpoint, &candidate).await {
                            candidate = sibling;
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn walk_block_with_mount_detection(
        &self,
        base: Fid,
        run: &[String],
    ) -> Result<(Fid, usize)> {
        let newfid = base.client.new_fid().await;
        let reply = base
            .client
            .rpc(FCall::TWalk { fid: base.fid, newfid, wnames: run.to_vec() })
            .await;
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                base.client.release_fid(newfid).await;
                return Err(e);
            }
        };
        let wqids = match reply {
            FCall::RWalk { wqids } => wqids,
            _ => {
                base.client.release_fid(newfid).await;
                return Err(Error::Protocol("expected Rwalk".into()));
            }
        };
        if wqids.is_empty() {
            base.client.release_fid(newfid).await;
            return Err(Error::No(crate::error::errno::ENOENT));
        }

        for (i, wqid) in wqids.iter().enumerate() {
            let landing = file_id(base.dev, *wqid);
            let children = self.mounts.children(landing).await;
            if children.is_empty() {
                continue;
            }
            // Crossed a mount boundary after consuming i+1 names of this
            // run: the rest of this Twalk's result lives on the wrong
            // server and is discarded.
            base.client.rpc(FCall::TClunk { fid: newfid }).await.ok();
            base.client.release_fid(newfid).await;

            let elements = path::path_join(&base.path.elements, &run[..=i]);
            let landed_path = Path {
                root: base.path.root,
                device: base.path.device.clone(),
                elements,
                must_be_dir: false,
            };
            let mount_fid = self.resolve_children(landing, children, landed_path).await?;
            return Ok((mount_fid, i + 1));
        }

        if wqids.len() != run.len() {
            base.client.release_fid(newfid).await;
            return Err(Error::No(crate::error::errno::ENOENT));
        }

        let qid = *wqids.last().unwrap();
        let elements = path::path_join(&base.path.elements, run);
        Ok((
            Fid {
                client: base.client.clone(),
                fid: newfid,
                dev: base.dev,
                qid,
                path: Path { root: base.path.root, device: base.path.device.clone(), elements, must_be_dir: false },
                union_at: None,
                may_create: base.may_create,
                may_cache: base.may_cache,
            },
            run.len(),
        ))
    }

    /// Try each member of a union chain in order until one yields a usable
    /// fid (its attach point is still reachable); returns the first that
    /// works, tagged with `union_at` so later failed steps can retry the
    /// next sibling.
    async fn resolve_children(&self, mountpoint: FileId, children: Vec<Child>, path: Path) -> Result<Fid> {
        let attaches = self.attaches.lock().await;
        for child in &children {
            if let Some(attach) = attaches.get(&child.file.dev) {
                return Ok(Fid {
                    client: attach.client.clone(),
                    fid: attach.root.fid,
                    dev: child.file.dev,
                    qid: child.file.qid,
                    path,
                    union_at: Some(mountpoint),
                    may_create: child.may_create,
                    may_cache: child.may_cache,
                });
            }
        }
        Err(Error::Namespace("mounted device is no longer attached".into()))
    }

    /// Find the union sibling that comes after `cur` in `mountpoint`'s
    /// chain, skipping `NOREMAP` seed entries, and resolve it to a fid.
    async fn next_union_sibling(&self, mountpoint: FileId, cur: &Fid) -> Option<(Fid, Child)> {
        let chain = self.mounts.children(mountpoint).await;
        let pos = chain.iter().position(|c| c.file.unmapped() == cur.file_id().unmapped())?;
        for child in chain.iter().skip(pos + 1) {
            if child.noremap {
                continue;
            }
            let attaches = self.attaches.lock().await;
            if let Some(attach) = attaches.get(&child.file.dev) {
                let fid = Fid {
                    client: attach.client.clone(),
                    fid: attach.root.fid,
                    dev: child.file.dev,
                    qid: child.file.qid,
                    path: cur.path.clone(),
                    union_at: Some(mountpoint),
                    may_create: child.may_create,
                    may_cache: child.may_cache,
                };
                return Some((fid, *child));
            }
        }
        None
    }

    /// Resolve `..` across a mount boundary: if `cur` is the root of a
    /// subtree some directory mounts (`CheckParent`), continue from that
    /// registered mount-point fid instead of walking `..` on `cur`'s own
    /// server, which would only retrace the mounted server's own tree.
    async fn walk_up(&self, cur: Fid) -> Result<Fid> {
        let candidates = self.mounts.parents(cur.file_id()).await;
        for parent_id in candidates {
            if let Some(parent_fid) = self.mount_points.lock().await.get(&parent_id.unmapped()).cloned() {
                return Ok(parent_fid);
            }
        }
        self.walk_elements(cur, std::slice::from_ref(&"..".to_owned())).await
    }

    /// Open a walked fid with the given 9P open mode, retrying the next
    /// union sibling if `target` is a mount-chain member and opening it
    /// fails.
    pub async fn fopen(&self, target: &Fid, mode: u8) -> Result<Fid> {
        let mut candidate = target.clone();
        loop {
            let clone = candidate.clone_fid().await?;
            match clone.client.rpc(FCall::TOpen { fid: clone.fid, mode }).await {
                Ok(FCall::ROpen { qid, .. }) => return Ok(Fid { qid, ..clone }),
                Ok(_) => return Err(Error::Protocol("expected Ropen".into())),
                Err(e) => {
                    clone.client.release_fid(clone.fid).await;
                    match candidate.union_at {
                        Some(mp) => match self.next_union_sibling(mp, &candidate).await {
                            Some((next, _)) => candidate = next,
                            None => return Err(e),
                        },
                        None => return Err(e),
                    }
                }
            }
        }
    }

    /// Create `name` under the directory fid `dir`, with the given
    /// permission bits and open mode. If `dir` is itself a mount point
    /// with a union chain, the first member with `MayCreate` set is tried
    /// first, per spec.md's `Create` rule; otherwise `dir` itself is used.
    pub async fn fcreate(&self, dir: &Fid, name: &str, perm: u32, mode: u8) -> Result<Fid> {
        let chain = self.mounts.children(dir.file_id()).await;
        let preferred = chain.iter().find(|c| c.may_create);

        let target = match preferred {
            Some(child) => {
                let path = dir.path.clone();
                self.resolve_children(dir.file_id(), vec![*child], path).await?
            }
            None => dir.clone(),
        };

        let clone = target.clone_fid().await?;
        let reply = clone
            .client
            .rpc(FCall::TCreate {
                fid: clone.fid,
                name: name.to_owned(),
                perm,
                mode,
                extension: String::new(),
            })
            .await;
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                clone.client.release_fid(clone.fid).await;
                return Err(e);
            }
        };
        let qid = match reply {
            FCall::RCreate { qid, .. } => qid,
            _ => {
                clone.client.release_fid(clone.fid).await;
                return Err(Error::Protocol("expected Rcreate".into()));
            }
        };
        let mut elements = dir.path.elements.clone();
        elements.push(name.to_owned());
        Ok(Fid {
            client: clone.client,
            fid: clone.fid,
            dev: clone.dev,
            qid,
            path: Path { root: dir.path.root, device: dir.path.device.clone(), elements, must_be_dir: false },
            union_at: None,
            may_create: clone.may_create,
            may_cache: clone.may_cache,
        })
    }

    /// Fetch `stat` for a walked fid.
    pub async fn fstat(&self, target: &Fid) -> Result<Stat> {
        let reply = target.client.rpc(FCall::TStat { fid: target.fid }).await?;
        match reply {
            FCall::RStat { stat } => Ok(stat),
            _ => Err(Error::Protocol("expected Rstat".into())),
        }
    }

    /// Apply `stat` to a walked fid.
    pub async fn fwstat(&self, target: &Fid, stat: Stat) -> Result<()> {
        target.client.rpc(FCall::TWStat { fid: target.fid, stat }).await?;
        Ok(())
    }

    /// Remove the file a fid names. Per 9P, this always frees the fid
    /// number and clunks, whether or not the remove itself succeeded.
    /// Retries the next union sibling on failure, like `fopen`.
    pub async fn fremove(&self, target: Fid) -> Result<()> {
        let mut candidate = target;
        loop {
            let result = candidate.client.rpc(FCall::TRemove { fid: candidate.fid }).await;
            candidate.client.release_fid(candidate.fid).await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) => match candidate.union_at {
                    Some(mp) => match self.next_union_sibling(mp, &candidate).await {
                        Some((next, _)) => candidate = next,
                        None => return Err(e),
                    },
                    None => return Err(e),
                },
            }
        }
    }

    /// Read every directory entry of `dir`, in union order: once the
    /// current union member reports EOF, advance to the next member (a
    /// fresh clone, opened and read from offset 0) so the whole chain
    /// reads as one flat directory listing.
    pub async fn read_dir(&self, dir: &Fid) -> Result<Vec<Stat>> {
        let mut entries = Vec::new();
        let mut candidate = self.fopen(dir, om::READ).await?;

        loop {
            let iounit = candidate.client.msize().saturating_sub(crate::fcall::IOHDRSZ);
            let mut offset = 0u64;
            loop {
                let reply = candidate
                    .client
                    .rpc(FCall::TRead { fid: candidate.fid, offset, count: iounit })
                    .await?;
                let data = match reply {
                    FCall::RRead { data } => data.0,
                    _ => return Err(Error::Protocol("expected Rread".into())),
                };
                if data.is_empty() {
                    break;
                }
                let mut cursor = &data[..];
                while !cursor.is_empty() {
                    let (stat, consumed) =
                        crate::serialize::unpack_dir(cursor, candidate.client.dotu()).map_err(Error::Io)?;
                    entries.push(stat);
                    cursor = &cursor[consumed..];
                }
                offset += data.len() as u64;
            }

            match candidate.union_at {
                Some(mp) => match self.next_union_sibling(mp, &candidate).await {
                    Some((next, _)) => candidate = self.fopen(&next, om::READ).await?,
                    None => break,
                },
                None => break,
            }
        }
        Ok(entries)
    }

    /// Change the caller's current directory, resolving through mounts.
    pub async fn cd(&self, p: &Path) -> Result<()> {
        let next = self.fwalk_to(None, p).await?;
        let mut cwd = self.cwd.lock().await;
        *cwd = Some(next);
        Ok(())
    }

    /// Mount `new`'s root at `old`, a path already present in the
    /// namespace.
    pub async fn mount(&self, new: &Fid, old: &Path, order: MountOrder, flags: u32) -> Result<()> {
        let old_fid = self.fwalk_to(None, old).await?;
        self.mounts.mount(old_fid.file_id(), new.file_id(), order, flags).await?;
        self.mount_points.lock().await.insert(old_fid.file_id().unmapped(), old_fid);
        Ok(())
    }

    /// Bind `new` onto `old`, both already-resolved paths in this
    /// namespace. Equivalent to `mount`, except both sides are local.
    /// Binding the root (`order == Repl` and `old` resolves to the
    /// current namespace root) switches the root itself instead, Plan 9
    /// chroot-style.
    pub async fn bind(&self, new: &Path, old: &Path, order: MountOrder) -> Result<()> {
        let new_fid = self.fwalk_to(None, new).await?;
        let old_fid = self.fwalk_to(None, old).await?;

        let is_root = {
            let root = self.root.lock().await;
            root.as_ref().map(|r| r.file_id() == old_fid.file_id()).unwrap_or(false)
        };
        if order == MountOrder::Repl && is_root {
            self.mounts.set_root_dev(new_fid.dev).await;
            let mut root = self.root.lock().await;
            *root = Some(new_fid.clone());
            return Ok(());
        }

        let flags = if new_fid.file_id().unmapped() == old_fid.file_id().unmapped() { NOREMAP } else { 0 };
        self.mounts.mount(old_fid.file_id(), new_fid.file_id(), order, flags).await?;
        self.mount_points.lock().await.insert(old_fid.file_id().unmapped(), old_fid);
        Ok(())
    }

    /// Remove one (or, if `target` is `None`, every) mount entry at `old`.
    pub async fn unmount(&self, old: &Path, target: Option<&Fid>) -> Result<()> {
        let old_fid = self.fwalk_to(None, old).await?;
        self.mounts.unmount(old_fid.file_id(), target.map(|f| f.file_id())).await
    }

    /// Render the union chain mounted at `p`, one line per member, in
    /// try-order. Uses `FWalkTo` per spec.md's Open-Question resolution,
    /// so the report reflects the fid just short of the mount point.
    pub async fn ls_mounts(&self, p: &Path) -> Result<String> {
        let fid = self.fwalk_to(None, p).await?;
        let children = self.mounts.children(fid.file_id()).await;
        let mut out = String::new();
        if children.is_empty() {
            writeln!(out, "{} : not a mount point", path::serialize(p)).ok();
        } else {
            writeln!(out, "mount table for {}", path::serialize(p)).ok();
            for (i, child) in children.iter().enumerate() {
                let star = if child.noremap { "*" } else { " " };
                writeln!(out, "  [{}]{} dev={} qid.path={:#x}", i, star, child.file.dev, child.file.qid.path).ok();
            }
        }
        clunk_after(fid, Ok(out)).await
    }

    /// `FOpen(path, mode)`: walk to `path` through the mount table, then
    /// open it.
    pub async fn open(&self, p: &Path, mode: u8) -> Result<Fid> {
        let target = self.fwalk_to(None, p).await?;
        let result = self.fopen(&target, mode).await;
        clunk_after(target, result).await
    }

    /// `FCreate(path, perm, mode)`: walk to `path`'s parent, then create its
    /// final element there. If `path.must_be_dir` (a trailing `/`, or a
    /// trailing `.`/`..` that was absorbed by `clean`), `DMDIR` is OR'd into
    /// `perm`, per spec.md §4.5.6.
    pub async fn create(&self, p: &Path, perm: u32, mode: u8) -> Result<Fid> {
        let (parent, name) = split_parent(p)?;
        let dir = self.fwalk_to(None, &parent).await?;
        let perm = if p.must_be_dir { perm | dm::DIR } else { perm };
        let result = self.fcreate(&dir, &name, perm, mode).await;
        clunk_after(dir, result).await
    }

    /// `FStat(path)`: walk to `path` through the mount table, then stat it.
    pub async fn stat(&self, p: &Path) -> Result<Stat> {
        let target = self.fwalk_to(None, p).await?;
        let result = self.fstat(&target).await;
        clunk_after(target, result).await
    }

    /// `FRemove(path)`: walk to `path` through the mount table, then remove
    /// it.
    pub async fn remove(&self, p: &Path) -> Result<()> {
        let target = self.fwalk_to(None, p).await?;
        self.fremove(target).await
    }
}

/// Clunk a fid acquired only to get to `result`, and fold the two outcomes:
/// `result`'s error wins if both fail, since it's the one the caller asked
/// for; a clunk failure surfaces only when `result` itself succeeded.
async fn clunk_after<T>(fid: Fid, result: Result<T>) -> Result<T> {
    match (result, fid.clunk().await) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
    }
}

/// Split a path into its parent (all but the last element) and the final
/// element's name, for `FCreate`'s "walk to parent, create final name".
fn split_parent(p: &Path) -> Result<(Path, String)> {
    let mut elements = p.elements.clone();
    let name = elements
        .pop()
        .ok_or_else(|| Error::Namespace("path names no element to create".into()))?;
    Ok((
        Path { root: p.root, device: p.device.clone(), elements, must_be_dir: false },
        name,
    ))
}

/// Open mode helpers mirroring the bare `om` constants, kept here since
/// namespace callers reach for them far more often than wire code does.
pub mod mode {
    pub use super::om::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::{FCall, Msg, NOTAG, P92000U};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio::io::duplex;
    use tokio_util::codec::{Framed, LengthDelimitedCodec};

    fn frame_codec() -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .length_field_offset(0)
            .length_field_length(4)
            .length_adjustment(-4)
            .little_endian()
            .new_codec()
    }

    fn sample_stat(name: &str) -> Stat {
        Stat {
            typ: 0,
            dev: 0,
            qid: Qid::default(),
            mode: 0,
            atime: 0,
            mtime: 0,
            length: 0,
            name: name.into(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
            extension: String::new(),
            n_uid: crate::fcall::NONUNAME,
            n_gid: crate::fcall::NONUNAME,
            n_muid: crate::fcall::NONUNAME,
        }
    }

    /// A minimal in-memory server: Tversion/Tattach succeed, Twalk into
    /// "a" succeeds once and then errors; Topen/Tstat/Tremove succeed
    /// generically; Tcreate echoes the requested `perm` back in the
    /// returned qid's `path` so a test can assert on it without the server
    /// tracking any real file-system state; Tread at offset 0 returns one
    /// framed directory buffer of three stat entries, then EOF.
    async fn fake_server(mut server: tokio::io::DuplexStream) {
        let framed = Framed::new(&mut server, frame_codec());
        let (mut sink, mut stream) = framed.split();
        while let Some(Ok(frame)) = stream.next().await {
            let msg = crate::serialize::decode_msg(&mut &frame[..], true).unwrap();
            let reply = match msg.body {
                FCall::TVersion { msize, .. } => Msg {
                    tag: NOTAG,
                    body: FCall::RVersion { msize, version: P92000U.to_owned() },
                },
                FCall::TAttach { .. } => Msg { tag: msg.tag, body: FCall::RAttach { qid: Qid::default() } },
                FCall::TWalk { wnames, .. } if wnames == vec!["a".to_owned()] => Msg {
                    tag: msg.tag,
                    body: FCall::RWalk { wqids: vec![Qid { path: 1, ..Qid::default() }] },
                },
                FCall::TWalk { wnames, .. } if wnames.is_empty() => Msg {
                    tag: msg.tag,
                    body: FCall::RWalk { wqids: Vec::new() },
                },
                FCall::TOpen { .. } => {
                    Msg { tag: msg.tag, body: FCall::ROpen { qid: Qid::default(), iounit: 0 } }
                }
                FCall::TCreate { perm, .. } => Msg {
                    tag: msg.tag,
                    body: FCall::RCreate { qid: Qid { path: perm as u64, ..Qid::default() }, iounit: 0 },
                },
                FCall::TStat { .. } => Msg { tag: msg.tag, body: FCall::RStat { stat: sample_stat("a") } },
                FCall::TRead { offset: 0, .. } => {
                    let mut data = Vec::new();
                    for name in ["x", "y", "z"] {
                        crate::serialize::encode_stat(&sample_stat(name), &mut data, true).unwrap();
                    }
                    Msg { tag: msg.tag, body: FCall::RRead { data: crate::fcall::Data(data) } }
                }
                FCall::TRead { .. } => {
                    Msg { tag: msg.tag, body: FCall::RRead { data: crate::fcall::Data(Vec::new()) } }
                }
                FCall::TRemove { .. } => Msg { tag: msg.tag, body: FCall::RRemove },
                FCall::TClunk { .. } => Msg { tag: msg.tag, body: FCall::RClunk },
                _ => Msg { tag: msg.tag, body: FCall::RError { ename: "unsupported".into(), errno: 0 } },
            };
            let mut buf = Vec::new();
            crate::serialize::encode_msg(&reply, &mut buf, true).unwrap();
            sink.send(Bytes::from(buf)).await.unwrap();
        }
    }

    async fn connected_namespace() -> Namespace {
        let (client_io, server_io) = duplex(8192);
        tokio::spawn(fake_server(server_io));
        let client = Client::connect(client_io, 8192).await.unwrap();
        let ns = Namespace::new();
        ns.attach(client, "glenda", "").await.unwrap();
        ns
    }

    #[tokio::test]
    async fn walk_into_existing_child() {
        let ns = connected_namespace().await;
        let fid = ns.fwalk(None, &path::parse("a")).await.unwrap();
        assert_eq!(fid.qid().path, 1);
    }

    #[tokio::test]
    async fn walk_into_missing_child_errors() {
        let ns = connected_namespace().await;
        assert!(ns.fwalk(None, &path::parse("missing")).await.is_err());
    }

    #[tokio::test]
    async fn ls_mounts_reports_non_mount_point() {
        let ns = connected_namespace().await;
        let report = ns.ls_mounts(&path::parse("/")).await.unwrap();
        assert!(report.contains("not a mount point"));
    }

    #[tokio::test]
    async fn fwalk_to_resolves_through_a_replace_mount() {
        // Two servers: the first's fake_server walks "a"; mount a second
        // attach of the same fake server onto "a", then walking "/a"
        // should land on the mounted server's root qid (path 0) rather
        // than the underlying "a" qid (path 1), since replace mounts
        // fully shadow what was there.
        let ns = connected_namespace().await;
        let (client_io2, server_io2) = duplex(8192);
        tokio::spawn(fake_server(server_io2));
        let client2 = Client::connect(client_io2, 8192).await.unwrap();
        let root2 = ns.attach(client2, "glenda", "two").await.unwrap();

        let a = ns.fwalk(None, &path::parse("a")).await.unwrap();
        ns.mount(&root2, &path::parse("a"), MountOrder::Repl, 0).await.unwrap();

        let walked = ns.fwalk_to(None, &path::parse("/a")).await.unwrap();
        assert_eq!(walked.qid().path, 0);
        assert_eq!(walked.dev, root2.dev);
        let _ = a;
    }

    #[tokio::test]
    async fn open_path_walks_then_opens() {
        let ns = connected_namespace().await;
        let fid = ns.open(&path::parse("a"), om::READ).await.unwrap();
        assert_eq!(fid.qid().path, 0);
    }

    #[tokio::test]
    async fn read_dir_parses_framed_stat_entries() {
        let ns = connected_namespace().await;
        let dir = ns.fwalk(None, &path::parse("a")).await.unwrap();
        let entries = ns.read_dir(&dir).await.unwrap();
        let names: Vec<_> = entries.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["x".to_owned(), "y".to_owned(), "z".to_owned()]);
    }

    #[tokio::test]
    async fn stat_path_walks_then_stats() {
        let ns = connected_namespace().await;
        let stat = ns.stat(&path::parse("a")).await.unwrap();
        assert_eq!(stat.name, "a");
    }

    #[tokio::test]
    async fn remove_path_walks_then_removes() {
        let ns = connected_namespace().await;
        ns.remove(&path::parse("a")).await.unwrap();
    }

    #[tokio::test]
    async fn create_path_ors_dmdir_when_must_be_dir() {
        let ns = connected_namespace().await;
        let fid = ns.create(&path::parse("a/newdir/"), 0o755, om::READ).await.unwrap();
        assert_eq!(fid.qid().path as u32 & dm::DIR, dm::DIR);
    }

    #[tokio::test]
    async fn create_path_leaves_perm_untouched_without_trailing_slash() {
        let ns = connected_namespace().await;
        let fid = ns.create(&path::parse("a/newfile"), 0o644, om::READ).await.unwrap();
        assert_eq!(fid.qid().path as u32, 0o644);
    }
}
