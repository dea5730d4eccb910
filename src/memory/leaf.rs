//! In-process storage leaf
//!
//! Holds bytes in memory and answers votes with a configurable score. Used
//! by the CLI's in-process trees and by tests.

use crate::common::{Error, Result};
use crate::resource::{
    ChildOp, ChildResource, DirEntry, FileStat, HierarchyPath, ObjectRef, OpOutput,
    RequestContext, RouteOperation, Vote, Whence,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_CAPACITY: u64 = 1 << 30;

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    mode: u32,
}

#[derive(Debug, Default)]
struct LeafState {
    files: BTreeMap<String, StoredFile>,
    dirs: BTreeSet<String>,
    offsets: HashMap<String, u64>,
    dir_cursors: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct LeafResource {
    name: String,
    host: String,
    capacity: u64,
    vote: Mutex<f64>,
    failing: AtomicBool,
    state: Mutex<LeafState>,
}

impl LeafResource {
    pub fn new(name: impl Into<String>, host: impl Into<String>, vote: f64) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            capacity: DEFAULT_CAPACITY,
            vote: Mutex::new(vote),
            failing: AtomicBool::new(false),
            state: Mutex::new(LeafState::default()),
        }
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn vote(&self) -> f64 {
        *self.vote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_vote(&self, vote: f64) {
        *self.vote.lock().unwrap_or_else(PoisonError::into_inner) = vote;
    }

    /// Make every call and vote probe fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contents(&self, path: &str) -> Option<Bytes> {
        self.state()
            .files
            .get(path)
            .map(|f| Bytes::copy_from_slice(&f.data))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    /// Store `data` at `path`, replacing whatever was there.
    pub fn put(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        self.check_available()?;
        let mut state = self.state();
        let used = Self::used(&state) - state.files.get(path).map_or(0, |f| f.data.len() as u64);
        if used + data.len() as u64 > self.capacity {
            return Err(self.fail(format!("no space left for {}", path)));
        }
        state.files.insert(
            path.to_string(),
            StoredFile {
                data: data.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, LeafState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn used(state: &LeafState) -> u64 {
        state.files.values().map(|f| f.data.len() as u64).sum()
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::Child {
            child: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(self.fail("resource unavailable"));
        }
        Ok(())
    }

    fn apply(&self, op: ChildOp, path: &str, mode: u32) -> Result<OpOutput> {
        let mut state = self.state();
        match op {
            ChildOp::Create => {
                state.files.insert(
                    path.to_string(),
                    StoredFile {
                        data: Vec::new(),
                        mode,
                    },
                );
                state.offsets.insert(path.to_string(), 0);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Open => {
                if !state.files.contains_key(path) {
                    return Err(self.fail(format!("{} does not exist", path)));
                }
                state.offsets.insert(path.to_string(), 0);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Read { len } => {
                let offset = state.offsets.get(path).copied().unwrap_or(0) as usize;
                let file = state
                    .files
                    .get(path)
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))?;
                let start = offset.min(file.data.len());
                let end = start.saturating_add(len).min(file.data.len());
                let chunk = Bytes::copy_from_slice(&file.data[start..end]);
                state.offsets.insert(path.to_string(), end as u64);
                Ok(OpOutput::Data(chunk))
            }
            ChildOp::Write { data } => {
                let offset = state.offsets.get(path).copied().unwrap_or(0) as usize;
                let used = Self::used(&state);
                let file = state
                    .files
                    .get_mut(path)
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))?;
                let end = offset
                    .checked_add(data.len())
                    .ok_or_else(|| self.fail(format!("write past end of {}", path)))?;
                let growth = end.saturating_sub(file.data.len()) as u64;
                if used.saturating_add(growth) > self.capacity {
                    return Err(self.fail(format!("no space left for {}", path)));
                }
                if file.data.len() < end {
                    file.data.resize(end, 0);
                }
                file.data[offset..end].copy_from_slice(&data);
                state.offsets.insert(path.to_string(), end as u64);
                Ok(OpOutput::Code(data.len() as i64))
            }
            ChildOp::Close => {
                state.offsets.remove(path);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Unlink => {
                state.offsets.remove(path);
                state
                    .files
                    .remove(path)
                    .map(|_| OpOutput::Code(0))
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))
            }
            ChildOp::Stat => {
                if let Some(file) = state.files.get(path) {
                    return Ok(OpOutput::Stat(FileStat {
                        size: file.data.len() as u64,
                        mode: file.mode,
                    }));
                }
                if state.dirs.contains(path) {
                    return Ok(OpOutput::Stat(FileStat { size: 0, mode }));
                }
                Err(self.fail(format!("{} does not exist", path)))
            }
            ChildOp::Lseek { offset, whence } => {
                let size = state
                    .files
                    .get(path)
                    .map(|f| f.data.len() as i64)
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))?;
                let current = state.offsets.get(path).copied().unwrap_or(0) as i64;
                let base = match whence {
                    Whence::Start => 0,
                    Whence::Current => current,
                    Whence::End => size,
                };
                let target = base
                    .checked_add(offset)
                    .ok_or_else(|| self.fail(format!("seek out of range in {}", path)))?;
                if target < 0 {
                    return Err(self.fail(format!("seek before start of {}", path)));
                }
                state.offsets.insert(path.to_string(), target as u64);
                Ok(OpOutput::Code(target))
            }
            ChildOp::Mkdir => {
                if !state.dirs.insert(path.to_string()) {
                    return Err(self.fail(format!("{} already exists", path)));
                }
                Ok(OpOutput::Code(0))
            }
            ChildOp::Rmdir => {
                let prefix = format!("{}/", path.trim_end_matches('/'));
                if state.files.keys().any(|f| f.starts_with(&prefix)) {
                    return Err(self.fail(format!("{} is not empty", path)));
                }
                if !state.dirs.remove(path) {
                    return Err(self.fail(format!("{} does not exist", path)));
                }
                Ok(OpOutput::Code(0))
            }
            ChildOp::Opendir => {
                if !state.dirs.contains(path) {
                    return Err(self.fail(format!("{} does not exist", path)));
                }
                state.dir_cursors.insert(path.to_string(), 0);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Readdir => {
                let cursor = *state
                    .dir_cursors
                    .get(path)
                    .ok_or_else(|| self.fail(format!("{} is not open", path)))?;
                let prefix = format!("{}/", path.trim_end_matches('/'));
                let entry = state
                    .files
                    .keys()
                    .chain(state.dirs.iter())
                    .filter_map(|p| p.strip_prefix(&prefix))
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(str::to_string)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .nth(cursor);
                if entry.is_some() {
                    state.dir_cursors.insert(path.to_string(), cursor + 1);
                }
                Ok(OpOutput::Entry(entry.map(|name| DirEntry { name })))
            }
            ChildOp::Closedir => {
                state.dir_cursors.remove(path);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Rename { new_path } => {
                let file = state
                    .files
                    .remove(path)
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))?;
                state.offsets.remove(path);
                state.files.insert(new_path, file);
                Ok(OpOutput::Code(0))
            }
            ChildOp::FreeSpace => {
                let free = self.capacity.saturating_sub(Self::used(&state));
                Ok(OpOutput::Code(free as i64))
            }
            ChildOp::StageToCache { cache_path } => {
                let file = state
                    .files
                    .get(path)
                    .cloned()
                    .ok_or_else(|| self.fail(format!("{} does not exist", path)))?;
                state.files.insert(cache_path, file);
                Ok(OpOutput::Code(0))
            }
            ChildOp::SyncToArchive { cache_path } => {
                let file = state
                    .files
                    .get(&cache_path)
                    .cloned()
                    .ok_or_else(|| self.fail(format!("{} does not exist", cache_path)))?;
                state.files.insert(path.to_string(), file);
                Ok(OpOutput::Code(0))
            }
            ChildOp::Registered | ChildOp::Unregistered | ChildOp::Modified => {
                Ok(OpOutput::Code(0))
            }
        }
    }
}

#[async_trait]
impl ChildResource for LeafResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &RequestContext, op: ChildOp) -> Result<OpOutput> {
        self.check_available()?;
        let mode = match &ctx.object {
            ObjectRef::File(f) => f.mode,
            ObjectRef::Collection(c) => c.mode,
            ObjectRef::Data(d) => d.mode,
        };
        tracing::trace!(leaf = %self.name, op = op.name(), object = %ctx.object.logical_path(), "Leaf call");
        self.apply(op, ctx.object.logical_path(), mode)
    }

    async fn resolve_hierarchy(
        &self,
        ctx: &RequestContext,
        operation: RouteOperation,
        host: &str,
        mut hierarchy: HierarchyPath,
    ) -> Result<Vote> {
        self.check_available()?;
        hierarchy.add_child(self.name.as_str())?;

        let mut score = self.vote();
        if operation != RouteOperation::Create && !self.contains(ctx.object.logical_path()) {
            score = 0.0;
        }
        if !host.is_empty() && host != self.host {
            score *= 0.5;
        }

        Ok(Vote { score, hierarchy })
    }
}
