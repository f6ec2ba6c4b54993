//! Shared tree storage and structural operations.
//!
//! Every attached tree lives in one [`TreeCore`] behind one mutex, so
//! lock identity is `Arc` identity. Handles reach their node through a
//! home cell recording which tree currently owns it; structural edits
//! move node data between cores and repoint the cells, which makes a
//! reparent atomic from the point of view of every other handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use thiserror::Error;

use common::{Point, Transform};

use crate::content::{ContentProvider, FileScope, ResolvedTransform, Stage};
use crate::time::{frame_to_time, time_to_frame, Frame, FALLBACK_FRAME_RATE};

/// Errors from structural tree edits.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    #[error("a layer cannot contain itself or one of its ancestors")]
    WouldCycle,

    #[error("the layer is not a child of this composition")]
    NotInComposition,

    #[error("child index {0} is out of range")]
    IndexOutOfRange(usize),
}

new_key_type! {
    pub(crate) struct NodeKey;
}

pub(crate) type SharedTree = Arc<Mutex<TreeCore>>;

/// Which tree a node currently lives in, and under which key.
pub(crate) struct Home {
    pub tree: SharedTree,
    pub key: NodeKey,
}

/// Stable indirection between a public handle and its node.
pub(crate) struct NodeCell {
    pub home: Mutex<Home>,
}

/// Children and derived timing of a composition node.
pub(crate) struct CompositionState {
    /// Bottom-to-top paint order.
    pub children: SmallVec<[NodeKey; 4]>,
    /// True for compositions assembled at runtime, whose frame rate and
    /// duration follow their children.
    pub empty: bool,
    pub frame_rate: f32,
}

pub(crate) enum NodeKind {
    Leaf,
    Composition(CompositionState),
}

pub(crate) struct NodeData {
    pub unique_id: u32,
    /// Back-reference only; the cell owns the tree, never the reverse.
    pub cell: Weak<NodeCell>,
    pub kind: NodeKind,
    pub matrix: Transform,
    pub anchor: Point,
    pub alpha: f32,
    pub visible: bool,
    /// Offset of the first content frame on the owner's timeline, in this
    /// node's own frame rate.
    pub start_frame: Frame,
    /// Current frame relative to the start of the content.
    pub content_frame: Frame,
    /// Length of the content in frames.
    pub duration: Frame,
    pub file: Option<Arc<FileScope>>,
    pub content: Arc<dyn ContentProvider>,
    pub content_version: u64,
    pub audio_version: u64,
    pub parent: Option<NodeKey>,
    pub matte_owner: Option<NodeKey>,
    pub matte_layer: Option<NodeKey>,
}

static NEXT_UNIQUE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-wide layer id; never reused.
pub(crate) fn next_unique_id() -> u32 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The nodes of one connected tree, all guarded by one mutex.
pub(crate) struct TreeCore {
    pub nodes: SlotMap<NodeKey, NodeData>,
    pub stage: Option<Arc<dyn Stage>>,
}

impl TreeCore {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            stage: None,
        }
    }

    pub fn parent_or_owner(&self, key: NodeKey) -> Option<NodeKey> {
        let node = &self.nodes[key];
        node.parent.or(node.matte_owner)
    }

    /// The node whose timeline drives `key`: its parent, or for a track
    /// matte the parent of its owner.
    pub fn timeline_owner(&self, key: NodeKey) -> Option<NodeKey> {
        let node = &self.nodes[key];
        match (node.parent, node.matte_owner) {
            (Some(parent), _) => Some(parent),
            (None, Some(owner)) => self.nodes[owner].parent,
            (None, None) => None,
        }
    }

    pub fn timeline_root(&self, key: NodeKey) -> NodeKey {
        let mut cursor = key;
        while let Some(owner) = self.timeline_owner(cursor) {
            cursor = owner;
        }
        cursor
    }

    /// True when `candidate` is `key` itself or reachable from `key`
    /// walking parents and matte owners upward.
    pub fn is_ancestor(&self, candidate: NodeKey, key: NodeKey) -> bool {
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            if k == candidate {
                return true;
            }
            cursor = self.parent_or_owner(k);
        }
        false
    }

    pub fn frame_rate(&self, key: NodeKey) -> f32 {
        let node = &self.nodes[key];
        if let Some(file) = &node.file {
            return file.frame_rate();
        }
        if let NodeKind::Composition(state) = &node.kind {
            if state.empty {
                return state.frame_rate;
            }
        }
        FALLBACK_FRAME_RATE
    }

    /// Bumps the content version of `key` and every ancestor up to the
    /// root, matte owners included.
    pub fn notify_modified(&mut self, key: NodeKey) {
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            self.nodes[k].content_version += 1;
            cursor = self.parent_or_owner(k);
        }
    }

    pub fn notify_audio_modified(&mut self, key: NodeKey) {
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            self.nodes[k].audio_version += 1;
            cursor = self.parent_or_owner(k);
        }
    }

    pub fn set_matrix(&mut self, key: NodeKey, matrix: Transform) {
        if self.nodes[key].matrix == matrix {
            return;
        }
        self.nodes[key].matrix = matrix;
        self.notify_modified(key);
        if let Some(stage) = &self.stage {
            stage.invalidate_cache_scale(self.nodes[key].unique_id);
        }
    }

    /// Moves `key`, its track matte and its children to `time` on the
    /// node's local timeline. Returns whether any effective content frame
    /// changed.
    pub fn goto_time(&mut self, key: NodeKey, time: i64) -> bool {
        let mut changed = false;
        // The matte follows the owner's clock.
        if let Some(matte) = self.nodes[key].matte_layer {
            changed = self.goto_time(matte, time);
        }
        let rate = self.frame_rate(key);
        let layer_frame = time_to_frame(time, rate);
        let (current, previous) = {
            let node = &mut self.nodes[key];
            let previous = node.content_frame;
            node.content_frame = layer_frame - node.start_frame;
            (node.content_frame, previous)
        };
        if !changed {
            changed = self.nodes[key].content.frame_changed(current, previous);
        }
        let children = match &self.nodes[key].kind {
            NodeKind::Composition(state) => Some(state.children.clone()),
            NodeKind::Leaf => None,
        };
        if let Some(children) = children {
            for child in children {
                let child_rate = self.frame_rate(child);
                let child_frame =
                    (current as f64 * child_rate as f64 / rate as f64).round() as Frame;
                if self.goto_time(child, frame_to_time(child_frame, child_rate)) {
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn goto_time_and_notify(&mut self, key: NodeKey, time: i64) {
        if self.goto_time(key, time) {
            self.notify_modified(key);
        }
    }

    /// Recomputes the frame rate and duration of an empty composition
    /// from its children. Fixed compositions are left alone.
    pub fn refresh_empty_extent(&mut self, key: NodeKey) {
        let children = match &self.nodes[key].kind {
            NodeKind::Composition(state) if state.empty => state.children.clone(),
            _ => return,
        };
        let mut frame_rate = FALLBACK_FRAME_RATE;
        let mut end_time: i64 = 0;
        for &child in &children {
            let rate = self.frame_rate(child);
            let node = &self.nodes[child];
            frame_rate = frame_rate.max(rate);
            end_time = end_time.max(frame_to_time(node.start_frame + node.duration, rate));
        }
        self.nodes[key].duration = time_to_frame(end_time, frame_rate);
        if let NodeKind::Composition(state) = &mut self.nodes[key].kind {
            state.frame_rate = frame_rate;
        }
    }

    /// Converts a content-relative frame of `key` to a frame on the
    /// timeline of its outermost owner. Start offsets apply level by
    /// level, each in its node's own frame rate, before rescaling to the
    /// owner's rate.
    pub fn local_frame_to_global(&self, key: NodeKey, local_frame: Frame) -> Frame {
        let mut frame = local_frame;
        let mut cursor = key;
        loop {
            frame += self.nodes[cursor].start_frame;
            match self.timeline_owner(cursor) {
                Some(owner) => {
                    let from = self.frame_rate(cursor) as f64;
                    let to = self.frame_rate(owner) as f64;
                    if from != to {
                        frame = (frame as f64 * to / from).round() as Frame;
                    }
                    cursor = owner;
                }
                None => return frame,
            }
        }
    }

    /// Inverse of [`local_frame_to_global`]: walks from the outermost
    /// owner down to `key`, unwinding one level at a time.
    pub fn global_to_local_frame(&self, key: NodeKey, global_frame: Frame) -> Frame {
        let mut chain = SmallVec::<[NodeKey; 8]>::new();
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            chain.push(k);
            cursor = self.timeline_owner(k);
        }
        let mut frame = global_frame;
        let mut previous: Option<NodeKey> = None;
        for &k in chain.iter().rev() {
            if let Some(prev) = previous {
                let from = self.frame_rate(prev) as f64;
                let to = self.frame_rate(k) as f64;
                if from != to {
                    frame = (frame as f64 * to / from).round() as Frame;
                }
            }
            frame -= self.nodes[k].start_frame;
            previous = Some(k);
        }
        frame
    }

    /// Final matrix and alpha of the content of `key` at its current
    /// frame, or `None` when nothing would be drawn.
    pub fn resolve_transform(&self, key: NodeKey) -> Option<ResolvedTransform> {
        let node = &self.nodes[key];
        if node.content_frame < 0 || node.content_frame >= node.duration {
            return None;
        }
        node.matrix.inverse()?;
        if node.alpha <= 0.0 {
            return None;
        }
        let content = node.content.transform(node.content_frame);
        if !content.visible || content.alpha <= 0.0 {
            return None;
        }
        Some(ResolvedTransform {
            matrix: content.matrix.then(&node.matrix),
            alpha: content.alpha * node.alpha,
        })
    }
}

/// Where a moved subtree hangs in its destination tree.
pub(crate) enum AttachTarget {
    Child { parent: NodeKey, index: usize },
    Matte { owner: NodeKey },
    Root,
}

fn collect_subtree(core: &TreeCore, key: NodeKey, out: &mut Vec<NodeKey>) {
    out.push(key);
    if let Some(matte) = core.nodes[key].matte_layer {
        collect_subtree(core, matte, out);
    }
    if let NodeKind::Composition(state) = &core.nodes[key].kind {
        for &child in &state.children {
            collect_subtree(core, child, out);
        }
    }
}

/// Unlinks `key` from its parent or matte owner. Returns the former
/// owner so the caller can refresh and notify it.
pub(crate) fn unlink_from_owner(core: &mut TreeCore, key: NodeKey) -> Option<NodeKey> {
    if let Some(parent) = core.nodes[key].parent.take() {
        if let NodeKind::Composition(state) = &mut core.nodes[parent].kind {
            state.children.retain(|k| *k != key);
        }
        Some(parent)
    } else if let Some(owner) = core.nodes[key].matte_owner.take() {
        core.nodes[owner].matte_layer = None;
        Some(owner)
    } else {
        None
    }
}

/// Moves the subtree rooted at `root` from `src` into `dst`, rewriting
/// keys, repointing home cells and transferring stage references. The
/// caller must hold both tree locks and have unlinked `root` from any
/// previous owner.
pub(crate) fn move_subtree(
    src: &mut TreeCore,
    root: NodeKey,
    dst: &mut TreeCore,
    dst_tree: &SharedTree,
    target: AttachTarget,
) -> NodeKey {
    let mut keys = Vec::new();
    collect_subtree(src, root, &mut keys);

    if let Some(stage) = src.stage.clone() {
        for &key in &keys {
            stage.remove_reference(src.nodes[key].unique_id);
        }
    }

    let mut remap = HashMap::with_capacity(keys.len());
    for &key in &keys {
        if let Some(data) = src.nodes.remove(key) {
            let new_key = dst.nodes.insert(data);
            remap.insert(key, new_key);
        }
    }

    for &new_key in remap.values() {
        let node = &mut dst.nodes[new_key];
        node.parent = node.parent.and_then(|k| remap.get(&k).copied());
        node.matte_owner = node.matte_owner.and_then(|k| remap.get(&k).copied());
        node.matte_layer = node.matte_layer.and_then(|k| remap.get(&k).copied());
        if let NodeKind::Composition(state) = &mut node.kind {
            for child in state.children.iter_mut() {
                if let Some(&mapped) = remap.get(child) {
                    *child = mapped;
                }
            }
        }
    }

    let new_root = remap[&root];
    match target {
        AttachTarget::Child { parent, index } => {
            dst.nodes[new_root].parent = Some(parent);
            if let NodeKind::Composition(state) = &mut dst.nodes[parent].kind {
                let index = index.min(state.children.len());
                state.children.insert(index, new_root);
            }
        }
        AttachTarget::Matte { owner } => {
            dst.nodes[new_root].matte_owner = Some(owner);
            dst.nodes[owner].matte_layer = Some(new_root);
        }
        AttachTarget::Root => {}
    }

    for &new_key in remap.values() {
        if let Some(cell) = dst.nodes[new_key].cell.upgrade() {
            let mut home = cell.home.lock();
            home.tree = dst_tree.clone();
            home.key = new_key;
        }
    }

    if let Some(stage) = dst.stage.clone() {
        for &new_key in remap.values() {
            stage.add_reference(dst.nodes[new_key].unique_id);
        }
    }

    tracing::debug!(moved = keys.len(), "moved subtree between trees");
    new_root
}

/// Detaches the subtree at `key` into a freshly created tree with its
/// own lock. The caller must have unlinked `key` already.
pub(crate) fn detach_into_new_tree(src: &mut TreeCore, key: NodeKey) -> SharedTree {
    let tree: SharedTree = Arc::new(Mutex::new(TreeCore::new()));
    {
        let mut dst = tree.lock();
        move_subtree(src, key, &mut dst, &tree, AttachTarget::Root);
    }
    tree
}

/// Locks one or two trees, in address order when they differ.
pub(crate) fn lock_pair<'a>(
    a: &'a SharedTree,
    b: &'a SharedTree,
) -> (MutexGuard<'a, TreeCore>, Option<MutexGuard<'a, TreeCore>>) {
    if Arc::ptr_eq(a, b) {
        (a.lock(), None)
    } else if Arc::as_ptr(a) < Arc::as_ptr(b) {
        let first = a.lock();
        let second = b.lock();
        (first, Some(second))
    } else {
        let second = b.lock();
        let first = a.lock();
        (first, Some(second))
    }
}
