//! Layer handles and their timeline operations.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use common::{Point, Rect, Transform};

use crate::composition::Composition;
use crate::content::{
    ContentHandle, ContentProvider, FileScope, ResolvedTransform, Stage, StaticContent,
};
use crate::time::{
    frame_to_progress, frame_to_time, progress_to_frame, time_to_frame, Frame,
};
use crate::tree::{
    detach_into_new_tree, lock_pair, move_subtree, next_unique_id, unlink_from_owner,
    AttachTarget, Home, NodeCell, NodeData, NodeKey, NodeKind, SharedTree, TreeCore, TreeError,
};

/// Construction parameters for a layer.
#[derive(Clone)]
pub struct LayerInfo {
    /// Length of the layer's content in frames.
    pub duration: Frame,
    /// Offset of the first content frame on the owner's timeline, in the
    /// layer's own frame rate.
    pub start_frame: Frame,
    pub visible: bool,
    /// Timing scope inherited from the file the layer was loaded from.
    pub file: Option<Arc<FileScope>>,
    pub content: Arc<dyn ContentProvider>,
}

impl Default for LayerInfo {
    fn default() -> Self {
        Self {
            duration: 1,
            start_frame: 0,
            visible: true,
            file: None,
            content: Arc::new(StaticContent::new(Rect::ZERO)),
        }
    }
}

/// Handle to a node of a layer tree.
///
/// Clones refer to the same node. Every accessor synchronizes on the
/// single lock shared by the node's current tree.
#[derive(Clone)]
pub struct Layer {
    pub(crate) cell: Arc<NodeCell>,
    pub(crate) unique_id: u32,
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for Layer {}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("unique_id", &self.unique_id)
            .finish()
    }
}

/// Returns a handle for `key`, reusing the node's live cell if one
/// exists.
pub(crate) fn make_handle(tree: &SharedTree, core: &mut TreeCore, key: NodeKey) -> Layer {
    let unique_id = core.nodes[key].unique_id;
    if let Some(cell) = core.nodes[key].cell.upgrade() {
        return Layer { cell, unique_id };
    }
    let cell = Arc::new(NodeCell {
        home: Mutex::new(Home {
            tree: tree.clone(),
            key,
        }),
    });
    core.nodes[key].cell = Arc::downgrade(&cell);
    Layer { cell, unique_id }
}

impl Layer {
    pub fn new(info: LayerInfo) -> Layer {
        Layer::with_kind(info, NodeKind::Leaf)
    }

    pub(crate) fn with_kind(info: LayerInfo, kind: NodeKind) -> Layer {
        let unique_id = next_unique_id();
        let tree: SharedTree = Arc::new(Mutex::new(TreeCore::new()));
        let key = tree.lock().nodes.insert(NodeData {
            unique_id,
            cell: Weak::new(),
            kind,
            matrix: Transform::identity(),
            anchor: Point::ZERO,
            alpha: 1.0,
            visible: info.visible,
            start_frame: info.start_frame,
            content_frame: 0,
            duration: info.duration,
            file: info.file,
            content: info.content,
            content_version: 0,
            audio_version: 0,
            parent: None,
            matte_owner: None,
            matte_layer: None,
        });
        let cell = Arc::new(NodeCell {
            home: Mutex::new(Home {
                tree: tree.clone(),
                key,
            }),
        });
        tree.lock().nodes[key].cell = Arc::downgrade(&cell);
        Layer { cell, unique_id }
    }

    pub(crate) fn home_snapshot(&self) -> (SharedTree, NodeKey) {
        let home = self.cell.home.lock();
        (home.tree.clone(), home.key)
    }

    pub(crate) fn home_matches(&self, tree: &SharedTree, key: NodeKey) -> bool {
        let home = self.cell.home.lock();
        Arc::ptr_eq(&home.tree, tree) && home.key == key
    }

    /// Runs `f` with the node's tree locked. The home cell is re-checked
    /// after locking so a concurrent reparent is never observed mid-move.
    pub(crate) fn with_core<R>(
        &self,
        f: impl FnOnce(&SharedTree, &mut TreeCore, NodeKey) -> R,
    ) -> R {
        loop {
            let (tree, key) = self.home_snapshot();
            let mut core = tree.lock();
            if !self.home_matches(&tree, key) {
                continue;
            }
            return f(&tree, &mut core, key);
        }
    }

    /// Identifier unique across every layer of the process.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Counter bumped by every content-affecting mutation of this node or
    /// anything below it.
    pub fn content_version(&self) -> u64 {
        self.with_core(|_, core, key| core.nodes[key].content_version)
    }

    /// Counter bumped by audio-affecting mutations such as start-time
    /// shifts.
    pub fn audio_version(&self) -> u64 {
        self.with_core(|_, core, key| core.nodes[key].audio_version)
    }

    /// Whether any content-affecting mutation happened since creation.
    pub fn content_modified(&self) -> bool {
        self.content_version() > 0
    }

    pub fn matrix(&self) -> Transform {
        self.with_core(|_, core, key| core.nodes[key].matrix)
    }

    /// Sets the layer's transform. Assigning an identical matrix leaves
    /// the version counters untouched.
    pub fn set_matrix(&self, matrix: Transform) {
        self.with_core(|_, core, key| core.set_matrix(key, matrix));
    }

    pub fn reset_matrix(&self) {
        self.set_matrix(Transform::identity());
    }

    /// The content's own transform at the current frame combined under the
    /// layer matrix.
    pub fn total_matrix(&self) -> Transform {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            node.content
                .transform(node.content_frame)
                .matrix
                .then(&node.matrix)
        })
    }

    fn decomposed(&self) -> common::DecomposedTransform {
        self.with_core(|_, core, key| core.nodes[key].matrix.decompose())
    }

    fn edit_decomposed(&self, edit: impl FnOnce(&mut common::DecomposedTransform)) {
        self.with_core(|_, core, key| {
            let mut parts = core.nodes[key].matrix.decompose();
            edit(&mut parts);
            core.set_matrix(key, parts.compose());
        });
    }

    pub fn position(&self) -> Point {
        self.with_core(|_, core, key| {
            let m = core.nodes[key].matrix;
            Point::new(m.m31, m.m32)
        })
    }

    pub fn set_position(&self, position: Point) {
        self.with_core(|_, core, key| {
            let mut m = core.nodes[key].matrix;
            m.m31 = position.x;
            m.m32 = position.y;
            core.set_matrix(key, m);
        });
    }

    pub fn scale(&self) -> Point {
        self.decomposed().scale
    }

    /// Replaces the scale factors while keeping rotation and skew.
    pub fn set_scale(&self, scale: Point) {
        self.edit_decomposed(|parts| parts.scale = scale);
    }

    /// Rotation in degrees, counter-clockwise.
    pub fn rotation(&self) -> f32 {
        self.decomposed().rotation
    }

    pub fn set_rotation(&self, degrees: f32) {
        self.edit_decomposed(|parts| parts.rotation = degrees);
    }

    /// Shear angles in degrees. Only the X axis is modeled; `y` always
    /// reads 0.
    pub fn skew(&self) -> Point {
        Point::new(self.decomposed().skew_x, 0.0)
    }

    /// Sets the X shear angle. The Y component is accepted and ignored.
    pub fn set_skew(&self, skew: Point) {
        self.edit_decomposed(|parts| parts.skew_x = skew.x);
    }

    pub fn anchor_point(&self) -> Point {
        self.with_core(|_, core, key| core.nodes[key].anchor)
    }

    /// Moves the anchor point, compensating the translation so the
    /// rendered position does not jump.
    pub fn set_anchor_point(&self, anchor: Point) {
        self.with_core(|_, core, key| {
            let previous = core.nodes[key].anchor;
            if previous == anchor {
                return;
            }
            core.nodes[key].anchor = anchor;
            let delta = anchor - previous;
            let mut m = core.nodes[key].matrix;
            let parts = m.decompose();
            let (sin, cos) = parts.rotation.to_radians().sin_cos();
            let offset_x = delta.x * parts.scale.x * cos - delta.y * parts.scale.y * sin;
            let offset_y = delta.x * parts.scale.x * sin + delta.y * parts.scale.y * cos;
            m.m31 -= offset_x;
            m.m32 -= offset_y;
            core.set_matrix(key, m);
        });
    }

    pub fn alpha(&self) -> f32 {
        self.with_core(|_, core, key| core.nodes[key].alpha)
    }

    pub fn set_alpha(&self, alpha: f32) {
        self.with_core(|_, core, key| {
            if core.nodes[key].alpha == alpha {
                return;
            }
            core.nodes[key].alpha = alpha;
            core.notify_modified(key);
        });
    }

    pub fn visible(&self) -> bool {
        self.with_core(|_, core, key| core.nodes[key].visible)
    }

    pub fn set_visible(&self, visible: bool) {
        self.with_core(|_, core, key| {
            if core.nodes[key].visible == visible {
                return;
            }
            core.nodes[key].visible = visible;
            core.notify_modified(key);
        });
    }

    /// Frame rate of this layer's timeline: the file scope's rate, the
    /// derived rate of an empty composition, or 60.
    pub fn frame_rate(&self) -> f32 {
        self.with_core(|_, core, key| core.frame_rate(key))
    }

    /// Duration of the content in microseconds.
    pub fn duration(&self) -> i64 {
        self.with_core(|_, core, key| {
            frame_to_time(core.nodes[key].duration, core.frame_rate(key))
        })
    }

    /// Length of the content in frames.
    pub fn frame_count(&self) -> Frame {
        self.with_core(|_, core, key| core.nodes[key].duration)
    }

    /// Current frame relative to the start of this layer's content.
    pub fn content_frame(&self) -> Frame {
        self.with_core(|_, core, key| core.nodes[key].content_frame)
    }

    pub fn start_time(&self) -> i64 {
        self.with_core(|_, core, key| {
            frame_to_time(core.nodes[key].start_frame, core.frame_rate(key))
        })
    }

    /// Shifts where the content starts on the owner's timeline. The node
    /// stays pinned to the same frame of that timeline; only its mapping
    /// to content moves.
    pub fn set_start_time(&self, time: i64) {
        self.with_core(|_, core, key| {
            let rate = core.frame_rate(key);
            let start = time_to_frame(time, rate);
            if core.nodes[key].start_frame == start {
                return;
            }
            let layer_frame = core.nodes[key].start_frame + core.nodes[key].content_frame;
            core.nodes[key].start_frame = start;
            if let Some(parent) = core.nodes[key].parent {
                core.refresh_empty_extent(parent);
            }
            core.goto_time_and_notify(key, frame_to_time(layer_frame, rate));
            core.notify_audio_modified(key);
        });
    }

    /// Time on this layer's own timeline, including its start offset.
    pub fn current_time(&self) -> i64 {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            frame_to_time(node.start_frame + node.content_frame, core.frame_rate(key))
        })
    }

    /// Seeks this layer's timeline, driving its track matte and children.
    /// Returns whether any effective content frame changed.
    pub fn set_current_time(&self, time: i64) -> bool {
        self.with_core(|_, core, key| {
            let changed = core.goto_time(key, time);
            if changed {
                core.notify_modified(key);
            }
            changed
        })
    }

    pub fn progress(&self) -> f64 {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            frame_to_progress(node.content_frame, node.duration)
        })
    }

    /// Seeks by normalized progress; 1.0 lands on the last valid frame.
    pub fn set_progress(&self, progress: f64) {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            let frame = progress_to_frame(progress, node.duration);
            let time = frame_to_time(node.start_frame + frame, core.frame_rate(key));
            core.goto_time_and_notify(key, time);
        });
    }

    /// Steps to the next content frame, wrapping at the end. A timeline of
    /// one frame or less does not move.
    pub fn next_frame(&self) {
        self.step_frame(1);
    }

    /// Steps to the previous content frame, wrapping at the start.
    pub fn previous_frame(&self) {
        self.step_frame(-1);
    }

    fn step_frame(&self, direction: Frame) {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            let total = node.duration;
            if total <= 1 {
                return;
            }
            let frame = (node.content_frame + direction).rem_euclid(total);
            let time = frame_to_time(node.start_frame + frame, core.frame_rate(key));
            core.goto_time_and_notify(key, time);
        });
    }

    /// Converts a frame of this layer's content (frame 0 is the first
    /// content frame) to the timeline of its outermost owner.
    pub fn local_frame_to_global(&self, local_frame: Frame) -> Frame {
        self.with_core(|_, core, key| core.local_frame_to_global(key, local_frame))
    }

    /// Converts a frame of the outermost timeline to a content frame of
    /// this layer.
    pub fn global_to_local_frame(&self, global_frame: Frame) -> Frame {
        self.with_core(|_, core, key| core.global_to_local_frame(key, global_frame))
    }

    pub fn local_time_to_global(&self, time: i64) -> i64 {
        self.with_core(|_, core, key| {
            let frame = time_to_frame(time, core.frame_rate(key));
            let global = core.local_frame_to_global(key, frame);
            let root_rate = core.frame_rate(core.timeline_root(key));
            frame_to_time(global, root_rate)
        })
    }

    pub fn global_to_local_time(&self, time: i64) -> i64 {
        self.with_core(|_, core, key| {
            let root_rate = core.frame_rate(core.timeline_root(key));
            let local = core.global_to_local_frame(key, time_to_frame(time, root_rate));
            frame_to_time(local, core.frame_rate(key))
        })
    }

    /// Final matrix and alpha of the content at the current frame, or
    /// `None` when the frame is outside the content, the matrix is not
    /// invertible, or nothing would be drawn.
    pub fn resolve_transform(&self) -> Option<ResolvedTransform> {
        self.with_core(|_, core, key| core.resolve_transform(key))
    }

    /// Untransformed bounds of the content at the current frame.
    pub fn bounds(&self) -> Rect {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            node.content.bounds(node.content_frame)
        })
    }

    pub fn content(&self) -> Option<ContentHandle> {
        self.with_core(|_, core, key| {
            let node = &core.nodes[key];
            node.content.content(node.content_frame)
        })
    }

    pub fn parent(&self) -> Option<Composition> {
        self.with_core(|tree, core, key| {
            core.nodes[key]
                .parent
                .map(|p| Composition::from_handle(make_handle(tree, core, p)))
        })
    }

    pub fn track_matte(&self) -> Option<Layer> {
        self.with_core(|tree, core, key| {
            core.nodes[key]
                .matte_layer
                .map(|m| make_handle(tree, core, m))
        })
    }

    /// Assigns `matte` as this layer's track matte, detaching it from any
    /// previous owner. `None` releases the current matte into a tree of
    /// its own.
    pub fn set_track_matte(&self, matte: Option<&Layer>) -> Result<(), TreeError> {
        match matte {
            Some(matte) => self.attach_matte(matte),
            None => {
                self.with_core(|_, core, key| {
                    if let Some(old) = core.nodes[key].matte_layer {
                        unlink_from_owner(core, old);
                        detach_into_new_tree(core, old);
                        core.notify_modified(key);
                    }
                });
                Ok(())
            }
        }
    }

    fn attach_matte(&self, matte: &Layer) -> Result<(), TreeError> {
        if matte.unique_id == self.unique_id {
            return Err(TreeError::WouldCycle);
        }
        loop {
            let (self_tree, self_key) = self.home_snapshot();
            let (matte_tree, matte_key) = matte.home_snapshot();
            let (mut self_guard, matte_guard) = lock_pair(&self_tree, &matte_tree);
            if !self.home_matches(&self_tree, self_key)
                || !matte.home_matches(&matte_tree, matte_key)
            {
                continue;
            }
            let core = &mut *self_guard;
            match matte_guard {
                None => {
                    if core.nodes[self_key].matte_layer == Some(matte_key) {
                        return Ok(());
                    }
                    if core.is_ancestor(matte_key, self_key) {
                        tracing::warn!(
                            layer = self.unique_id,
                            matte = matte.unique_id,
                            "rejected track matte that would create a cycle"
                        );
                        return Err(TreeError::WouldCycle);
                    }
                    if let Some(old) = core.nodes[self_key].matte_layer {
                        unlink_from_owner(core, old);
                        detach_into_new_tree(core, old);
                    }
                    if let Some(former) = unlink_from_owner(core, matte_key) {
                        core.refresh_empty_extent(former);
                        core.notify_modified(former);
                    }
                    core.nodes[self_key].matte_layer = Some(matte_key);
                    core.nodes[matte_key].matte_owner = Some(self_key);
                }
                Some(mut matte_core) => {
                    if let Some(old) = core.nodes[self_key].matte_layer {
                        unlink_from_owner(core, old);
                        detach_into_new_tree(core, old);
                    }
                    if let Some(former) = unlink_from_owner(&mut matte_core, matte_key) {
                        matte_core.refresh_empty_extent(former);
                        matte_core.notify_modified(former);
                    }
                    move_subtree(
                        &mut matte_core,
                        matte_key,
                        core,
                        &self_tree,
                        AttachTarget::Matte { owner: self_key },
                    );
                }
            }
            core.notify_modified(self_key);
            return Ok(());
        }
    }

    /// Removes this layer from its parent composition or matte owner. The
    /// subtree keeps playing in a tree of its own, under a fresh lock.
    pub fn detach(&self) {
        self.with_core(|_, core, key| {
            if let Some(former) = unlink_from_owner(core, key) {
                core.refresh_empty_extent(former);
                core.notify_modified(former);
                detach_into_new_tree(core, key);
            }
        });
    }

    /// Attaches the whole tree containing this layer to `stage`, replacing
    /// any previous stage.
    pub fn attach_to_stage(&self, stage: Arc<dyn Stage>) {
        self.with_core(|_, core, _| {
            if let Some(old) = core.stage.take() {
                for node in core.nodes.values() {
                    old.remove_reference(node.unique_id);
                }
            }
            for node in core.nodes.values() {
                stage.add_reference(node.unique_id);
            }
            core.stage = Some(stage);
        });
    }

    pub fn detach_from_stage(&self) {
        self.with_core(|_, core, _| {
            if let Some(stage) = core.stage.take() {
                for node in core.nodes.values() {
                    stage.remove_reference(node.unique_id);
                }
            }
        });
    }

    /// Whether both handles currently share one tree, and therefore one
    /// lock.
    pub fn in_same_tree(&self, other: &Layer) -> bool {
        let (tree, _) = self.home_snapshot();
        let (other_tree, _) = other.home_snapshot();
        Arc::ptr_eq(&tree, &other_tree)
    }

    pub fn as_composition(&self) -> Option<Composition> {
        self.with_core(|_, core, key| match core.nodes[key].kind {
            NodeKind::Composition(_) => Some(Composition::from_handle(self.clone())),
            NodeKind::Leaf => None,
        })
    }
}
