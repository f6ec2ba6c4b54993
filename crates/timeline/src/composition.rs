//! Composition handles and child management.

use std::ops::Deref;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::layer::{make_handle, Layer, LayerInfo};
use crate::time::FALLBACK_FRAME_RATE;
use crate::tree::{
    detach_into_new_tree, lock_pair, move_subtree, unlink_from_owner, AttachTarget,
    CompositionState, NodeKey, NodeKind, TreeError,
};

/// A layer that owns an ordered list of child layers.
///
/// Dereferences to [`Layer`], so every layer operation applies to a
/// composition as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Composition {
    layer: Layer,
}

impl Deref for Composition {
    type Target = Layer;

    fn deref(&self) -> &Layer {
        &self.layer
    }
}

impl Default for Composition {
    fn default() -> Self {
        Composition::new()
    }
}

impl Composition {
    /// An empty composition whose frame rate and duration follow its
    /// children.
    pub fn new() -> Composition {
        let info = LayerInfo {
            duration: 0,
            ..LayerInfo::default()
        };
        Composition {
            layer: Layer::with_kind(
                info,
                NodeKind::Composition(CompositionState {
                    children: SmallVec::new(),
                    empty: true,
                    frame_rate: FALLBACK_FRAME_RATE,
                }),
            ),
        }
    }

    /// A composition with fixed timing, typically loaded from a file.
    pub fn from_info(info: LayerInfo) -> Composition {
        Composition {
            layer: Layer::with_kind(
                info,
                NodeKind::Composition(CompositionState {
                    children: SmallVec::new(),
                    empty: false,
                    frame_rate: FALLBACK_FRAME_RATE,
                }),
            ),
        }
    }

    pub(crate) fn from_handle(layer: Layer) -> Composition {
        Composition { layer }
    }

    pub fn as_layer(&self) -> &Layer {
        &self.layer
    }

    pub fn layer_count(&self) -> usize {
        self.layer.with_core(|_, core, key| match &core.nodes[key].kind {
            NodeKind::Composition(state) => state.children.len(),
            NodeKind::Leaf => 0,
        })
    }

    pub fn layer_at(&self, index: usize) -> Option<Layer> {
        self.layer.with_core(|tree, core, key| {
            let child = match &core.nodes[key].kind {
                NodeKind::Composition(state) => state.children.get(index).copied(),
                NodeKind::Leaf => None,
            };
            child.map(|c| make_handle(tree, core, c))
        })
    }

    /// Position of `layer` in paint order, if it is a child.
    pub fn index_of(&self, layer: &Layer) -> Option<usize> {
        self.layer.with_core(|_, core, key| match &core.nodes[key].kind {
            NodeKind::Composition(state) => state
                .children
                .iter()
                .position(|&c| core.nodes[c].unique_id == layer.unique_id()),
            NodeKind::Leaf => None,
        })
    }

    /// Snapshot of the current children, bottom to top.
    pub fn layers(&self) -> Vec<Layer> {
        self.layer.with_core(|tree, core, key| {
            let children: SmallVec<[NodeKey; 4]> = match &core.nodes[key].kind {
                NodeKind::Composition(state) => state.children.clone(),
                NodeKind::Leaf => SmallVec::new(),
            };
            children
                .into_iter()
                .map(|c| make_handle(tree, core, c))
                .collect()
        })
    }

    /// Appends `layer` as the topmost child, detaching it from any
    /// previous owner. Afterwards the whole subtree shares this tree's
    /// lock.
    pub fn add_layer(&self, layer: &Layer) -> Result<(), TreeError> {
        self.insert_layer(layer, None)
    }

    /// Inserts `layer` at `index` in paint order.
    pub fn add_layer_at(&self, layer: &Layer, index: usize) -> Result<(), TreeError> {
        self.insert_layer(layer, Some(index))
    }

    fn insert_layer(&self, layer: &Layer, index: Option<usize>) -> Result<(), TreeError> {
        if layer.unique_id() == self.layer.unique_id() {
            return Err(TreeError::WouldCycle);
        }
        loop {
            let (self_tree, self_key) = self.layer.home_snapshot();
            let (child_tree, child_key) = layer.home_snapshot();
            let (mut self_guard, child_guard) = lock_pair(&self_tree, &child_tree);
            if !self.layer.home_matches(&self_tree, self_key)
                || !layer.home_matches(&child_tree, child_key)
            {
                continue;
            }
            let core = &mut *self_guard;
            let len = match &core.nodes[self_key].kind {
                NodeKind::Composition(state) => state.children.len(),
                NodeKind::Leaf => 0,
            };
            let index = index.unwrap_or(len);
            if index > len {
                return Err(TreeError::IndexOutOfRange(index));
            }
            match child_guard {
                None => {
                    // Same tree: the child may be an ancestor.
                    if core.is_ancestor(child_key, self_key) {
                        tracing::warn!(
                            composition = self.layer.unique_id(),
                            layer = layer.unique_id(),
                            "rejected add that would create a cycle"
                        );
                        return Err(TreeError::WouldCycle);
                    }
                    if let Some(former) = unlink_from_owner(core, child_key) {
                        core.refresh_empty_extent(former);
                        core.notify_modified(former);
                    }
                    core.nodes[child_key].parent = Some(self_key);
                    if let NodeKind::Composition(state) = &mut core.nodes[self_key].kind {
                        let index = index.min(state.children.len());
                        state.children.insert(index, child_key);
                    }
                }
                Some(mut child_core) => {
                    if let Some(former) = unlink_from_owner(&mut child_core, child_key) {
                        child_core.refresh_empty_extent(former);
                        child_core.notify_modified(former);
                    }
                    move_subtree(
                        &mut child_core,
                        child_key,
                        core,
                        &self_tree,
                        AttachTarget::Child {
                            parent: self_key,
                            index,
                        },
                    );
                }
            }
            core.refresh_empty_extent(self_key);
            core.notify_modified(self_key);
            return Ok(());
        }
    }

    /// Removes `layer`, which keeps playing in a tree of its own, under a
    /// fresh lock.
    pub fn remove_layer(&self, layer: &Layer) -> Result<(), TreeError> {
        loop {
            let (tree, key) = self.layer.home_snapshot();
            let mut guard = tree.lock();
            if !self.layer.home_matches(&tree, key) {
                continue;
            }
            let core = &mut *guard;
            let (child_tree, child_key) = layer.home_snapshot();
            if !Arc::ptr_eq(&child_tree, &tree) || core.nodes[child_key].parent != Some(key) {
                return Err(TreeError::NotInComposition);
            }
            unlink_from_owner(core, child_key);
            detach_into_new_tree(core, child_key);
            core.refresh_empty_extent(key);
            core.notify_modified(key);
            return Ok(());
        }
    }

    /// Removes and returns the child at `index`.
    pub fn remove_layer_at(&self, index: usize) -> Result<Layer, TreeError> {
        self.layer.with_core(|tree, core, key| {
            let child = match &core.nodes[key].kind {
                NodeKind::Composition(state) => state.children.get(index).copied(),
                NodeKind::Leaf => None,
            };
            let child = child.ok_or(TreeError::IndexOutOfRange(index))?;
            let handle = make_handle(tree, core, child);
            unlink_from_owner(core, child);
            detach_into_new_tree(core, child);
            core.refresh_empty_extent(key);
            core.notify_modified(key);
            Ok(handle)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FileScope, Stage, StaticContent};
    use crate::time::{frame_to_time, Frame};
    use common::{Rect, Transform};
    use parking_lot::Mutex;

    fn animated_layer(duration: Frame) -> Layer {
        Layer::new(LayerInfo {
            duration,
            content: Arc::new(StaticContent::animated(Rect::new(0.0, 0.0, 10.0, 10.0))),
            ..LayerInfo::default()
        })
    }

    fn timed_composition(duration: Frame, start_frame: Frame, frame_rate: f32) -> Composition {
        Composition::from_info(LayerInfo {
            duration,
            start_frame,
            file: Some(Arc::new(FileScope::new(frame_rate))),
            content: Arc::new(StaticContent::animated(Rect::ZERO)),
            ..LayerInfo::default()
        })
    }

    #[test]
    fn test_children_keep_paint_order() {
        let comp = Composition::new();
        let a = animated_layer(24);
        let b = animated_layer(24);
        let c = animated_layer(24);
        comp.add_layer(&a).unwrap();
        comp.add_layer(&b).unwrap();
        comp.add_layer_at(&c, 1).unwrap();

        assert_eq!(comp.layer_count(), 3);
        assert_eq!(comp.index_of(&a), Some(0));
        assert_eq!(comp.index_of(&c), Some(1));
        assert_eq!(comp.index_of(&b), Some(2));
        assert_eq!(comp.layer_at(1), Some(c.clone()));
        assert_eq!(comp.layers(), vec![a.clone(), c, b]);
        assert_eq!(a.parent(), Some(comp.clone()));
    }

    #[test]
    fn test_add_layer_out_of_range() {
        let comp = Composition::new();
        let layer = animated_layer(24);
        assert_eq!(
            comp.add_layer_at(&layer, 1),
            Err(TreeError::IndexOutOfRange(1))
        );
    }

    #[test]
    fn test_add_merges_locks_and_remove_splits_them() {
        let comp = Composition::new();
        let child = animated_layer(24);
        let grandchild = animated_layer(24);
        let inner = Composition::new();
        inner.add_layer(&grandchild).unwrap();
        assert!(!comp.in_same_tree(&grandchild));

        comp.add_layer(inner.as_layer()).unwrap();
        comp.add_layer(&child).unwrap();
        assert!(comp.in_same_tree(&grandchild));
        assert!(comp.in_same_tree(&child));

        comp.remove_layer(inner.as_layer()).unwrap();
        assert!(!comp.in_same_tree(&grandchild));
        // The removed subtree stays connected under its own lock.
        assert!(inner.in_same_tree(&grandchild));
        assert!(comp.in_same_tree(&child));
    }

    #[test]
    fn test_remove_layer_not_a_child() {
        let comp = Composition::new();
        let other = Composition::new();
        let layer = animated_layer(24);
        other.add_layer(&layer).unwrap();
        assert_eq!(comp.remove_layer(&layer), Err(TreeError::NotInComposition));
        assert_eq!(
            comp.remove_layer_at(0).unwrap_err(),
            TreeError::IndexOutOfRange(0)
        );
    }

    #[test]
    fn test_remove_layer_at_returns_handle() {
        let comp = Composition::new();
        let layer = animated_layer(24);
        comp.add_layer(&layer).unwrap();
        let removed = comp.remove_layer_at(0).unwrap();
        assert_eq!(removed, layer);
        assert_eq!(comp.layer_count(), 0);
        assert_eq!(layer.parent(), None);
    }

    #[test]
    fn test_cycle_rejected() {
        let outer = Composition::new();
        let inner = Composition::new();
        outer.add_layer(inner.as_layer()).unwrap();

        assert_eq!(
            inner.add_layer(outer.as_layer()),
            Err(TreeError::WouldCycle)
        );
        assert_eq!(
            outer.add_layer(outer.as_layer()),
            Err(TreeError::WouldCycle)
        );
        // The failed adds left the tree untouched.
        assert_eq!(outer.layer_count(), 1);
        assert_eq!(inner.layer_count(), 0);
    }

    #[test]
    fn test_version_bump_skips_siblings() {
        let root = Composition::new();
        let middle = Composition::new();
        let deep = animated_layer(24);
        let sibling = animated_layer(24);
        middle.add_layer(&deep).unwrap();
        root.add_layer(middle.as_layer()).unwrap();
        root.add_layer(&sibling).unwrap();

        let root_version = root.content_version();
        let sibling_version = sibling.content_version();
        deep.set_alpha(0.5);

        assert!(root.content_version() > root_version);
        assert!(middle.content_version() > 0);
        assert_eq!(sibling.content_version(), sibling_version);
    }

    #[test]
    fn test_nested_frame_remapping() {
        // A 30 fps composition starting at frame 10 holds a 10 fps layer
        // starting at frame 5 of the composition's timeline.
        let comp = timed_composition(100, 10, 30.0);
        let child = Layer::new(LayerInfo {
            duration: 20,
            start_frame: 5,
            file: Some(Arc::new(FileScope::new(10.0))),
            content: Arc::new(StaticContent::animated(Rect::ZERO)),
            ..LayerInfo::default()
        });
        comp.add_layer(&child).unwrap();

        assert_eq!(child.local_frame_to_global(0), 25);
        assert_eq!(child.global_to_local_frame(25), 0);
        assert_eq!(child.local_frame_to_global(6), 43);
        assert_eq!(child.global_to_local_frame(43), 6);

        // Driving the composition's clock lands the child on the same
        // frame the static walk predicts.
        comp.set_current_time(frame_to_time(25, 30.0));
        assert_eq!(comp.content_frame(), 15);
        assert_eq!(child.content_frame(), 0);
    }

    #[test]
    fn test_seek_propagates_through_levels() {
        let root = Composition::new();
        let inner = Composition::new();
        let leaf = animated_layer(120);
        inner.add_layer(&leaf).unwrap();
        root.add_layer(inner.as_layer()).unwrap();

        // Everything here runs at the fallback rate, so frames line up.
        assert!(root.set_current_time(frame_to_time(12, 60.0)));
        assert_eq!(leaf.content_frame(), 12);
        assert!(!root.set_current_time(frame_to_time(12, 60.0)));
    }

    #[test]
    fn test_empty_composition_extent_follows_children() {
        let comp = Composition::new();
        assert_eq!(comp.frame_count(), 0);
        assert_eq!(comp.frame_rate(), 60.0);

        let layer = animated_layer(24);
        comp.add_layer(&layer).unwrap();
        assert_eq!(comp.frame_count(), 24);

        // Pushing the child's start extends the composition.
        layer.set_start_time(frame_to_time(6, 60.0));
        assert_eq!(comp.frame_count(), 30);

        comp.remove_layer(&layer).unwrap();
        assert_eq!(comp.frame_count(), 0);
    }

    #[test]
    fn test_fixed_composition_extent_is_stable() {
        let comp = timed_composition(50, 0, 30.0);
        let layer = animated_layer(500);
        comp.add_layer(&layer).unwrap();
        assert_eq!(comp.frame_count(), 50);
        assert_eq!(comp.frame_rate(), 30.0);
    }

    #[derive(Default)]
    struct RecordingStage {
        events: Mutex<Vec<(&'static str, u32)>>,
    }

    impl RecordingStage {
        fn events(&self) -> Vec<(&'static str, u32)> {
            self.events.lock().clone()
        }
    }

    impl Stage for RecordingStage {
        fn add_reference(&self, layer_id: u32) {
            self.events.lock().push(("add", layer_id));
        }

        fn remove_reference(&self, layer_id: u32) {
            self.events.lock().push(("remove", layer_id));
        }

        fn invalidate_cache_scale(&self, layer_id: u32) {
            self.events.lock().push(("invalidate", layer_id));
        }
    }

    #[test]
    fn test_stage_reference_tracking() {
        let stage = Arc::new(RecordingStage::default());
        let comp = Composition::new();
        comp.attach_to_stage(stage.clone());
        assert_eq!(stage.events(), vec![("add", comp.unique_id())]);

        let layer = animated_layer(24);
        comp.add_layer(&layer).unwrap();
        assert!(stage.events().contains(&("add", layer.unique_id())));

        layer.set_matrix(Transform::translation(1.0, 0.0));
        assert!(stage.events().contains(&("invalidate", layer.unique_id())));

        comp.remove_layer(&layer).unwrap();
        assert!(stage.events().contains(&("remove", layer.unique_id())));

        comp.detach_from_stage();
        assert!(stage.events().contains(&("remove", comp.unique_id())));
    }

    #[test]
    fn test_reparent_across_trees_moves_whole_subtree() {
        let first = Composition::new();
        let second = Composition::new();
        let inner = Composition::new();
        let leaf = animated_layer(24);
        let matte = animated_layer(24);
        inner.add_layer(&leaf).unwrap();
        leaf.set_track_matte(Some(&matte)).unwrap();
        first.add_layer(inner.as_layer()).unwrap();

        second.add_layer(inner.as_layer()).unwrap();
        assert_eq!(first.layer_count(), 0);
        assert_eq!(second.index_of(inner.as_layer()), Some(0));
        assert!(second.in_same_tree(&leaf));
        assert!(second.in_same_tree(&matte));
        assert_eq!(leaf.track_matte(), Some(matte));

        // Handles made before the move still work.
        leaf.set_alpha(0.25);
        assert!(second.content_modified());
    }

    #[test]
    fn test_detach_leaves_subtree_playable() {
        let comp = Composition::new();
        let inner = Composition::new();
        let leaf = animated_layer(24);
        inner.add_layer(&leaf).unwrap();
        comp.add_layer(inner.as_layer()).unwrap();

        inner.detach();
        assert_eq!(comp.layer_count(), 0);
        assert!(!comp.in_same_tree(&leaf));
        assert!(inner.set_current_time(frame_to_time(3, 60.0)));
        assert_eq!(leaf.content_frame(), 3);
    }
}
