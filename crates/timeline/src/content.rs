//! Hooks connecting the timeline to the rendering side.

use common::{Rect, Transform};

use crate::time::Frame;

/// Transform contributed by a layer's own content at a given frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContentTransform {
    pub matrix: Transform,
    pub alpha: f32,
    pub visible: bool,
}

impl Default for ContentTransform {
    fn default() -> Self {
        Self {
            matrix: Transform::identity(),
            alpha: 1.0,
            visible: true,
        }
    }
}

/// Opaque identifier of drawable content, keyed by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentHandle(pub u64);

/// The final transform of a layer resolved at its current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedTransform {
    pub matrix: Transform,
    pub alpha: f32,
}

/// Per-frame content supplied by whatever owns the layer's visuals.
pub trait ContentProvider: Send + Sync {
    /// Transform the content itself applies at `frame`, combined under the
    /// layer's own matrix and alpha.
    fn transform(&self, frame: Frame) -> ContentTransform {
        let _ = frame;
        ContentTransform::default()
    }

    /// Whether moving from `previous` to `current` changes what is drawn.
    fn frame_changed(&self, current: Frame, previous: Frame) -> bool;

    /// Untransformed bounds of the content at `frame`.
    fn bounds(&self, frame: Frame) -> Rect;

    /// Drawable content at `frame`, if any.
    fn content(&self, frame: Frame) -> Option<ContentHandle> {
        let _ = frame;
        None
    }
}

/// Content with fixed bounds; optionally frame-dependent.
#[derive(Clone, Copy, Debug)]
pub struct StaticContent {
    bounds: Rect,
    animated: bool,
}

impl StaticContent {
    /// Still content: no frame ever changes what is drawn.
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            animated: false,
        }
    }

    /// Content that redraws on every frame change.
    pub fn animated(bounds: Rect) -> Self {
        Self {
            bounds,
            animated: true,
        }
    }
}

impl ContentProvider for StaticContent {
    fn frame_changed(&self, current: Frame, previous: Frame) -> bool {
        self.animated && current != previous
    }

    fn bounds(&self, _frame: Frame) -> Rect {
        self.bounds
    }
}

/// Host surface that tracks which layers are attached to it.
///
/// Callbacks run while the tree lock is held and must not call back into
/// the tree.
pub trait Stage: Send + Sync {
    fn add_reference(&self, layer_id: u32);
    fn remove_reference(&self, layer_id: u32);
    /// The layer's matrix changed; any cached rasterization scale for it
    /// is stale.
    fn invalidate_cache_scale(&self, layer_id: u32);
}

/// Timing metadata shared by every layer loaded from the same file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FileScope {
    frame_rate: f32,
}

impl FileScope {
    pub fn new(frame_rate: f32) -> Self {
        Self { frame_rate }
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }
}
