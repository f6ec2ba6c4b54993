//! Runtime layer timeline and transform composition.
//!
//! A tree of layers and nested compositions maps a play time on the
//! outermost timeline to a content frame for every node, remapping frame
//! rates level by level. Mutations propagate version counters up the
//! tree, and every attached tree synchronizes on a single shared lock.

pub mod composition;
pub mod content;
pub mod layer;
pub mod time;
pub mod tree;

pub use composition::Composition;
pub use content::{
    ContentHandle, ContentProvider, ContentTransform, FileScope, ResolvedTransform, Stage,
    StaticContent,
};
pub use layer::{Layer, LayerInfo};
pub use time::{
    frame_to_progress, frame_to_time, progress_to_frame, time_to_frame, Frame,
    FALLBACK_FRAME_RATE,
};
pub use tree::TreeError;
