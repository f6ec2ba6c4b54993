//! Common geometry types used across the playback engine.

pub mod geometry;

pub use geometry::{DecomposedTransform, Point, Rect, Size, Transform};
