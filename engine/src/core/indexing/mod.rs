//! Indexing System Module
//!
//! Frame numbering, keyframe layout scanning and per-video metadata.

pub mod catalog;
pub mod frame_index;
pub mod layout;

pub use catalog::{parse_timestamp, VideoCatalog};
pub use frame_index::{Boundary, FrameIndex, FrameIndexBuilder, FrameIndexStore, VideoFrames};
pub use layout::{load_manifest, LayoutScanner};
