//! Software rendering of stimulus shapes for the demo host.

pub mod render;
pub mod scene;

pub use render::{FrameStats, SkiaRenderer, rasterize};
pub use scene::{Scene, SceneHandle};
