mod middleware;
mod render;

pub use render::{RenderState, build_router};
