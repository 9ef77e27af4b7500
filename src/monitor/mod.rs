pub mod engine;
pub mod handle;

pub use engine::*;
pub use handle::*;
