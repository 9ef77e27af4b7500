pub mod history;
pub mod probe;
pub mod session;
pub mod stats;

pub use history::*;
pub use probe::*;
pub use session::*;
pub use stats::*;
