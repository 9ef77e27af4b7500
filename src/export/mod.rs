pub mod csv;
pub mod report;
pub mod snapshot;

pub use csv::*;
pub use report::*;
pub use snapshot::*;
