//! Monthly, quarterly and annual income/tax aggregation for
//! self-employed practitioners.

pub mod figure;
pub mod report;
pub mod settings;

pub use figure::*;
pub use report::*;
pub use settings::*;
