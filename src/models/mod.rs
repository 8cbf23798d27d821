pub mod billing;
pub mod calendly;
pub mod clinic;
pub mod compliance;
pub mod diagnosis;
pub mod enums;
pub mod filters;
pub mod finance;
pub mod location;
pub mod patient;
pub mod recurring;
pub mod report;
pub mod treatment;
pub mod user;

pub use billing::*;
pub use calendly::*;
pub use clinic::*;
pub use compliance::*;
pub use diagnosis::*;
pub use enums::*;
pub use filters::*;
pub use finance::*;
pub use location::*;
pub use patient::*;
pub use recurring::*;
pub use report::*;
pub use treatment::*;
pub use user::*;
