//! Safe SQL builder: identifiers from entity declarations only, values as parameters.

mod builder;
pub mod params;
mod predicate;
pub use builder::*;
pub use params::*;
pub use predicate::Predicate;
