//! Request middleware: header injection, identity authentication, transaction scoping.
//!
//! Layer order (outermost first): `inject`, `authenticate`, `transaction`.

pub mod authentication;
pub mod injection;
pub mod transaction;

pub use authentication::authenticate;
pub use injection::inject;
pub use transaction::{decide, transaction, Outcome, ReportedError, RollbackReason};
