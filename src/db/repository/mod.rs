//! Repository layer: entity-scoped database operations.
//!
//! One sub-module per stored entity. All public functions are re-exported
//! here so callers can use `crate::db::repository::*`.

mod check_in;
mod circle;
mod emergency;
mod missed_alert;
mod need;
mod responsibility;
mod user;

// Re-export all public items from sub-modules
pub use check_in::*;
pub use circle::*;
pub use emergency::*;
pub use missed_alert::*;
pub use need::*;
pub use responsibility::*;
pub use user::*;
