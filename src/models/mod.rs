pub mod alert;
pub mod check_in;
pub mod circle;
pub mod emergency;
pub mod enums;
pub mod event;
pub mod need;
pub mod responsibility;
pub mod user;

pub use alert::*;
pub use check_in::*;
pub use circle::*;
pub use emergency::*;
pub use event::*;
pub use need::*;
pub use responsibility::*;
pub use user::*;
