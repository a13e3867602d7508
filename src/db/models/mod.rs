//! Database models split into domain-specific modules.

pub mod campaign;
pub mod link;
pub mod metric;
pub mod user;

pub use campaign::*;
pub use link::*;
pub use metric::*;
pub use user::*;
