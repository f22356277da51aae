//! Session-domain identifiers, user records, and the persisted auth session model.

pub mod id;
pub mod session;
pub mod user;

mod secret;

pub use id::*;
pub use secret::*;
pub use session::*;
pub use user::*;
