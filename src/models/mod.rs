//! Data models

mod account_token;
mod api_key;
mod session;
mod user;

pub use account_token::*;
pub use api_key::*;
pub use session::*;
pub use user::*;
