//! OAuth credential handling for the agenda engine.
//!
//! [`GoogleOAuth2Provider`] talks to the identity endpoint; [`TokenManager`]
//! owns the stored credential and keeps the access token fresh.

pub mod error;
pub mod google;
pub mod tokens;

pub use error::AuthError;
pub use google::{GoogleOAuth2Provider, TokenEndpoint, TokenGrant};
pub use tokens::TokenManager;
