//! Authentication: token validation, caching and delegated-token resolution

pub mod cache;
pub mod profile;
pub mod provider;
pub mod store;
pub mod validator;

pub use cache::TokenCache;
pub use profile::{AuthOutcome, UserProfile};
pub use provider::{IdentityProvider, OAuth2Provider, RefreshedTokens};
pub use store::{FileTokenStore, TokenRecord, TokenStore};
pub use validator::TokenValidator;
