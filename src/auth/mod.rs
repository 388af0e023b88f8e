mod client;
mod context;
mod store;

pub use client::AuthClient;
pub use context::{AuthContext, Role, UserAuthData};
pub use store::CredentialStore;
