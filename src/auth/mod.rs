// Authentication module
// Credential store, request/response interceptors and refresh coordination

mod interceptor;
mod manager;
mod refresh;
mod store;
pub(crate) mod types;

pub use interceptor::{authorization_value, AuthHeaderInterceptor};
pub use manager::AuthManager;
pub use refresh::{RefreshCoordinator, RefreshInterceptor, RefreshOutcome, REFRESH_PATH};
pub use store::{Credential, CredentialSnapshot, CredentialStore, Session};
pub use types::DataEnvelope;
