use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::interceptor::AuthHeaderInterceptor;
use super::refresh::{RefreshCoordinator, RefreshInterceptor, RefreshOutcome};
use super::store::{Credential, CredentialSnapshot, CredentialStore, Session};
use super::types::{DataEnvelope, LoginForm};
use crate::error::{ClientError, Result};
use crate::http_client::{ApiRequest, HttpClient, InterceptorId};

const LOGIN_PATH: &str = "/login";
const CREATE_USER_PATH: &str = "/create-user";
const LOGOUT_PATH: &str = "/logout";

/// Authentication manager
/// Owns the session lifecycle: login, registration, logout, refresh and bootstrap
pub struct AuthManager {
    /// Client every session call goes through
    client: Arc<HttpClient>,

    /// Current credential
    store: Arc<CredentialStore>,

    /// Single in-flight refresh
    coordinator: Arc<RefreshCoordinator>,

    /// Interceptors registered on the client by `install`
    installed: Mutex<Option<(InterceptorId, InterceptorId)>>,
}

impl AuthManager {
    pub fn new(client: Arc<HttpClient>, store: Arc<CredentialStore>) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::clone(&store)));
        Self {
            client,
            store,
            coordinator,
            installed: Mutex::new(None),
        }
    }

    /// Register the auth header and refresh interceptors on the client
    ///
    /// Both read the store live, so this happens once, not on every credential change.
    pub async fn install(&self) {
        let mut installed = self.installed.lock().await;
        if installed.is_some() {
            return;
        }

        let header_id = self
            .client
            .add_request_interceptor(Arc::new(AuthHeaderInterceptor::new(Arc::clone(
                &self.store,
            ))))
            .await;
        let refresh_id = self
            .client
            .add_response_interceptor(Arc::new(RefreshInterceptor::new(Arc::clone(
                &self.coordinator,
            ))))
            .await;

        tracing::debug!("Auth interceptors installed");
        *installed = Some((header_id, refresh_id));
    }

    /// Remove the interceptors added by `install`
    pub async fn uninstall(&self) {
        if let Some((header_id, refresh_id)) = self.installed.lock().await.take() {
            self.client.remove_request_interceptor(header_id).await;
            self.client.remove_response_interceptor(refresh_id).await;
            tracing::debug!("Auth interceptors removed");
        }
    }

    pub fn client(&self) -> &Arc<HttpClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn session(&self) -> Session {
        self.store.session()
    }

    /// Session changes, for whatever renders authenticated vs. login views
    pub fn subscribe(&self) -> watch::Receiver<CredentialSnapshot> {
        self.store.subscribe()
    }

    /// Log in and store the returned credential
    ///
    /// Bad credentials surface as `Validation`, never as an authentication failure.
    pub async fn login(&self, username: &str, password: &str, persistent: bool) -> Result<()> {
        tracing::info!(username, persistent, "Logging in");

        let form = LoginForm {
            username,
            password,
            persistent,
        };
        let request = ApiRequest::post(LOGIN_PATH).json(&form)?.not_refreshable();

        let response = self.client.send(request).await.map_err(|e| match e {
            ClientError::AuthenticationFailure { status, message } => {
                ClientError::Validation { status, message }
            }
            other => other,
        })?;

        let token = response.json::<DataEnvelope<String>>()?.into_data();
        if token.is_empty() {
            return Err(ClientError::InvalidResponse(
                "Login response does not contain a credential".to_string(),
            ));
        }

        self.store.set(Some(Credential::new(token)));
        tracing::info!(username, "Logged in");
        Ok(())
    }

    /// Create an account, then log in with it
    pub async fn register(&self, username: &str, password: &str, persistent: bool) -> Result<()> {
        tracing::info!(username, "Creating account");

        let form = LoginForm {
            username,
            password,
            persistent,
        };
        let request = ApiRequest::post(CREATE_USER_PATH)
            .json(&form)?
            .not_refreshable();

        let response = self.client.send(request).await?;
        if let Ok(envelope) = response.json::<DataEnvelope<String>>() {
            tracing::debug!(message = %envelope.data, "Account created");
        }

        self.login(username, password, persistent).await
    }

    /// Log out on the backend and clear the credential
    ///
    /// The store is cleared even when the backend call fails.
    pub async fn logout(&self) -> Result<()> {
        tracing::info!("Logging out");

        let result = self.client.send(ApiRequest::get(LOGOUT_PATH)).await;
        self.store.clear();

        match result {
            Ok(_) => Ok(()),
            // No refresh cookie left on the backend side: already logged out
            Err(ClientError::Http { status, .. }) if is_redirect(status) => Ok(()),
            // Expired and the refresh cookie is gone too
            Err(ClientError::AuthenticationFailure { .. }) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Backend logout failed, local session cleared anyway");
                Err(e)
            }
        }
    }

    /// Exchange the persisted refresh cookie for a new credential
    ///
    /// Joins a refresh that is already in flight instead of starting another.
    pub async fn refresh(&self) -> Result<Credential> {
        match self.coordinator.refresh(&self.client).await {
            RefreshOutcome::Refreshed(credential) => Ok(credential),
            RefreshOutcome::Failed(reason) => Err(ClientError::RefreshFailure(reason)),
        }
    }

    /// Try once to restore a session from the persisted refresh cookie
    ///
    /// No retries and no polling: failure leaves the session anonymous.
    pub async fn bootstrap(&self) -> Session {
        tracing::info!("Restoring session...");
        match self.refresh().await {
            Ok(_) => tracing::info!("✅ Session restored"),
            Err(e) => tracing::info!(reason = %e, "No session to restore, login required"),
        }
        self.store.session()
    }
}

fn is_redirect(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s.is_redirection())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn manager_for(server: &mockito::ServerGuard) -> AuthManager {
        let client = Arc::new(HttpClient::new(Url::parse(&server.url()).unwrap(), 5, 5).unwrap());
        AuthManager::new(client, Arc::new(CredentialStore::new()))
    }

    #[tokio::test]
    async fn test_install_is_idempotent_and_reversible() {
        let mut server = mockito::Server::new_async().await;
        let with_header = server
            .mock("GET", "/get-user-links")
            .match_header("authorization", "tok123")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;
        let without_header = server
            .mock("GET", "/get-user-links")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let manager = manager_for(&server);
        manager.store().set(Some(Credential::new("tok123")));
        manager.install().await;
        manager.install().await;

        manager
            .client
            .send(ApiRequest::get("/get-user-links"))
            .await
            .unwrap();

        manager.uninstall().await;
        manager
            .client
            .send(ApiRequest::get("/get-user-links"))
            .await
            .unwrap();

        with_header.assert_async().await;
        without_header.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_with_bad_credentials_is_validation_error() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .with_status(401)
            .with_body(r#"{"error":"Invalid Credentials"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("GET", "/refresh")
            .with_status(200)
            .with_body(r#"{"data":"tok-unexpected"}"#)
            .expect(0)
            .create_async()
            .await;

        let manager = manager_for(&server);
        manager.install().await;

        let err = manager.login("alice", "wrong", false).await.unwrap_err();
        match err {
            ClientError::Validation { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.session(), Session::Anonymous);
        login.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_clears_store_even_when_backend_fails() {
        let mut server = mockito::Server::new_async().await;
        let _logout = server
            .mock("GET", "/logout")
            .with_status(500)
            .with_body(r#"{"error":"Internal server error"}"#)
            .create_async()
            .await;

        let manager = manager_for(&server);
        manager.install().await;
        manager.store().set(Some(Credential::new("tok123")));

        let err = manager.logout().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(manager.session(), Session::Anonymous);
    }

    #[tokio::test]
    async fn test_logout_redirect_means_already_logged_out() {
        let mut server = mockito::Server::new_async().await;
        let _logout = server
            .mock("GET", "/logout")
            .with_status(303)
            .with_header("location", "/")
            .create_async()
            .await;

        let manager = manager_for(&server);
        manager.install().await;
        manager.store().set(Some(Credential::new("tok123")));

        manager.logout().await.unwrap();
        assert!(manager.store().get().is_none());
    }

    #[tokio::test]
    async fn test_refresh_with_empty_credential_fails() {
        let mut server = mockito::Server::new_async().await;
        let _refresh = server
            .mock("GET", "/refresh")
            .with_status(200)
            .with_body(r#"{"data":""}"#)
            .create_async()
            .await;

        let manager = manager_for(&server);
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, ClientError::RefreshFailure(_)));
        assert!(manager.store().get().is_none());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_stays_logged_out() {
        let mut server = mockito::Server::new_async().await;
        let logout = server
            .mock("GET", "/logout")
            .match_header("authorization", "tok123")
            .with_status(200)
            .with_body(r#"{"data":"Logged out"}"#)
            .expect(1)
            .create_async()
            .await;

        let manager = manager_for(&server);
        manager.install().await;
        manager.store().set(Some(Credential::new("tok123")));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        // Refresh answers only after the user has logged out
        let refresh = manager.coordinator.run(None, || async move {
            gate.await.unwrap();
            RefreshOutcome::Refreshed(Credential::new("tok-late"))
        });
        let user = async {
            manager.logout().await.unwrap();
            release.send(()).unwrap();
        };

        let (outcome, ()) = tokio::join!(refresh, user);

        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        assert!(manager.store().get().is_none());
        assert_eq!(manager.session(), Session::Anonymous);
        logout.assert_async().await;
    }
}
