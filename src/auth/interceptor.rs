// Authorization header interceptor

use anyhow::Context;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;

use super::store::{Credential, CredentialStore};
use crate::error::ClientError;
use crate::http_client::{ApiRequest, RequestInterceptor};

/// Build the `Authorization` header value for a credential
///
/// The backend validates the raw header value, so no scheme prefix is added.
pub fn authorization_value(credential: &Credential) -> Result<HeaderValue, ClientError> {
    let mut value = HeaderValue::from_str(credential.as_str())
        .context("Credential is not a valid header value")?;
    value.set_sensitive(true);
    Ok(value)
}

/// Attaches the current credential to outgoing requests
///
/// Reads the store at dispatch time, so a credential replaced after
/// registration is picked up without re-registering.
pub struct AuthHeaderInterceptor {
    store: Arc<CredentialStore>,
}

impl AuthHeaderInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl RequestInterceptor for AuthHeaderInterceptor {
    fn on_request(&self, request: &mut ApiRequest) -> Result<(), ClientError> {
        // Retries carry the credential the refresh produced
        if request.retried {
            return Ok(());
        }

        let snapshot = self.store.snapshot();
        request.observed_generation = Some(snapshot.generation);

        if let Some(ref credential) = snapshot.credential {
            request
                .headers
                .insert(AUTHORIZATION, authorization_value(credential)?);
            request.credential_bearing = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attaches_current_credential() {
        let store = Arc::new(CredentialStore::new());
        store.set(Some(Credential::new("tok123")));
        let interceptor = AuthHeaderInterceptor::new(Arc::clone(&store));

        let mut request = ApiRequest::post("/shorten-link");
        interceptor.on_request(&mut request).unwrap();

        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "tok123");
        assert!(request.credential_bearing);
        assert_eq!(request.observed_generation, Some(1));
    }

    #[test]
    fn test_absent_credential_passes_through() {
        let store = Arc::new(CredentialStore::new());
        let interceptor = AuthHeaderInterceptor::new(store);

        let mut request = ApiRequest::get("/get-user-links");
        interceptor.on_request(&mut request).unwrap();

        assert!(request.headers.get(AUTHORIZATION).is_none());
        assert!(!request.credential_bearing);
        assert_eq!(request.observed_generation, Some(0));
    }

    #[test]
    fn test_reads_live_value_not_registration_value() {
        let store = Arc::new(CredentialStore::new());
        store.set(Some(Credential::new("tok-old")));
        let interceptor = AuthHeaderInterceptor::new(Arc::clone(&store));

        store.set(Some(Credential::new("tok-new")));
        let mut request = ApiRequest::get("/get-user-links");
        interceptor.on_request(&mut request).unwrap();
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "tok-new");

        store.clear();
        let mut request = ApiRequest::get("/get-user-links");
        interceptor.on_request(&mut request).unwrap();
        assert!(request.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_retried_request_is_left_alone() {
        let store = Arc::new(CredentialStore::new());
        store.set(Some(Credential::new("tok-current")));
        let interceptor = AuthHeaderInterceptor::new(Arc::clone(&store));

        let mut request = ApiRequest::get("/get-user-links");
        request.retried = true;
        request
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("tok-refreshed"));
        interceptor.on_request(&mut request).unwrap();

        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "tok-refreshed");
        assert_eq!(request.observed_generation, None);
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let store = Arc::new(CredentialStore::new());
        store.set(Some(Credential::new("bad\ntoken")));
        let interceptor = AuthHeaderInterceptor::new(store);

        let mut request = ApiRequest::get("/get-user-links");
        let err = interceptor.on_request(&mut request).unwrap_err();
        assert!(matches!(err, ClientError::Internal(_)));
    }
}
