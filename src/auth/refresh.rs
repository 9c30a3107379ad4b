// Credential refresh coordination
// At most one refresh call is in flight; concurrent authentication failures share its outcome

use futures::future::BoxFuture;
use reqwest::header::AUTHORIZATION;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::interceptor::authorization_value;
use super::store::{Credential, CredentialStore};
use super::types::DataEnvelope;
use crate::error::ClientError;
use crate::http_client::{ApiRequest, ApiResponse, HttpClient, ResponseInterceptor};

/// Endpoint exchanging the persisted refresh cookie for a new credential
pub const REFRESH_PATH: &str = "/refresh";

/// Result of one refresh cycle, shared by every request waiting on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(Credential),
    Failed(String),
}

enum RefreshState {
    Idle,
    InFlight {
        cycle: u64,
        outcome: watch::Receiver<Option<RefreshOutcome>>,
    },
}

enum Role<'a> {
    /// Runs the refresh call and publishes its outcome
    Leader(CycleGuard<'a>),
    /// Waits for the leader of the current cycle
    Follower(watch::Receiver<Option<RefreshOutcome>>),
    /// The credential was already replaced since the failing request was sent
    Settled(RefreshOutcome),
}

/// Owns the single in-flight refresh
///
/// The first authentication failure becomes the leader of a cycle and issues
/// the refresh call; failures arriving while it runs attach to the same
/// cycle. The cycle is cleared when it settles so a later expiry starts a new one.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    state: Mutex<RefreshState>,
    next_cycle: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            state: Mutex::new(RefreshState::Idle),
            next_cycle: AtomicU64::new(1),
        }
    }

    /// Whether a refresh cycle is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::InFlight { .. })
    }

    /// Start a refresh, or join the one already in flight
    pub async fn refresh(&self, client: &HttpClient) -> RefreshOutcome {
        self.recover(client, None).await
    }

    /// Resolve an authentication failure of a request sent at `observed_generation`
    pub async fn recover(
        &self,
        client: &HttpClient,
        observed_generation: Option<u64>,
    ) -> RefreshOutcome {
        self.run(observed_generation, || request_new_credential(client))
            .await
    }

    pub(super) async fn run<F, Fut>(&self, observed_generation: Option<u64>, fetch: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let guard = loop {
            match self.join(observed_generation) {
                Role::Settled(outcome) => return outcome,
                Role::Follower(outcome) => {
                    tracing::debug!("Refresh already in flight, waiting for its outcome");
                    match wait_for_outcome(outcome).await {
                        Some(outcome) => return outcome,
                        // Leader went away without an answer; take over the cycle
                        None => tracing::debug!("Refresh leader abandoned, rejoining"),
                    }
                }
                Role::Leader(guard) => break guard,
            }
        };

        tracing::debug!(cycle = guard.cycle, "Starting refresh cycle");
        let outcome = fetch().await;
        guard.settle(outcome)
    }

    fn join(&self, observed_generation: Option<u64>) -> Role<'_> {
        let mut state = self.lock_state();

        if let Some(observed) = observed_generation {
            let snapshot = self.store.snapshot();
            if snapshot.generation > observed {
                tracing::debug!(
                    observed,
                    current = snapshot.generation,
                    "Credential replaced since dispatch, skipping refresh"
                );
                return Role::Settled(match snapshot.credential {
                    Some(credential) => RefreshOutcome::Refreshed(credential),
                    None => RefreshOutcome::Failed(
                        "Session ended while the request was in flight".to_string(),
                    ),
                });
            }
        }

        if let RefreshState::InFlight { ref outcome, .. } = *state {
            return Role::Follower(outcome.clone());
        }

        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        *state = RefreshState::InFlight { cycle, outcome: rx };

        Role::Leader(CycleGuard {
            coordinator: self,
            cycle,
            generation: self.store.snapshot().generation,
            tx: Some(tx),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leader's handle on its cycle
///
/// Dropping it unsettled (the leader's caller went away) clears the cycle
/// without touching the store; followers then rejoin and one of them leads.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    cycle: u64,
    /// Store generation when the cycle opened
    generation: u64,
    tx: Option<watch::Sender<Option<RefreshOutcome>>>,
}

impl CycleGuard<'_> {
    /// Apply the outcome to the store and publish it to followers
    ///
    /// A login or logout that happened while the call was in flight wins:
    /// the store is left alone and its current state is published instead.
    fn settle(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
        let outcome = {
            let mut state = self.coordinator.lock_state();
            let store = &self.coordinator.store;
            let current = store.snapshot();

            let outcome = if current.generation != self.generation {
                tracing::info!(
                    cycle = self.cycle,
                    opened_at = self.generation,
                    current = current.generation,
                    "Credential replaced during refresh, keeping the newer state"
                );
                match current.credential {
                    Some(credential) => RefreshOutcome::Refreshed(credential),
                    None => RefreshOutcome::Failed("Session ended during refresh".to_string()),
                }
            } else {
                match outcome {
                    RefreshOutcome::Refreshed(ref credential) => {
                        tracing::info!(credential = %credential, "Credential refreshed");
                        store.set(Some(credential.clone()));
                    }
                    RefreshOutcome::Failed(ref reason) => {
                        tracing::warn!(reason = %reason, "Credential refresh failed, clearing session");
                        store.clear();
                    }
                }
                outcome
            };

            *state = RefreshState::Idle;
            outcome
        };

        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome.clone()));
        }
        outcome
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }

        let mut state = self.coordinator.lock_state();
        if matches!(*state, RefreshState::InFlight { cycle, .. } if cycle == self.cycle) {
            tracing::warn!(cycle = self.cycle, "Refresh abandoned before it settled");
            *state = RefreshState::Idle;
        }
    }
}

/// Outcome published by the leader, or `None` if it was dropped unsettled
async fn wait_for_outcome(
    mut rx: watch::Receiver<Option<RefreshOutcome>>,
) -> Option<RefreshOutcome> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    }
}

/// Call the refresh endpoint once
async fn request_new_credential(client: &HttpClient) -> RefreshOutcome {
    tracing::info!("Refreshing access credential...");

    let request = ApiRequest::get(REFRESH_PATH).not_refreshable();
    let response = match client.send(request).await {
        Ok(response) => response,
        Err(e) => return RefreshOutcome::Failed(e.to_string()),
    };

    match response.json::<DataEnvelope<String>>() {
        Ok(envelope) if !envelope.data.is_empty() => {
            RefreshOutcome::Refreshed(Credential::new(envelope.into_data()))
        }
        Ok(_) => RefreshOutcome::Failed("Refresh response does not contain a credential".into()),
        Err(e) => RefreshOutcome::Failed(e.to_string()),
    }
}

/// Turns authentication failures into refresh-and-retry
///
/// Only refreshable, not-yet-retried requests that failed with an
/// authentication failure are touched; every other outcome passes through.
pub struct RefreshInterceptor {
    coordinator: Arc<RefreshCoordinator>,
}

impl RefreshInterceptor {
    pub fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl ResponseInterceptor for RefreshInterceptor {
    fn on_response<'a>(
        &'a self,
        client: &'a HttpClient,
        request: &'a ApiRequest,
        outcome: Result<ApiResponse, ClientError>,
    ) -> BoxFuture<'a, Result<ApiResponse, ClientError>> {
        Box::pin(async move {
            let failure = match outcome {
                Err(e) if e.is_authentication_failure() && request.refreshable && !request.retried => e,
                other => return other,
            };

            tracing::warn!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                "Authentication failure, refreshing credential"
            );

            match self
                .coordinator
                .recover(client, request.observed_generation)
                .await
            {
                RefreshOutcome::Refreshed(credential) => {
                    let mut retry = request.clone();
                    retry.retried = true;
                    retry.credential_bearing = true;
                    retry
                        .headers
                        .insert(AUTHORIZATION, authorization_value(&credential)?);

                    tracing::debug!(
                        request_id = %retry.request_id,
                        "Retrying request with refreshed credential"
                    );
                    client.send(retry).await
                }
                RefreshOutcome::Failed(reason) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        reason = %reason,
                        "Refresh did not recover the request"
                    );
                    Err(failure)
                }
            }
        })
    }
}
