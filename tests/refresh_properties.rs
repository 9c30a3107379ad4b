// Property tests for refresh coordination
//
// However many requests fail with an expired credential at once, the
// backend sees exactly one refresh call.

use futures::future::join_all;
use proptest::prelude::*;
use reqwest::Url;
use std::sync::Arc;

use shortlink_client::auth::{AuthManager, Credential, CredentialStore};
use shortlink_client::http_client::{ApiRequest, HttpClient};

async fn expired_burst(concurrent: usize) -> (usize, Option<Credential>) {
    let mut server = mockito::Server::new_async().await;
    let _expired = server
        .mock("GET", "/get-user-links")
        .match_header("authorization", "tok-old")
        .with_status(401)
        .with_body(r#"{"error":"User not authenticated"}"#)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", "/refresh")
        .with_status(200)
        .with_body(r#"{"data":"tok-new"}"#)
        .expect(1)
        .create_async()
        .await;
    let links = server
        .mock("GET", "/get-user-links")
        .match_header("authorization", "tok-new")
        .with_status(200)
        .with_body(r#"{"data":[]}"#)
        .expect(concurrent)
        .create_async()
        .await;

    let client = Arc::new(HttpClient::new(Url::parse(&server.url()).unwrap(), 5, 5).unwrap());
    let store = Arc::new(CredentialStore::new());
    store.set(Some(Credential::new("tok-old")));
    let auth = AuthManager::new(Arc::clone(&client), Arc::clone(&store));
    auth.install().await;

    let results = join_all(
        (0..concurrent).map(|_| client.send(ApiRequest::get("/get-user-links"))),
    )
    .await;
    let succeeded = results.iter().filter(|r| r.is_ok()).count();

    refresh.assert_async().await;
    links.assert_async().await;
    (succeeded, store.get())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn expired_burst_triggers_one_refresh(concurrent in 1usize..8) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (succeeded, credential) = runtime.block_on(expired_burst(concurrent));

        prop_assert_eq!(succeeded, concurrent);
        prop_assert_eq!(credential, Some(Credential::new("tok-new")));
    }

    #[test]
    fn valid_credential_never_refreshes(concurrent in 1usize..8) {
        let outcome = tokio_test::block_on(async {
            let mut server = mockito::Server::new_async().await;
            let refresh = server
                .mock("GET", "/refresh")
                .with_status(200)
                .with_body(r#"{"data":"unused"}"#)
                .expect(0)
                .create_async()
                .await;
            let _links = server
                .mock("GET", "/get-user-links")
                .match_header("authorization", "tok123")
                .with_status(200)
                .with_body(r#"{"data":[]}"#)
                .create_async()
                .await;

            let client = Arc::new(HttpClient::new(Url::parse(&server.url()).unwrap(), 5, 5).unwrap());
            let store = Arc::new(CredentialStore::new());
            store.set(Some(Credential::new("tok123")));
            let auth = AuthManager::new(Arc::clone(&client), Arc::clone(&store));
            auth.install().await;

            let results = join_all(
                (0..concurrent).map(|_| client.send(ApiRequest::get("/get-user-links"))),
            )
            .await;
            refresh.assert_async().await;
            results.iter().filter(|r| r.is_ok()).count()
        });

        prop_assert_eq!(outcome, concurrent);
    }
}
