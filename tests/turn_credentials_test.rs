use std::sync::Arc;
use std::time::Duration;
use webrtc_kit::test_utils::{FailingMockHttpClient, MockHttpClient};
use webrtc_kit::turn::{
    CachedTurnCredentialService, FallbackTurnCredentialService, HttpTurnCredentialService,
    SharedSecretTurnCredentialService, TurnCredentialService, verify_rest_credential,
};
use webrtckit_core::net::HttpResponse;

const CREDENTIAL_JSON: &str = r#"{
    "username": "1700003600:session-1",
    "password": "c2VjcmV0",
    "ttl": 3600,
    "uris": ["turn:turn.example.org:3478?transport=udp", "turns:turn.example.org:5349"]
}"#;

fn chain(
    http: Arc<dyn webrtckit_core::net::HttpClient>,
) -> FallbackTurnCredentialService<CachedTurnCredentialService<HttpTurnCredentialService>> {
    FallbackTurnCredentialService::new(CachedTurnCredentialService::new(
        HttpTurnCredentialService::new(http, "https://api.example.org")
            .with_timeout(Duration::from_secs(2)),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_are_retried_then_cached() {
    let _ = env_logger::builder().is_test(true).try_init();
    let http = Arc::new(MockHttpClient::new());
    http.push_response(HttpResponse::new(503, Vec::new()));
    http.push_response(HttpResponse::new(200, CREDENTIAL_JSON));
    let service = chain(http.clone());

    let credential = service.get_credentials("session-1").await.unwrap();
    assert_eq!(credential.username, "1700003600:session-1");
    assert_eq!(credential.urls.len(), 2);
    assert!(!credential.is_stun_only());

    let again = service.get_credentials("session-1").await.unwrap();
    assert_eq!(again, credential);
    assert_eq!(http.requests().len(), 2);
    assert!(
        http.requests()[0]
            .url
            .starts_with("https://api.example.org/turn/credentials?session=session-1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_api_falls_back_to_stun() {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = chain(Arc::new(FailingMockHttpClient));

    let credential = service.get_credentials("session-1").await.unwrap();
    assert!(credential.is_stun_only());
    assert!(credential.urls.iter().all(|u| u.starts_with("stun:")));
}

#[tokio::test]
async fn test_unauthorized_falls_back_without_retrying() {
    let http = Arc::new(MockHttpClient::new());
    http.push_response(HttpResponse::new(401, Vec::new()));
    let service = chain(http.clone());

    let credential = service.get_credentials("session-1").await.unwrap();
    assert!(credential.is_stun_only());
    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn test_shared_secret_credentials_verify() {
    let service = SharedSecretTurnCredentialService::new("s3cret", "turn.example.org", 3478)
        .unwrap()
        .with_ttl(600);
    let credential = service.get_credentials("bob").await.unwrap();

    let (expiry, user) = credential.username.split_once(':').unwrap();
    assert_eq!(user, "bob");
    let expiry: i64 = expiry.parse().unwrap();
    assert!(
        verify_rest_credential("s3cret", &credential.username, &credential.password, expiry - 1)
            .unwrap()
    );
    assert!(
        !verify_rest_credential("other", &credential.username, &credential.password, expiry - 1)
            .unwrap()
    );
    assert_eq!(credential.ttl, 600);
}
