use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sl_auth::{
    AuthError, AuthEvent, AuthOrchestrator, AuthSettings, SessionStore, TokenExchangeError, UrlOpener,
};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingOpener {
    opened: Mutex<Vec<Url>>,
}

impl UrlOpener for RecordingOpener {
    fn open(&self, url: &Url) -> std::io::Result<()> {
        self.opened.lock().push(url.clone());
        Ok(())
    }
}

struct Harness {
    orchestrator: AuthOrchestrator,
    opener: Arc<RecordingOpener>,
    store: SessionStore,
    port: u16,
    _server: MockServer,
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn harness(token_response: ResponseTemplate, expected_exchanges: u64) -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("client_id=desktop"))
        .respond_with(token_response)
        .expect(expected_exchanges)
        .mount(&server)
        .await;

    let port = free_port();
    let settings = AuthSettings {
        client_id: Some("desktop".into()),
        client_secret: Some("shh".into()),
        authorize_url: Some(format!("{}/oauth/authorize", server.uri())),
        token_url: Some(format!("{}/oauth/token", server.uri())),
        redirect_port: Some(port),
        scopes: Some(vec!["openid".into(), "offline_access".into()]),
        ..Default::default()
    };
    let store = SessionStore::new();
    let opener = Arc::new(RecordingOpener::default());
    let orchestrator = AuthOrchestrator::with_opener(settings, store.clone(), opener.clone());

    Harness {
        orchestrator,
        opener,
        store,
        port,
        _server: server,
    }
}

fn ok_tokens() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": "access-123",
        "refresh_token": "refresh-456",
        "expires_in": 3600,
        "token_type": "Bearer"
    }))
}

fn state_param(url: &Url) -> String {
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorization URL carries a state")
}

/// Act like the browser following the provider's redirect
async fn redirect(port: u16, query: &str) {
    let response = reqwest::get(format!("http://127.0.0.1:{port}/callback?{query}"))
        .await
        .expect("loopback listener reachable");
    assert_eq!(response.status(), 200);
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_valid_callback_authenticates_and_closes_listener() {
    let h = harness(ok_tokens(), 1).await;
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _sub = h.orchestrator.on_authenticated(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let accepted = h.orchestrator.start_authorization().await.unwrap();
    let params: std::collections::HashMap<_, _> =
        accepted.authorization_url.query_pairs().into_owned().collect();
    assert_eq!(params["client_id"], "desktop");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["scope"], "openid offline_access");
    assert_eq!(
        params["redirect_uri"],
        format!("http://localhost:{}/callback", h.port)
    );

    // The browser receives the whole URL, every `&`-joined parameter intact
    let opened = h.opener.opened.lock().clone();
    assert_eq!(opened, vec![accepted.authorization_url.clone()]);
    assert_eq!(opened[0].query_pairs().count(), 5);

    let state = state_param(&accepted.authorization_url);
    redirect(h.port, &format!("code=abc&state={state}")).await;

    assert!(wait_until(|| h.store.status()).await);
    assert!(wait_until(|| notified.load(Ordering::SeqCst) == 1).await);
    let tokens = h.store.tokens().unwrap();
    assert_eq!(tokens.access_token.as_str(), "access-123");
    assert!(h.orchestrator.pending().is_none());

    // Listener is gone: the port can be bound again
    let rebound = sl_auth::listener::bind(h.port).await;
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn test_superseded_state_never_authenticates() {
    let h = harness(ok_tokens(), 0).await;

    let first = h.orchestrator.start_authorization().await.unwrap();
    let second = h.orchestrator.start_authorization().await.unwrap();
    let old_state = state_param(&first.authorization_url);
    assert_ne!(old_state, state_param(&second.authorization_url));

    redirect(h.port, &format!("code=abc&state={old_state}")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!h.store.status());
    assert!(h.orchestrator.pending().is_some(), "newer attempt stays pending");
    h.orchestrator.cancel().await;
}

#[tokio::test]
async fn test_mismatched_state_is_ignored_and_attempt_survives() {
    let h = harness(ok_tokens(), 1).await;
    let accepted = h.orchestrator.start_authorization().await.unwrap();
    let state = state_param(&accepted.authorization_url);

    redirect(h.port, "code=abc&state=not-the-state").await;
    redirect(h.port, &format!("state={state}")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.store.status());
    assert!(h.orchestrator.pending().is_some());

    // A later valid callback still completes the same attempt
    redirect(h.port, &format!("code=abc&state={state}")).await;
    assert!(wait_until(|| h.store.status()).await);
}

#[tokio::test]
async fn test_non_callback_paths_are_answered_but_ignored() {
    let h = harness(ok_tokens(), 0).await;
    let accepted = h.orchestrator.start_authorization().await.unwrap();
    let state = state_param(&accepted.authorization_url);

    let response = reqwest::get(format!(
        "http://127.0.0.1:{}/favicon.ico?code=abc&state={state}",
        h.port
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!h.store.status());
    assert!(h.orchestrator.pending().is_some());
    h.orchestrator.cancel().await;
}

#[tokio::test]
async fn test_failed_exchange_emits_error_and_stays_logged_out() {
    let h = harness(ResponseTemplate::new(500).set_body_string("upstream broke"), 1).await;
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let _sub = h.orchestrator.subscribe(move |event| {
        if let AuthEvent::Failed(e) = event {
            sink.lock().push(e.kind());
            assert!(matches!(
                e,
                AuthError::TokenExchange(TokenExchangeError::Http { .. })
            ));
        }
    });

    let accepted = h.orchestrator.start_authorization().await.unwrap();
    let state = state_param(&accepted.authorization_url);
    redirect(h.port, &format!("code=abc&state={state}")).await;

    assert!(wait_until(|| !failures.lock().is_empty()).await);
    assert_eq!(*failures.lock(), vec!["TokenExchangeError"]);
    assert!(!h.store.status());
    assert!(h.orchestrator.pending().is_none());
}

#[tokio::test]
async fn test_replayed_callback_after_success_is_ignored() {
    let h = harness(ok_tokens(), 1).await;
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    let _sub = h.orchestrator.on_authenticated(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let accepted = h.orchestrator.start_authorization().await.unwrap();
    let state = state_param(&accepted.authorization_url);
    redirect(h.port, &format!("code=abc&state={state}")).await;
    assert!(wait_until(|| h.store.status()).await);

    // Same state again goes nowhere: the attempt no longer exists
    let outcome = h
        .orchestrator
        .handle_callback("/callback", &format!("code=abc&state={state}"))
        .await;
    assert_eq!(outcome, sl_auth::CallbackOutcome::NoPendingAuthorization);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    h.orchestrator.logout();
    h.orchestrator.logout();
    assert!(!h.orchestrator.status());
}

#[tokio::test]
async fn test_no_callback_times_out() {
    let server = MockServer::start().await;
    let port = free_port();
    let settings = AuthSettings {
        client_id: Some("desktop".into()),
        client_secret: Some("shh".into()),
        authorize_url: Some(format!("{}/oauth/authorize", server.uri())),
        token_url: Some(format!("{}/oauth/token", server.uri())),
        redirect_port: Some(port),
        scopes: Some(vec!["openid".into()]),
        timeout_secs: Some(1),
        ..Default::default()
    };
    let store = SessionStore::new();
    let orchestrator =
        AuthOrchestrator::with_opener(settings, store.clone(), Arc::new(RecordingOpener::default()));

    let timed_out = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&timed_out);
    let _sub = orchestrator.subscribe(move |event| {
        if matches!(event, AuthEvent::Failed(AuthError::AuthenticationTimeout { .. })) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    orchestrator.start_authorization().await.unwrap();
    assert!(wait_until(|| timed_out.load(Ordering::SeqCst) == 1).await);
    assert!(!store.status());
    assert!(orchestrator.pending().is_none());
}
