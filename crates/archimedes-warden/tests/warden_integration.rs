//! Integration tests against a mock warden decision endpoint.
//!
//! These run the full decision flow (config, templates, request building,
//! HTTP, response interpretation) through the `reqwest` transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use archimedes_warden::config::{ToggleSettings, WardenSettings};
use archimedes_warden::{
    Authorizer, AuthenticationSession, AuthorizersConfig, ClientConfig, InboundRequest,
    WardenAuthorizer, WardenError,
};
use http::{HeaderMap, HeaderValue, Method, Uri};
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(defaults: Value) -> Arc<AuthorizersConfig> {
    Arc::new(AuthorizersConfig {
        warden: WardenSettings {
            enabled: true,
            config: defaults,
            client: ClientConfig::default(),
        },
        allow: ToggleSettings::default(),
        deny: ToggleSettings::default(),
    })
}

fn fixed_context(_: &InboundRequest) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("remoteIpAddress".to_string(), json!("192.0.2.10"));
    context.insert("requestedAt".to_string(), json!("2024-05-01T12:00:00Z"));
    context
}

fn authorizer_with(client: &ClientConfig) -> WardenAuthorizer {
    WardenAuthorizer::with_reqwest(provider(Value::Null), client)
        .unwrap()
        .with_context_supplier(fixed_context)
}

fn authorizer() -> WardenAuthorizer {
    authorizer_with(&ClientConfig::default())
}

fn inbound() -> InboundRequest {
    InboundRequest::new(Method::GET, Uri::from_static("/documents/7"))
}

fn rule(server: &MockServer) -> Value {
    json!({
        "required_action": "",
        "required_resource": "read",
        "subject": "{{.Subject}}",
        "base_url": server.uri()
    })
}

async fn mount(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/warden/allowed"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_allowed_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/warden/allowed"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "action": "unset",
            "resource": "read",
            "subject": "alice",
            "context": {
                "remoteIpAddress": "192.0.2.10",
                "requestedAt": "2024-05-01T12:00:00Z"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let result = authorizer()
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
        .await;

    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn test_not_allowed_is_forbidden() {
    for body in [json!({"allowed": false}), json!({})] {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200).set_body_json(body)).await;

        let err = authorizer()
            .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
            .await
            .unwrap_err();

        assert!(err.is_forbidden());
    }
}

#[tokio::test]
async fn test_403_is_forbidden_regardless_of_body() {
    for body in ["", "<html>nope</html>", r#"{"allowed": true}"#] {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(403).set_body_string(body)).await;

        let err = authorizer()
            .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
            .await
            .unwrap_err();

        assert!(err.is_forbidden(), "body {body:?} gave {err:?}");
    }
}

#[tokio::test]
async fn test_500_is_unexpected_status() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(500).set_body_json(json!({"allowed": true})),
    )
    .await;

    let err = authorizer()
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
        .await
        .unwrap_err();

    assert!(matches!(err, WardenError::UnexpectedStatus { status: 500 }));
    assert!(err.to_string().contains("500"));
    assert!(!err.is_forbidden());
}

#[tokio::test]
async fn test_invalid_body_is_decode_error() {
    let server = MockServer::start().await;
    mount(&server, ResponseTemplate::new(200).set_body_string("allowed")).await;

    let err = authorizer()
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
        .await
        .unwrap_err();

    assert!(matches!(err, WardenError::Decode(_)));
}

#[tokio::test]
async fn test_base_url_path_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/keto/warden/allowed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let config = json!({
        "required_action": "read",
        "base_url": format!("{}/keto/", server.uri())
    });

    authorizer()
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &config)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_global_defaults_merged_with_rule() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/warden/allowed"))
        .and(body_partial_json(json!({
            "action": "documents:read",
            "resource": "rn:acme:documents",
            "subject": "bob"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let warden = WardenAuthorizer::with_reqwest(
        provider(json!({"base_url": server.uri(), "required_action": "documents:read"})),
        &ClientConfig::default(),
    )
    .unwrap();
    let session = AuthenticationSession::new("bob").with_extra("tenant", "acme");
    let config = json!({"required_resource": "rn:{{.Extra.tenant}}:documents"});

    warden.authorize(&inbound(), &session, &config).await.unwrap();
}

#[tokio::test]
async fn test_malformed_base_url_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(0)
        .mount(&server)
        .await;

    let warden = authorizer();
    let config = json!({"required_action": "read", "base_url": "not-a-url"});

    assert!(matches!(
        warden.validate(&config),
        Err(WardenError::Misconfigured { .. })
    ));
    let err = warden
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &config)
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"allowed": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let warden = authorizer_with(&ClientConfig {
        timeout_ms: 200,
        ..ClientConfig::default()
    });

    let err = warden
        .authorize(&inbound(), &AuthenticationSession::new("alice"), &rule(&server))
        .await
        .unwrap_err();

    assert!(matches!(err, WardenError::Transport { timed_out: true, .. }));
    assert!(err.is_retryable());
    assert!(!err.is_forbidden());
}

#[tokio::test]
async fn test_cancelled_call_returns_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"allowed": true}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let warden = authorizer();
    let session = AuthenticationSession::new("alice");
    let config = rule(&server);
    let request = inbound();

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        warden.authorize(&request, &session, &config),
    )
    .await;

    assert!(outcome.is_err());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_templates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/warden/allowed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(32)
        .mount(&server)
        .await;

    let warden = Arc::new(authorizer());
    let config = Arc::new(json!({
        "required_action": "documents:read",
        "required_resource": "rn:{{.Extra.tenant}}:documents",
        "subject": "user:{{.Subject}}",
        "base_url": server.uri()
    }));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let warden = Arc::clone(&warden);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let session =
                    AuthenticationSession::new(format!("user-{i}")).with_extra("tenant", "acme");
                let request = inbound();
                let outcome = warden.authorize(&request, &session, &config).await;
                outcome
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let cache = warden.template_cache();
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.stats().hits + cache.stats().misses, 96);
}

#[tokio::test]
async fn test_default_context_uses_forwarded_client_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "context": {"remoteIpAddress": "203.0.113.9"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .expect(1)
        .mount(&server)
        .await;

    let warden =
        WardenAuthorizer::with_reqwest(provider(Value::Null), &ClientConfig::default()).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.4, 203.0.113.9"));
    let peer: SocketAddr = "10.0.0.1:40000".parse().unwrap();
    let request = inbound().with_headers(headers).with_remote_addr(peer);

    warden
        .authorize(&request, &AuthenticationSession::new("alice"), &rule(&server))
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body["context"]["requestedAt"].as_str().unwrap().ends_with('Z'));
}
