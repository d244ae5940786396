use client_config::{Config, RenewalSettings};
use credential_store::{Credential, CredentialStore, Profile, SessionEndReason, SessionEvent};
use request_pipeline::{ApiError, ApiRequest, MultipartForm, RenewalPhase, RequestPipeline};
use serde_json::json;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    Config {
        api_url: server.uri(),
        renewal: RenewalSettings {
            max_retries: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
        },
        ..Config::default()
    }
}

fn logged_in_store(access: &str) -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::in_memory());
    store
        .set(Credential::new(access, "refresh-1", Profile::new("1")))
        .unwrap();
    store
}

fn record_events(store: &CredentialStore) -> Arc<Mutex<Vec<SessionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    store.set_session_listener(Box::new(move |event| sink.lock().unwrap().push(event.clone())));
    events
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh"))
        .and(body_json(json!({ "refresh": "refresh-1" })))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_401s_share_one_renewal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token expired" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(5)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": "new-token" }))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let results = futures_util::future::join_all(
        (0..5).map(|_| pipeline.send(ApiRequest::get("/tasks/"))),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap().status, 200);
    }
    assert_eq!(store.access_token().as_deref(), Some("new-token"));
    assert_eq!(store.refresh_token().as_deref(), Some("refresh-1"));
    assert_eq!(pipeline.renewal_phase(), RenewalPhase::Idle);
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/meetings/"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/meetings/"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": "new-token", "refresh": "refresh-2" })),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    pipeline.send(ApiRequest::get("/meetings/")).await.unwrap();
    assert_eq!(store.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn renewal_failure_clears_once_and_fails_all_waiters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/decisions/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401)
            .set_body_json(json!({ "detail": "Token is invalid or expired" }))
            .set_delay(Duration::from_millis(100)),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let events = record_events(&store);
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let results = futures_util::future::join_all(
        (0..3).map(|_| pipeline.send(ApiRequest::get("/decisions/"))),
    )
    .await;

    for result in results {
        assert!(matches!(result, Err(ApiError::AuthExpired)));
    }
    assert!(store.get().is_none());
    assert_eq!(pipeline.renewal_phase(), RenewalPhase::Failed);

    let ended: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, SessionEvent::Ended { .. }))
        .cloned()
        .collect();
    assert_eq!(
        ended,
        vec![SessionEvent::Ended {
            reason: SessionEndReason::RenewalFailed
        }]
    );
}

#[tokio::test]
async fn replay_401_ends_session_without_second_renewal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "access": "new-token" })),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let events = record_events(&store);
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let result = pipeline.send(ApiRequest::get("/documents/")).await;

    assert!(matches!(result, Err(ApiError::AuthExpired)));
    assert!(store.get().is_none());
    assert_eq!(pipeline.renewal_phase(), RenewalPhase::Failed);
    assert!(events.lock().unwrap().contains(&SessionEvent::Ended {
        reason: SessionEndReason::Rejected
    }));
}

#[tokio::test]
async fn stale_token_replays_without_renewing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(500), 0).await;

    let store = logged_in_store("old-token");
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let in_flight = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.send(ApiRequest::get("/tasks/")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.replace_tokens("new-token".to_string(), None).unwrap();

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn transient_renewal_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "access": "new-token" })),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let response = pipeline.send(ApiRequest::get("/tasks/")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(store.access_token().as_deref(), Some("new-token"));
}

#[tokio::test]
async fn other_errors_pass_through_without_renewal() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/tasks/5/"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "status": ["invalid transition"] })),
        )
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(200), 0).await;

    let store = logged_in_store("old-token");
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let err = pipeline
        .send(ApiRequest::patch("/tasks/5/").json(json!({ "status": "completed" })))
        .await
        .unwrap_err();

    match &err {
        ApiError::Http { status, body } => {
            assert_eq!(*status, 400);
            assert_eq!(body.raw(), r#"{"status":["invalid transition"]}"#);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.user_message(), "status: invalid transition");
    assert_eq!(store.access_token().as_deref(), Some("old-token"));
}

#[tokio::test]
async fn unauthorized_without_session_is_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(200), 0).await;

    let pipeline =
        RequestPipeline::new(&config_for(&server), Arc::new(CredentialStore::in_memory())).unwrap();

    let result = pipeline.send(ApiRequest::get("/tasks/")).await;
    assert!(matches!(result, Err(ApiError::AuthExpired)));
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let pipeline =
        RequestPipeline::new(&config_for(&server), logged_in_store("old-token")).unwrap();

    let err = pipeline
        .send(ApiRequest::get("/tasks/").timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(err.is_network());
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let config = Config {
        api_url: "http://127.0.0.1:1/api".to_string(),
        ..Config::default()
    };
    let pipeline = RequestPipeline::new(&config, logged_in_store("old-token")).unwrap();

    let err = pipeline
        .send(ApiRequest::get("/tasks/").timeout(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(err.is_network(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn multipart_is_replayed_with_transport_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/documents/"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/documents/"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 9 })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "access": "new-token" })),
        1,
    )
    .await;

    let pipeline =
        RequestPipeline::new(&config_for(&server), logged_in_store("old-token")).unwrap();

    let form = MultipartForm::new()
        .text("title", "Board minutes")
        .file("file", "minutes.pdf", Some("application/pdf"), b"%PDF-1.4".to_vec());
    let response = pipeline
        .send(
            ApiRequest::post("/documents/")
                .header("Content-Type", "application/json")
                .multipart(form),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let uploads: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/documents/")
        .collect();
    assert_eq!(uploads.len(), 2);
    for upload in uploads {
        let content_type = upload.headers.get("content-type").unwrap().to_str().unwrap();
        assert!(
            content_type.starts_with("multipart/form-data; boundary="),
            "unexpected content type {content_type}"
        );
        let body = String::from_utf8_lossy(&upload.body);
        assert!(body.contains("minutes.pdf"));
        assert!(body.contains("Board minutes"));
    }
}

/// Listener that records each session event together with the renewal phase
/// it observes by calling back into the pipeline.
fn record_phases(
    store: &CredentialStore,
) -> (Arc<OnceLock<RequestPipeline>>, Arc<Mutex<Vec<(SessionEvent, RenewalPhase)>>>) {
    let cell = Arc::new(OnceLock::<RequestPipeline>::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (listener_cell, sink) = (cell.clone(), seen.clone());
    store.set_session_listener(Box::new(move |event| {
        if let Some(pipeline) = listener_cell.get() {
            sink.lock().unwrap().push((event.clone(), pipeline.renewal_phase()));
        }
    }));
    (cell, seen)
}

#[tokio::test]
async fn listener_can_read_renewal_phase_on_logout() {
    let server = MockServer::start().await;
    let store = logged_in_store("old-token");
    let (cell, seen) = record_phases(&store);
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();
    let _ = cell.set(pipeline.clone());

    let logout = tokio::task::spawn_blocking(move || pipeline.logout());
    let removed = tokio::time::timeout(Duration::from_secs(2), logout)
        .await
        .expect("logout finished")
        .unwrap()
        .unwrap();

    assert!(removed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(
            SessionEvent::Ended {
                reason: SessionEndReason::Logout
            },
            RenewalPhase::Idle
        )]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_can_read_renewal_phase_on_renewal_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let store = logged_in_store("old-token");
    let (cell, seen) = record_phases(&store);
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();
    let _ = cell.set(pipeline.clone());

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        pipeline.send(ApiRequest::get("/tasks/")),
    )
    .await
    .expect("request finished");

    assert!(matches!(result, Err(ApiError::AuthExpired)));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(
            SessionEvent::Ended {
                reason: SessionEndReason::RenewalFailed
            },
            RenewalPhase::Failed
        )]
    );
}

#[tokio::test]
async fn logout_during_renewal_discards_renewed_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": "new-token" }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let store = logged_in_store("old-token");
    let events = record_events(&store);
    let pipeline = RequestPipeline::new(&config_for(&server), store.clone()).unwrap();

    let in_flight = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.send(ApiRequest::get("/tasks/")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.renewal_phase(), RenewalPhase::InFlight);
    assert!(pipeline.logout().unwrap());

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(ApiError::AuthExpired)));
    assert!(store.get().is_none());
    assert_eq!(pipeline.renewal_phase(), RenewalPhase::Failed);
    assert_eq!(
        *events.lock().unwrap(),
        vec![SessionEvent::Ended {
            reason: SessionEndReason::Logout
        }]
    );
}
