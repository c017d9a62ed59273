use std::{
    collections::HashMap,
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use miau_gateway::{build_gateway_router, GatewayServerConfig, GatewayServerState};
use miau_session::{
    DryRunProtocolClient, JsonFileInstanceRepository, PairingTimings, PresenceDelays,
    ProtocolClient, ProtocolClientFactory, SessionManager,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Hands out dry-run clients while keeping a typed handle so the test can
/// play the phone and confirm the login.
#[derive(Default)]
struct ObservableFactory {
    clients: Mutex<HashMap<String, Arc<DryRunProtocolClient>>>,
}

impl ObservableFactory {
    fn client(&self, instance_id: &str) -> Arc<DryRunProtocolClient> {
        let clients = self.clients.lock().expect("clients lock");
        Arc::clone(clients.get(instance_id).expect("client minted"))
    }
}

impl ProtocolClientFactory for ObservableFactory {
    fn new_client(&self, instance_id: &str) -> Arc<dyn ProtocolClient> {
        let client = Arc::new(DryRunProtocolClient::new(instance_id, false));
        self.clients
            .lock()
            .expect("clients lock")
            .insert(instance_id.to_string(), Arc::clone(&client));
        client
    }
}

struct Gateway {
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    factory: Arc<ObservableFactory>,
    server: tokio::task::JoinHandle<()>,
}

async fn spawn_gateway(state_file: &Path) -> Result<Gateway> {
    let factory = Arc::new(ObservableFactory::default());
    let manager = SessionManager::builder(factory.clone())
        .pairing_timings(PairingTimings {
            window: Duration::from_millis(600),
            grace: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            observer_timeout: Duration::from_millis(600),
        })
        .presence(PresenceDelays {
            enabled: true,
            text_ms: 150,
            audio_ms: 150,
            visual_media_ms: 50,
        })
        .build();
    let repository = Arc::new(
        JsonFileInstanceRepository::open(state_file).context("open instance store")?,
    );
    let state = Arc::new(GatewayServerState::new(
        GatewayServerConfig {
            bind: "127.0.0.1:0".to_string(),
            api_key: Some("integration-key".to_string()),
        },
        Arc::clone(&manager),
        repository,
    ));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_gateway_router(state);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(Gateway {
        addr,
        manager,
        factory,
        server,
    })
}

impl Gateway {
    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Client::new()
            .request(method, format!("http://{}{path}", self.addr))
            .header("apikey", "integration-key");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("send request");
        let status = response.status();
        let payload = response.json::<Value>().await.expect("parse payload");
        (status, payload)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.call(reqwest::Method::POST, path, Some(body)).await
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.call(reqwest::Method::GET, path, None).await
    }

    async fn stop(self) {
        self.manager.shutdown().await;
        assert_eq!(self.manager.background_task_count(), 0);
        self.server.abort();
    }
}

async fn wait_for_state(gateway: &Gateway, instance: &str, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let (_, report) = gateway.get(&format!("/v1/instance/{instance}/status")).await;
        if report["state"] == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "instance {instance} never reached {expected}: {report}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn integration_pairing_code_login_then_typed_send() {
    let temp = tempfile::tempdir().expect("tempdir");
    let gateway = spawn_gateway(&temp.path().join("instances.json"))
        .await
        .expect("spawn gateway");

    let (status, _) = gateway
        .post("/v1/instance", json!({ "instanceName": "tenant-a" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, started) = gateway
        .post(
            "/v1/instance/tenant-a/pairing",
            json!({ "phoneNumber": "+55 11 99999-9999", "clientType": "safari" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["success"], true);
    let session_id = started["sessionId"].as_str().expect("session id").to_string();
    let status_path = format!("/v1/instance/tenant-a/pairing/status?sessionId={session_id}");
    wait_for_state(&gateway, "tenant-a", "pairing-pending").await;

    let (_, pending) = gateway.get(&status_path).await;
    assert_eq!(pending["status"], "pending");

    gateway.factory.client("tenant-a").set_logged_in(true);
    wait_for_state(&gateway, "tenant-a", "open").await;
    let deadline = Instant::now() + Duration::from_secs(3);
    while gateway.manager.is_observing("tenant-a") {
        assert!(Instant::now() < deadline, "observer never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (_, resolved) = gateway.get(&status_path).await;
    assert_eq!(resolved["status"], "success");
    assert_eq!(resolved["message"], "Pairing successful, client is logged in");

    let started_send = Instant::now();
    let (status, sent) = gateway
        .post(
            "/v1/instance/tenant-a/message/text",
            json!({ "number": "5511999999999", "text": "primeira mensagem" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["messageType"], "conversation");
    assert!(started_send.elapsed() >= Duration::from_millis(150));

    gateway.stop().await;
}

#[tokio::test]
async fn integration_unconfirmed_pairing_expires_then_is_reclaimed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let gateway = spawn_gateway(&temp.path().join("instances.json"))
        .await
        .expect("spawn gateway");
    gateway
        .post("/v1/instance", json!({ "instanceName": "tenant-b" }))
        .await;

    let (_, started) = gateway
        .post(
            "/v1/instance/tenant-b/pairing",
            json!({ "phoneNumber": "5511988887777" }),
        )
        .await;
    let session_id = started["sessionId"].as_str().expect("session id").to_string();
    let status_path = format!("/v1/instance/tenant-b/pairing/status?sessionId={session_id}");

    tokio::time::sleep(Duration::from_millis(750)).await;
    let (_, expired) = gateway.get(&status_path).await;
    assert_eq!(expired["status"], "expired");
    assert_eq!(expired["message"], "Pairing code has expired");
    assert!(gateway.manager.pairing_session(&session_id).is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(gateway.manager.pairing_session(&session_id).is_none());
    let (_, reclaimed) = gateway.get(&status_path).await;
    assert_eq!(
        reclaimed,
        json!({ "status": "expired", "message": "Session not found or expired" })
    );

    gateway.stop().await;
}

#[tokio::test]
async fn integration_instances_survive_gateway_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state_file = temp.path().join("state").join("instances.json");

    let first = spawn_gateway(&state_file).await.expect("spawn first gateway");
    first
        .post(
            "/v1/instance",
            json!({ "instanceName": "tenant-c", "readDelay": 12 }),
        )
        .await;
    first.stop().await;

    let second = spawn_gateway(&state_file).await.expect("spawn second gateway");
    let (status, rows) = second.get("/v1/instance?instanceName=tenant-c").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows[0]["id"], "tenant-c");
    assert_eq!(rows[0]["readDelay"], 12);
    assert_eq!(rows[0]["status"], "closed");

    let raw = std::fs::read_to_string(&state_file).expect("read state file");
    let parsed: Value = serde_json::from_str(&raw).expect("parse state file");
    assert_eq!(parsed["schema_version"], 1);

    second.stop().await;
}
