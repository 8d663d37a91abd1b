use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use reqwest::StatusCode;
use serde_json::json;

use intake_api::app::{AppServices, build_router};
use intake_auth::{FreshnessWindow, TokenStore};
use intake_core::{ContractBody, EntityKind, NewToken, RecordId};
use intake_events::{InMemoryMessageBus, MessageBus};
use intake_infra::IngestionProducer;
use intake_infra::gateway::InMemoryEntityGateway;
use intake_infra::tokens::InMemoryTokenStore;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: AppServices) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let services = Arc::new(services);
        let app = build_router(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    async fn with_consumer(kind: EntityKind) -> Self {
        let services = AppServices::in_memory(kind, FreshnessWindow::default());
        services
            .start_consumers(1, tokio::runtime::Handle::current())
            .unwrap();
        Self::spawn(services).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

async fn list_eventually(client: &reqwest::Client, url: &str, expected: usize) -> serde_json::Value {
    // Queued records are saved asynchronously; poll until the consumer catches up.
    for _ in 0..100 {
        let res = client.get(url).send().await.unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body.as_array().map(Vec::len) == Some(expected) {
                return body;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    panic!("{expected} records did not become visible within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_listing_is_not_found() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;

    let res = reqwest::get(srv.url("/api/investors")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_record_is_accepted_then_eventually_listed() {
    let srv = TestServer::with_consumer(EntityKind::Investor).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/mq/investor"))
        .json(&json!({ "name": "Jane", "cert": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert!(res.bytes().await.unwrap().is_empty());

    let list = list_eventually(&client, &srv.url("/api/investors"), 1).await;
    assert_eq!(list[0]["name"], "Jane");
    assert_eq!(list[0]["cert"], "abc");

    let id = list[0]["id"].as_i64().unwrap();
    let res = client
        .get(srv.url(&format!("/api/investors/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_service_uses_its_own_routes() {
    let srv = TestServer::with_consumer(EntityKind::Client).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/mq/client"))
        .json(&json!({ "name": "Acme", "cert": "xyz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    list_eventually(&client, &srv.url("/api/clients"), 1).await;

    let res = client
        .post(srv.url("/api/mq/investor"))
        .json(&json!({ "name": "Jane", "cert": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn closed_broker_answers_service_unavailable() {
    let bus = Arc::new(InMemoryMessageBus::<String>::new());
    bus.close();
    let bus: Arc<dyn MessageBus<String>> = bus;
    let services = AppServices::new(
        Arc::new(InMemoryEntityGateway::new(EntityKind::Investor)),
        Arc::new(InMemoryTokenStore::new()),
        FreshnessWindow::default(),
        bus.clone(),
        IngestionProducer::new(bus, EntityKind::Investor),
    );
    let srv = TestServer::spawn(services).await;

    let res = reqwest::Client::new()
        .post(srv.url("/api/mq/investor"))
        .json(&json!({ "name": "Jane", "cert": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "broker_unavailable");
}

#[tokio::test]
async fn synchronous_create_get_and_delete() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Client, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/clients"))
        .json(&json!({ "name": "Acme", "cert": "xyz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    assert_eq!(created["id"], 1);
    assert_eq!(created["message"], "Client was successfully created");

    let res = client.get(srv.url("/api/clients/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let record: serde_json::Value = res.json().await.unwrap();
    assert_eq!(record["name"], "Acme");

    let res = client.delete(srv.url("/api/clients/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/api/clients/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = client.delete(srv.url("/api/clients/1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fresh_token_resolves_while_unknown_and_stale_do_not() {
    let services = AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default());
    services
        .token_store()
        .insert(
            NewToken {
                value: "stale".into(),
                owner_id: RecordId::Numeric(3),
            },
            Utc::now() - ChronoDuration::days(3),
        )
        .await
        .unwrap();
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/investors/auth/tokens"))
        .json(&json!({ "token": "fresh", "owner_id": 42 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client.get(srv.url("/api/investors/auth/fresh")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let owner: serde_json::Value = res.json().await.unwrap();
    assert_eq!(owner, json!(42));

    let unknown = client.get(srv.url("/api/investors/auth/nope")).send().await.unwrap();
    let stale = client.get(srv.url("/api/investors/auth/stale")).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(stale.status(), StatusCode::NOT_FOUND);

    // Both misses look the same to the caller.
    let unknown: serde_json::Value = unknown.json().await.unwrap();
    let stale: serde_json::Value = stale.json().await.unwrap();
    assert_eq!(unknown, stale);
}

#[tokio::test]
async fn token_listing_and_revocation() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Client, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/clients/auth/tokens")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/api/clients/auth/tokens"))
        .json(&json!({ "token": "t-1", "owner_id": "0190c0de-0000-7000-8000-000000000001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let issued: serde_json::Value = res.json().await.unwrap();
    let id = issued["id"].clone();

    let res = client.get(srv.url("/api/clients/auth/tokens")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tokens: serde_json::Value = res.json().await.unwrap();
    assert_eq!(tokens.as_array().unwrap().len(), 1);
    assert_eq!(tokens[0]["token"], "t-1");

    let res = client
        .delete(srv.url(&format!("/api/clients/auth/tokens/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/api/clients/auth/t-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reissuing_a_token_value_is_a_conflict() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();
    let issue = || {
        client
            .post(srv.url("/api/investors/auth/tokens"))
            .json(&json!({ "token": "dup", "owner_id": 1 }))
            .send()
    };

    assert_eq!(issue().await.unwrap().status(), StatusCode::CREATED);

    let res = issue().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
    assert!(!body["message"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn unresolvable_token_values_are_not_issued() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();

    for value in ["tokens", "   ", "a/b"] {
        let res = client
            .post(srv.url("/api/investors/auth/tokens"))
            .json(&json!({ "token": value, "owner_id": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "value {value:?}");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }

    let res = client.get(srv.url("/api/investors/auth/tokens")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_consumers_persist_each_message_once() {
    let services = AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default());
    services
        .start_consumers(2, tokio::runtime::Handle::current())
        .unwrap();
    let srv = TestServer::spawn(services).await;
    let client = reqwest::Client::new();

    const BURST: usize = 40;
    for i in 0..BURST {
        let res = client
            .post(srv.url("/api/mq/investor"))
            .json(&json!({ "name": format!("investor-{i}"), "cert": "c" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    list_eventually(&client, &srv.url("/api/investors"), BURST).await;

    // Give a stray duplicate time to land before counting again.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let list: serde_json::Value = client
        .get(srv.url("/api/investors"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut names: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(list.as_array().unwrap().len(), BURST);
    assert_eq!(names.len(), BURST);

    let stats = srv.services.consumer_stats();
    assert_eq!(stats.len(), 2);
    // Round-robin delivery: both workers took part.
    assert!(stats.iter().all(|s| s.persisted > 0));
    assert_eq!(stats.iter().map(|s| s.persisted).sum::<u64>(), BURST as u64);
}

async fn create_party(client: &reqwest::Client, srv: &TestServer, name: &str, key: &SigningKey) -> serde_json::Value {
    let res = client
        .post(srv.url("/api/investors"))
        .json(&json!({ "name": name, "cert": STANDARD.encode(key.verifying_key().to_bytes()) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json::<serde_json::Value>().await.unwrap()["id"].clone()
}

#[tokio::test]
async fn contract_is_signed_once_both_signatures_verify() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();
    let investor_key = SigningKey::from_bytes(&[7; 32]);
    let supplier_key = SigningKey::from_bytes(&[9; 32]);
    let investor = create_party(&client, &srv, "Jane", &investor_key).await;
    let supplier = create_party(&client, &srv, "Acme", &supplier_key).await;

    let res = client.get(srv.url("/api/contracts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<serde_json::Value>().await.unwrap(), json!([]));

    let res = client
        .post(srv.url("/api/contracts"))
        .json(&json!({
            "investor_id": investor,
            "title": "Roof",
            "description": "tiles",
            "amount": 1500,
            "must_be_done": "2030-06-01T08:00:00Z",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = res.json::<serde_json::Value>().await.unwrap()["id"].clone();
    let contract_url = srv.url(&format!("/api/contracts/{id}"));

    let listed: serde_json::Value = client
        .get(srv.url("/api/contracts?title=ROO"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["stage"], "open");

    let payload = ContractBody::new(
        "Roof",
        "tiles",
        1500,
        Utc.with_ymd_and_hms(2030, 6, 1, 8, 0, 0).unwrap(),
    )
    .unwrap()
    .signing_payload();
    let sign = |key: &SigningKey| STANDARD.encode(key.sign(&payload).to_bytes());

    let forged = json!({
        "supplier_id": &supplier,
        "supplier_signature": sign(&investor_key),
        "investor_signature": sign(&investor_key),
    });
    let res = client.patch(&contract_url).json(&forged).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.json::<serde_json::Value>().await.unwrap()["error"], "signature_rejected");

    let offer = json!({
        "supplier_id": &supplier,
        "supplier_signature": sign(&supplier_key),
        "investor_signature": sign(&investor_key),
    });
    let res = client.patch(&contract_url).json(&offer).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let signed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(signed["stage"], "signed");
    assert_eq!(signed["supplier_id"], supplier);

    let res = client.patch(&contract_url).json(&offer).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(res.json::<serde_json::Value>().await.unwrap()["error"], "already_signed");

    let by_supplier: serde_json::Value = client
        .get(srv.url(&format!("/api/contracts?supplier_id={supplier}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_supplier.as_array().map(Vec::len), Some(1));

    let res = client.delete(&contract_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(&contract_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn contracts_need_a_stored_investor_and_valid_terms() {
    let srv = TestServer::spawn(AppServices::in_memory(EntityKind::Investor, FreshnessWindow::default())).await;
    let client = reqwest::Client::new();

    let terms = |investor_id: serde_json::Value, amount: i64| {
        json!({
            "investor_id": investor_id,
            "title": "Roof",
            "amount": amount,
            "must_be_done": "2030-06-01T08:00:00Z",
        })
    };

    let res = client
        .post(srv.url("/api/contracts"))
        .json(&terms(json!(41), 100))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let investor = create_party(&client, &srv, "Jane", &SigningKey::from_bytes(&[7; 32])).await;
    let res = client
        .post(srv.url("/api/contracts"))
        .json(&terms(investor, 0))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.json::<serde_json::Value>().await.unwrap()["error"], "validation_error");

    let res = client
        .patch(srv.url("/api/contracts/99"))
        .json(&json!({ "supplier_id": 1, "supplier_signature": "", "investor_signature": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
