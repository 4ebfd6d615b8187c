use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use dispatch_node::amount::Amount;
use dispatch_node::api::create_router;
use dispatch_node::contract::{ContractCapabilities, EscrowContract, MockEscrowClient};
use dispatch_node::coordinator::{
    CoordinatorSettings, DeliveryTrigger, FallbackJob, InMemoryJobStore, JobCoordinator,
};
use dispatch_node::drone::DroneFleet;
use ethereum_types::Address;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app_with(fleet: DroneFleet, assign_drone: bool) -> Router {
    let contract: Arc<dyn EscrowContract> = Arc::new(
        MockEscrowClient::new(Address::from_low_u64_be(0x0b), ContractCapabilities { assign_drone })
            .with_auto_jobs(Amount::from(1_000_000)),
    );
    let coordinator = Arc::new(JobCoordinator::new(
        Arc::new(InMemoryJobStore::new()),
        contract,
        Arc::new(fleet),
        CoordinatorSettings {
            trigger: DeliveryTrigger::Manual,
            confirm_retries: 0,
            retry_backoff: Duration::from_millis(5),
            placeholder_ttl: Duration::from_secs(60),
            fallback: FallbackJob::default(),
        },
    ));
    create_router(coordinator, None)
}

fn app() -> Router {
    app_with(DroneFleet::with_seed(DroneFleet::default_roster(), 3), true)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_submit_and_poll_status() {
    let app = app();

    let (status, body) = send(&app, post("/job", json!({ "jobId": 42 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "received");
    assert_eq!(body["jobId"], "42");
    assert_eq!(body["degraded"], false);

    let (status, body) = send(&app, get("/job/42/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "pending" }));

    let (status, body) = send(&app, get("/job/42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobId"], "42");
    assert_eq!(body["amount"], "1000000");
}

#[tokio::test]
async fn test_submit_without_job_id_is_accepted() {
    let app = app();
    let (status, body) = send(&app, post("/job", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "received");
    assert_eq!(body["jobId"], Value::Null);

    let request = Request::builder()
        .method("POST")
        .uri("/job")
        .body(Body::from("garbage"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_job_status_and_detail() {
    let app = app();
    let (status, body) = send(&app, get("/job/999/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let (status, body) = send(&app, get("/job/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert_eq!(body["details"]["jobId"], "999");
}

#[tokio::test]
async fn test_delivered_confirms_job() {
    let app = app();
    send(&app, post("/job", json!({ "jobId": "5" }))).await;

    let (status, body) = send(&app, post("/job/5/delivered", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "jobId": "5", "released": true }));

    let mut confirmed = false;
    for _ in 0..200 {
        let (_, body) = send(&app, get("/job/5/status")).await;
        if body["status"] == "confirmed" {
            confirmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(confirmed);

    let (_, body) = send(&app, post("/job/unknown/delivered", json!({}))).await;
    assert_eq!(body["released"], false);
}

#[tokio::test]
async fn test_assign_drone_endpoint() {
    let app = app();
    let (status, body) = send(
        &app,
        post(
            "/api/assign-drone",
            json!({
                "jobId": "77",
                "pickup": { "lat": 15.30, "lng": 74.12 },
                "weight": 1.5
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["jobId"], "77");
    assert_eq!(body["droneWalletStored"], true);
    assert_eq!(body["contractSupportsAssignDrone"], true);
    let score = body["assignment"]["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    let wallet = body["assignment"]["walletAddress"].as_str().unwrap();
    assert!(wallet.starts_with("0x") && wallet.len() == 42);

    let (_, drones) = send(&app, get("/api/drones")).await;
    assert_eq!(drones["activeJobs"].as_array().unwrap().len(), 1);
    assert_eq!(drones["activeJobs"][0]["jobId"], "77");
    assert_eq!(drones["drones"].as_array().unwrap().len(), 6);

    let (_, analytics) = send(&app, get("/api/hive-analytics")).await;
    assert_eq!(analytics["fleetSize"], 6);
    assert_eq!(analytics["totalAssignments"], 1);
    assert_eq!(analytics["activeAssignments"], 1);
}

#[tokio::test]
async fn test_assign_drone_missing_job_id() {
    let (status, body) = send(&app(), post("/api/assign-drone", json!({ "weight": 1.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "success": false, "error": "Missing jobId" }));
}

#[tokio::test]
async fn test_assign_drone_selector_failure() {
    let app = app_with(DroneFleet::with_seed(Vec::new(), 0), false);
    let (status, body) = send(&app, post("/api/assign-drone", json!({ "jobId": "1" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("No drone available"));
}

#[tokio::test]
async fn test_unknown_route() {
    let (status, body) = send(&app(), get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}
