use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::{error, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::errors::{ApiError, ApiResult, FailureEnvelope};
use crate::coordinator::{JobCoordinator, JobRecord, ManualAssignment, SubmitReceipt};
use crate::drone::{DeliveryRequest, FleetSnapshot, GeoPoint, HiveAnalytics, Weather};
use crate::types::JobId;

/// Bodies are parsed leniently: anything that is not a JSON object reads as `{}`.
fn parse_body(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => json!({}),
        Err(e) => {
            if !body.is_empty() {
                warn!("Ignoring malformed request body: {}", e);
            }
            json!({})
        }
    }
}

pub async fn submit_job(
    State(coordinator): State<Arc<JobCoordinator>>,
    body: Bytes,
) -> ApiResult<Response> {
    let body = parse_body(&body);
    let Some(job_id) = body.get("jobId").and_then(JobId::from_json) else {
        warn!("Job notification without a usable jobId: {}", body);
        return Ok(Json(json!({ "status": "received", "jobId": Value::Null, "degraded": false }))
            .into_response());
    };

    let receipt: SubmitReceipt = coordinator.submit_job(job_id, body.get("amount")).await?;
    Ok(Json(receipt).into_response())
}

pub async fn get_job_status(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(job_id): Path<String>,
) -> Json<Value> {
    let status = coordinator.get_status(&JobId::new(job_id)).await;
    Json(json!({ "status": status }))
}

pub async fn get_job(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let job_id = JobId::new(job_id);
    coordinator
        .get_job(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::job_not_found(job_id.as_str()))
}

pub async fn mark_delivered(
    State(coordinator): State<Arc<JobCoordinator>>,
    Path(job_id): Path<String>,
) -> Json<Value> {
    let job_id = JobId::new(job_id);
    let released = coordinator.mark_delivered(&job_id);
    Json(json!({ "jobId": job_id, "released": released }))
}

pub async fn list_drones(State(coordinator): State<Arc<JobCoordinator>>) -> Json<FleetSnapshot> {
    Json(coordinator.fleet().snapshot())
}

pub async fn hive_analytics(State(coordinator): State<Arc<JobCoordinator>>) -> Json<HiveAnalytics> {
    Json(coordinator.fleet().analytics())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignDroneResponse {
    pub success: bool,
    pub job_id: JobId,
    #[serde(flatten)]
    pub result: ManualAssignment,
}

fn delivery_request(body: &Value) -> DeliveryRequest {
    let point = |key: &str| {
        body.get(key)
            .and_then(|v| serde_json::from_value::<GeoPoint>(v.clone()).ok())
    };
    let weather = body
        .get("weather")
        .or_else(|| body.get("weatherConditions"))
        .and_then(|v| serde_json::from_value::<Weather>(v.clone()).ok());

    DeliveryRequest::with_defaults(
        point("pickup"),
        point("delivery"),
        body.get("weight").and_then(Value::as_f64),
        weather,
    )
}

pub async fn assign_drone(
    State(coordinator): State<Arc<JobCoordinator>>,
    body: Bytes,
) -> Result<Json<AssignDroneResponse>, FailureEnvelope> {
    let body = parse_body(&body);
    let job_id = body
        .get("jobId")
        .and_then(JobId::from_json)
        .ok_or_else(|| FailureEnvelope::new(StatusCode::BAD_REQUEST, "Missing jobId"))?;

    let request = delivery_request(&body);
    let result = coordinator
        .assign_drone_manual(&job_id, &request)
        .await
        .map_err(|e| {
            error!("[{}] Drone assignment failed: {}", job_id, e);
            FailureEnvelope::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(AssignDroneResponse {
        success: true,
        job_id,
        result,
    }))
}

pub async fn health() -> &'static str {
    "OK"
}
