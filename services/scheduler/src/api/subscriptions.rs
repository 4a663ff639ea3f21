//! Subscribe, resubscribe and unsubscribe endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use pollmesh_id::{ApiId, JobName, SubscriptionId, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::auth::{Caller, UserAuth};
use super::error::ApiError;
use super::request_context::RequestContext;
use crate::service::SubscribeRequest;
use crate::state::AppState;
use crate::subscriptions::UserRef;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribeApi", post(subscribe))
        .route("/resubscribeApi/{subscription_id}", get(resubscribe))
        .route("/unsubscribeApi/{subscription_id}", get(unsubscribe))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    #[serde(rename = "userID")]
    pub user_id: Option<UserRef>,
    #[serde(rename = "apiID", alias = "availableApiID")]
    pub api_id: Option<ApiId>,
    pub interval: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub message: String,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: SubscriptionId,
    #[serde(rename = "jobName")]
    pub job_name: JobName,
    pub container: WorkerId,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub message: String,
    #[serde(rename = "subscriptionID")]
    pub subscription_id: SubscriptionId,
    #[serde(rename = "jobName")]
    pub job_name: JobName,
}

fn parse_subscription_id(raw: &str, ctx: &RequestContext) -> Result<SubscriptionId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(
            "invalid_subscription_id",
            format!("'{raw}' is not a subscription id"),
        )
        .with_request_id(&ctx.request_id)
    })
}

async fn subscribe(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: UserAuth,
    body: Result<Json<SubscribeBody>, JsonRejection>,
) -> Result<Json<ActivationResponse>, ApiError> {
    let Json(body) = body.map_err(|e| {
        ApiError::bad_request("invalid_body", e.body_text()).with_request_id(&ctx.request_id)
    })?;
    let (Some(user_id), Some(api_id), Some(interval_secs)) = (body.user_id, body.api_id, body.interval)
    else {
        return Err(ApiError::bad_request(
            "missing_fields",
            "userID, apiID and interval are required",
        )
        .with_request_id(&ctx.request_id));
    };

    let activation = state
        .scheduler()
        .subscribe(
            &user.actor(),
            SubscribeRequest {
                user_id,
                api_id,
                interval_secs,
            },
        )
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;

    info!(
        request_id = %ctx.request_id,
        subscription_id = %activation.subscription_id,
        job = %activation.job,
        "Subscription activated"
    );

    Ok(Json(ActivationResponse {
        message: format!("SUCCESS: subscription {} is active", activation.subscription_id),
        subscription_id: activation.subscription_id,
        job_name: activation.job,
        container: activation.worker,
    }))
}

async fn resubscribe(
    State(state): State<AppState>,
    ctx: RequestContext,
    caller: Caller,
    Path(raw_id): Path<String>,
) -> Result<Json<ActivationResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&raw_id, &ctx)?;
    let activation = state
        .scheduler()
        .resubscribe(&caller.actor(), subscription_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;

    Ok(Json(ActivationResponse {
        message: format!("SUCCESS: subscription {subscription_id} is active again"),
        subscription_id,
        job_name: activation.job,
        container: activation.worker,
    }))
}

async fn unsubscribe(
    State(state): State<AppState>,
    ctx: RequestContext,
    caller: Caller,
    Path(raw_id): Path<String>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&raw_id, &ctx)?;
    let job = state
        .scheduler()
        .unsubscribe(&caller.actor(), subscription_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(&ctx.request_id))?;

    Ok(Json(UnsubscribeResponse {
        message: format!("SUCCESS: subscription {subscription_id} is inactive"),
        subscription_id,
        job_name: job,
    }))
}
