use axum::extract::State;
use axum::Json;

use reelqueue_core::model::CapabilityProfile;

use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

pub async fn capabilities(State(state): State<AppState>) -> AppResult<Json<CapabilityProfile>> {
    let profile = state.capability_probe.detect().await;
    Ok(Json(profile))
}
