use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use validator::ValidateEmail;

use crate::model::{SettingUpdate, SiteSettings};

use super::{AdminSession, ApiError, AppState};

pub async fn get(State(state): State<AppState>) -> Json<SiteSettings> {
    Json(state.engine.settings().await)
}

/// Body: `[{"key": "site_title", "value": "..."}, ...]`. Unknown keys fail to parse.
pub async fn update(
    _admin: AdminSession,
    State(state): State<AppState>,
    payload: Result<Json<Vec<SettingUpdate>>, JsonRejection>,
) -> Result<Json<SiteSettings>, ApiError> {
    let Json(updates) = payload?;
    for update in &updates {
        if let SettingUpdate::ContactEmail(email) = update
            && !email.is_empty()
            && !email.validate_email()
        {
            return Err(ApiError::bad_request("contact_email is not a valid e-mail address"));
        }
    }
    Ok(Json(state.engine.update_settings(updates).await?))
}
