use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;
use validator::Validate;

use crate::model::{Facility, FacilityPatch, NewFacility};

use super::{AdminSession, ApiError, AppState, path_id};

/// Public view of a facility, embedded in bookings and availability results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitySummary {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub hourly_rate: Option<Decimal>,
    pub features: Vec<String>,
}

impl From<Facility> for FacilitySummary {
    fn from(f: Facility) -> Self {
        Self {
            id: f.id,
            name: f.name,
            description: f.description,
            capacity: f.capacity,
            hourly_rate: f.hourly_rate,
            features: f.features,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateFacilityRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(range(min = 1))]
    pub capacity: Option<u32>,
    pub hourly_rate: Option<Decimal>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub features: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFacilityRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    /// `null` clears the capacity; an absent field keeps it.
    #[serde(default, deserialize_with = "nullable")]
    pub capacity: Option<Option<u32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub hourly_rate: Option<Option<Decimal>>,
    #[validate(length(max = 50))]
    pub features: Option<Vec<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<FacilitySummary>> {
    let facilities = state.engine.list_facilities().await;
    Json(facilities.into_iter().map(FacilitySummary::from).collect())
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<FacilitySummary>, ApiError> {
    let id = path_id(id, "facility")?;
    Ok(Json(state.engine.get_facility(id).await?.into()))
}

pub async fn create(
    _admin: AdminSession,
    State(state): State<AppState>,
    payload: Result<Json<CreateFacilityRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FacilitySummary>), ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    let facility = state
        .engine
        .create_facility(NewFacility {
            name: req.name,
            description: req.description,
            capacity: req.capacity,
            hourly_rate: req.hourly_rate,
            features: req.features,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(facility.into())))
}

pub async fn update(
    _admin: AdminSession,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateFacilityRequest>, JsonRejection>,
) -> Result<Json<FacilitySummary>, ApiError> {
    let id = path_id(id, "facility")?;
    let Json(req) = payload?;
    req.validate()?;
    let facility = state
        .engine
        .update_facility(
            id,
            FacilityPatch {
                name: req.name,
                description: req.description,
                capacity: req.capacity,
                hourly_rate: req.hourly_rate,
                features: req.features,
            },
        )
        .await?;
    Ok(Json(facility.into()))
}

pub async fn delete(
    _admin: AdminSession,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = path_id(id, "facility")?;
    state.engine.delete_facility(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
