use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::Validate;

use crate::engine::{now_ms, weekday_name};
use crate::model::*;

use super::facility::FacilitySummary;
use super::{AdminSession, ApiError, AppState, parse_id, path_id};

fn instant(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ── Responses ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub event_title: String,
    pub event_description: Option<String>,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_hours: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub total_cost: Option<Decimal>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<FacilitySummary>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            facility_id: b.facility_id,
            customer_name: b.customer_name,
            customer_email: b.customer_email,
            customer_phone: b.customer_phone,
            event_title: b.event_title,
            event_description: b.event_description,
            start_date_time: instant(b.span.start),
            end_date_time: instant(b.span.end),
            total_hours: b.total_hours,
            total_cost: b.total_cost,
            status: b.status,
            notes: b.notes,
            created_at: instant(b.created_at),
            updated_at: instant(b.updated_at),
            facility: None,
        }
    }
}

impl From<BookingView> for BookingResponse {
    fn from(view: BookingView) -> Self {
        Self {
            facility: Some(view.facility.into()),
            ..view.booking.into()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: &'static str,
    pub booking: BookingResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResponse {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_label: String,
    pub end_label: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SlotReason>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub facility: FacilitySummary,
    pub date: NaiveDate,
    pub day_of_week: &'static str,
    pub available: bool,
    pub time_slots: Vec<SlotResponse>,
    pub existing_bookings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<DayAvailability> for AvailabilityResponse {
    fn from(day: DayAvailability) -> Self {
        Self {
            facility: day.facility.into(),
            date: day.date,
            day_of_week: weekday_name(day.weekday),
            available: day.available,
            time_slots: day
                .slots
                .into_iter()
                .map(|s| SlotResponse {
                    start_time: instant(s.span.start),
                    end_time: instant(s.span.end),
                    start_label: s.start_label,
                    end_label: s.end_label,
                    available: s.available,
                    reason: s.reason,
                })
                .collect(),
            existing_bookings: day.existing_bookings,
            message: day.message,
        }
    }
}

// ── Requests ─────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub facility_id: String,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email, length(max = 254))]
    pub customer_email: String,
    #[validate(length(max = 40))]
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub event_title: String,
    #[validate(length(max = 4000))]
    pub event_description: Option<String>,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateBookingRequest {
    pub status: Option<BookingStatus>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: Option<String>,
    #[validate(email, length(max = 254))]
    pub customer_email: Option<String>,
    #[validate(length(max = 40))]
    pub customer_phone: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub event_title: Option<String>,
    #[validate(length(max = 4000))]
    pub event_description: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub facility_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub facility_id: Option<String>,
    pub status: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────

pub async fn availability(
    State(state): State<AppState>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let Query(q) = query?;
    let (Some(facility_id), Some(date)) = (q.facility_id, q.date) else {
        return Err(ApiError::bad_request("facilityId and date are required"));
    };
    let facility_id = parse_id(&facility_id, "facility")?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("date must be formatted as YYYY-MM-DD"))?;
    let day = state.engine.availability(facility_id, date, now_ms()).await?;
    Ok(Json(day.into()))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    let facility_id = parse_id(&req.facility_id, "facility")?;
    let booking = state
        .engine
        .create_booking(NewBooking {
            facility_id,
            customer_name: req.customer_name,
            customer_email: req.customer_email,
            customer_phone: req.customer_phone,
            event_title: req.event_title,
            event_description: req.event_description,
            start: req.start_date_time.timestamp_millis(),
            end: req.end_date_time.timestamp_millis(),
            notes: req.notes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<BookingResponse>, ApiError> {
    let id = path_id(id, "booking")?;
    Ok(Json(state.engine.get_booking(id).await?.into()))
}

pub async fn list(
    _admin: AdminSession,
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let Query(q) = query?;
    let filter = BookingFilter {
        facility_id: q.facility_id.as_deref().map(|id| parse_id(id, "facility")).transpose()?,
        status: q
            .status
            .as_deref()
            .map(str::parse::<BookingStatus>)
            .transpose()
            .map_err(ApiError::BadRequest)?,
    };
    let views = state.engine.list_bookings(filter).await?;
    Ok(Json(views.into_iter().map(BookingResponse::from).collect()))
}

pub async fn update(
    _admin: AdminSession,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateBookingRequest>, JsonRejection>,
) -> Result<Json<BookingResponse>, ApiError> {
    let id = path_id(id, "booking")?;
    let Json(req) = payload?;
    req.validate()?;
    let booking = state
        .engine
        .update_booking(
            id,
            BookingPatch {
                status: req.status,
                notes: req.notes,
                customer_name: req.customer_name,
                customer_email: req.customer_email,
                customer_phone: req.customer_phone,
                event_title: req.event_title,
                event_description: req.event_description,
                start: req.start_date_time.map(|t| t.timestamp_millis()),
                end: req.end_date_time.map(|t| t.timestamp_millis()),
            },
        )
        .await?;
    Ok(Json(booking.into()))
}

/// Soft delete: the booking is kept with status `cancelled`.
pub async fn cancel(
    _admin: AdminSession,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = path_id(id, "booking")?;
    let booking = state.engine.cancel_booking(id).await?;
    // Terminal bookings come back untouched; a rejection is never turned into a cancellation.
    let message = match booking.status {
        BookingStatus::Rejected => "Booking was already rejected",
        _ => "Booking cancelled",
    };
    Ok(Json(CancelResponse {
        message,
        booking: booking.into(),
    }))
}
