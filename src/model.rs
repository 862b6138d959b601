use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length in hours, rounded to two decimal places.
    pub fn hours(&self) -> Decimal {
        round2(Decimal::from(self.duration_ms()) / Decimal::from(HOUR_MS))
    }
}

/// Half-up to exactly two decimal places, so `100` renders as `"100.00"`.
pub fn round2(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// `(total_hours, total_cost)` for a span at the given rate. Cost is `None` when
/// the facility has no rate.
pub fn price(span: &Span, hourly_rate: Option<Decimal>) -> (Decimal, Option<Decimal>) {
    let hours = span.hours();
    let cost = hourly_rate.map(|rate| round2(hours * rate));
    (hours, cost)
}

// ── Booking status ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    /// Pending and confirmed bookings hold their slot; the rest are history.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Re-setting the current status is always allowed.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Rejected) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "rejected" => Ok(BookingStatus::Rejected),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

// ── Records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub hourly_rate: Option<Decimal>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub event_title: String,
    pub event_description: Option<String>,
    pub span: Span,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_hours: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub total_cost: Option<Decimal>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A facility and its bookings (every status), sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct FacilityState {
    pub facility: Facility,
    pub bookings: Vec<Booking>,
}

impl FacilityState {
    pub fn new(facility: Facility) -> Self {
        Self {
            facility,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.facility.id
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Replace a booking by id. The span may have moved, so it is re-inserted.
    pub fn upsert_booking(&mut self, booking: Booking) {
        self.remove_booking(booking.id);
        self.insert_booking(booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Bookings whose span overlaps the query window, any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Pending/confirmed bookings overlapping the query window.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.is_active())
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(Booking::is_active)
    }
}

// ── Site settings ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSettings {
    pub site_title: String,
    pub tagline: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub address: String,
    pub hero_heading: String,
    pub hero_subheading: String,
}

/// One variant per settings key; there is no free-form key/value path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum SettingUpdate {
    SiteTitle(String),
    Tagline(String),
    ContactEmail(String),
    ContactPhone(String),
    Address(String),
    HeroHeading(String),
    HeroSubheading(String),
}

impl SettingUpdate {
    pub fn value(&self) -> &str {
        match self {
            SettingUpdate::SiteTitle(v)
            | SettingUpdate::Tagline(v)
            | SettingUpdate::ContactEmail(v)
            | SettingUpdate::ContactPhone(v)
            | SettingUpdate::Address(v)
            | SettingUpdate::HeroHeading(v)
            | SettingUpdate::HeroSubheading(v) => v,
        }
    }
}

impl SiteSettings {
    pub fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::SiteTitle(v) => self.site_title = v,
            SettingUpdate::Tagline(v) => self.tagline = v,
            SettingUpdate::ContactEmail(v) => self.contact_email = v,
            SettingUpdate::ContactPhone(v) => self.contact_phone = v,
            SettingUpdate::Address(v) => self.address = v,
            SettingUpdate::HeroHeading(v) => self.hero_heading = v,
            SettingUpdate::HeroSubheading(v) => self.hero_subheading = v,
        }
    }
}

/// The event types, flat with no nesting. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FacilityCreated { facility: Facility },
    FacilityUpdated { facility: Facility },
    FacilityDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    /// Full snapshot after the change; status changes and cancellations included.
    BookingUpdated { booking: Booking },
    SettingsUpdated { settings: SiteSettings },
}

// ── Write inputs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFacility {
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
    pub hourly_rate: Option<Decimal>,
    pub features: Vec<String>,
}

/// `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacilityPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Outer `None` leaves the field alone; `Some(None)` clears it.
    pub capacity: Option<Option<u32>>,
    pub hourly_rate: Option<Option<Decimal>>,
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub facility_id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub event_title: String,
    pub event_description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub notes: Option<String>,
}

/// `None` leaves a field unchanged; an empty string clears an optional text field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub notes: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub event_title: Option<String>,
    pub event_description: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub facility_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotReason {
    Booked,
    TooSoon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub span: Span,
    pub start_label: String,
    pub end_label: String,
    pub available: bool,
    pub reason: Option<SlotReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub facility: Facility,
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub available: bool,
    pub slots: Vec<TimeSlot>,
    pub existing_bookings: usize,
    pub message: Option<String>,
}

/// A booking together with the facility it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    pub facility: Facility,
}
