use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{BookingSnapshot, Notice, Outbound};
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{Engine, EngineError, JournalCommand};

// ── Field checks ─────────────────────────────────────────

fn required_text(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if trimmed.len() > max {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(trimmed.to_string())
}

/// Empty or whitespace-only input becomes `None`.
fn optional_text(field: &'static str, value: Option<&str>, max: usize) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(field)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn email(value: &str) -> Result<String, EngineError> {
    let v = required_text("customer_email", value, MAX_EMAIL_LEN)?;
    match v.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(v),
        _ => Err(EngineError::validation("customer_email is not a valid e-mail address")),
    }
}

fn features(list: &[String]) -> Result<Vec<String>, EngineError> {
    if list.len() > MAX_FEATURES {
        return Err(EngineError::LimitExceeded("too many features"));
    }
    list.iter()
        .map(|f| required_text("feature", f, MAX_NAME_LEN))
        .collect()
}

fn capacity(value: Option<u32>) -> Result<Option<u32>, EngineError> {
    match value {
        Some(0) => Err(EngineError::validation("capacity must be at least 1")),
        other => Ok(other),
    }
}

fn hourly_rate(rate: Option<rust_decimal::Decimal>) -> Result<Option<rust_decimal::Decimal>, EngineError> {
    match rate {
        Some(r) if r.is_sign_negative() => Err(EngineError::validation("hourly rate cannot be negative")),
        other => Ok(other),
    }
}

impl Engine {
    // ── Facilities ───────────────────────────────────────

    pub async fn create_facility(&self, req: NewFacility) -> Result<Facility, EngineError> {
        let _gate = self.gate.read().await;
        if self.facilities.len() >= MAX_FACILITIES {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        let facility = Facility {
            id: Ulid::new(),
            name: required_text("name", &req.name, MAX_NAME_LEN)?,
            description: optional_text("description", req.description.as_deref(), MAX_TEXT_LEN)?,
            capacity: capacity(req.capacity)?,
            hourly_rate: hourly_rate(req.hourly_rate)?,
            features: features(&req.features)?,
        };

        let event = Event::FacilityCreated { facility: facility.clone() };
        self.journal_append(&event).await?;
        self.facilities
            .insert(facility.id, Arc::new(RwLock::new(FacilityState::new(facility.clone()))));
        metrics::gauge!(observability::FACILITIES_ACTIVE).set(self.facilities.len() as f64);
        info!(facility_id = %facility.id, name = %facility.name, "facility created");
        Ok(facility)
    }

    /// Rate changes apply to bookings written afterwards; stored costs are kept.
    pub async fn update_facility(&self, id: Ulid, patch: FacilityPatch) -> Result<Facility, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_facility(&id).await?;
        let mut next = guard.facility.clone();
        if let Some(name) = &patch.name {
            next.name = required_text("name", name, MAX_NAME_LEN)?;
        }
        if let Some(description) = &patch.description {
            next.description = optional_text("description", Some(description), MAX_TEXT_LEN)?;
        }
        if let Some(value) = patch.capacity {
            next.capacity = capacity(value)?;
        }
        if let Some(rate) = patch.hourly_rate {
            next.hourly_rate = hourly_rate(rate)?;
        }
        if let Some(list) = &patch.features {
            next.features = features(list)?;
        }
        if next == guard.facility {
            return Ok(next);
        }

        let event = Event::FacilityUpdated { facility: next.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(facility_id = %id, "facility updated");
        Ok(next)
    }

    /// Refused while the facility holds pending or confirmed bookings.
    /// Cancelled and rejected history goes with it.
    pub async fn delete_facility(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let guard = self.lock_facility(&id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::FacilityInUse(id));
        }

        let event = Event::FacilityDeleted { id };
        self.journal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_index.remove(&b.id);
        }
        self.facilities.remove(&id);
        drop(guard);
        metrics::gauge!(observability::FACILITIES_ACTIVE).set(self.facilities.len() as f64);
        info!(facility_id = %id, "facility deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────

    /// New bookings start out pending. The overlap check and the journal write
    /// happen under the same facility write lock.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        let span = validate_span(req.start, req.end)?;
        let customer_name = required_text("customer_name", &req.customer_name, MAX_NAME_LEN)?;
        let customer_email = email(&req.customer_email)?;
        let customer_phone = optional_text("customer_phone", req.customer_phone.as_deref(), MAX_PHONE_LEN)?;
        let event_title = required_text("event_title", &req.event_title, MAX_NAME_LEN)?;
        let event_description =
            optional_text("event_description", req.event_description.as_deref(), MAX_TEXT_LEN)?;
        let notes = optional_text("notes", req.notes.as_deref(), MAX_TEXT_LEN)?;

        let _gate = self.gate.read().await;
        let mut guard = self.lock_facility(&req.facility_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many bookings on facility"));
        }
        check_no_conflict(&guard, &span, None)?;

        let (total_hours, total_cost) = price(&span, guard.facility.hourly_rate);
        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            facility_id: req.facility_id,
            customer_name,
            customer_email,
            customer_phone,
            event_title,
            event_description,
            span,
            total_hours,
            total_cost,
            status: BookingStatus::Pending,
            notes,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        let facility_name = guard.facility.name.clone();
        drop(guard);

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking_id = %booking.id, facility_id = %booking.facility_id, "booking created");
        self.notifications.enqueue(Outbound {
            notice: Notice::Received,
            snapshot: BookingSnapshot { booking: booking.clone(), facility_name },
        });
        Ok(booking)
    }

    /// Partial update. A moved interval is re-checked for overlaps (ignoring the
    /// booking itself) and re-priced at the facility's current rate.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_booking_facility(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let mut next = current.clone();

        if let Some(v) = &patch.customer_name {
            next.customer_name = required_text("customer_name", v, MAX_NAME_LEN)?;
        }
        if let Some(v) = &patch.customer_email {
            next.customer_email = email(v)?;
        }
        if let Some(v) = &patch.customer_phone {
            next.customer_phone = optional_text("customer_phone", Some(v), MAX_PHONE_LEN)?;
        }
        if let Some(v) = &patch.event_title {
            next.event_title = required_text("event_title", v, MAX_NAME_LEN)?;
        }
        if let Some(v) = &patch.event_description {
            next.event_description = optional_text("event_description", Some(v), MAX_TEXT_LEN)?;
        }
        if let Some(v) = &patch.notes {
            next.notes = optional_text("notes", Some(v), MAX_TEXT_LEN)?;
        }
        if let Some(status) = patch.status {
            if !current.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition { from: current.status, to: status });
            }
            next.status = status;
        }

        let start = patch.start.unwrap_or(current.span.start);
        let end = patch.end.unwrap_or(current.span.end);
        if start != current.span.start || end != current.span.end {
            next.span = validate_span(start, end)?;
            let (total_hours, total_cost) = price(&next.span, guard.facility.hourly_rate);
            next.total_hours = total_hours;
            next.total_cost = total_cost;
            if next.is_active() {
                check_no_conflict(&guard, &next.span, Some(id))?;
            }
        }

        if next == current {
            return Ok(current);
        }
        next.updated_at = now_ms();

        let event = Event::BookingUpdated { booking: next.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        let facility_name = guard.facility.name.clone();
        drop(guard);

        metrics::counter!(observability::BOOKINGS_UPDATED_TOTAL).increment(1);
        info!(booking_id = %id, status = %next.status, "booking updated");
        if next.status != current.status {
            let notice = match next.status {
                BookingStatus::Cancelled => Notice::Cancelled,
                to => Notice::StatusChanged { from: current.status, to },
            };
            if notice == Notice::Cancelled {
                metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
            }
            self.notifications.enqueue(Outbound {
                notice,
                snapshot: BookingSnapshot { booking: next.clone(), facility_name },
            });
        }
        Ok(next)
    }

    /// Idempotent: a cancelled or rejected booking is returned unchanged.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_booking_facility(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let mut next = current;
        next.status = BookingStatus::Cancelled;
        next.updated_at = now_ms();
        let event = Event::BookingUpdated { booking: next.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        let facility_name = guard.facility.name.clone();
        drop(guard);

        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking_id = %id, "booking cancelled");
        self.notifications.enqueue(Outbound {
            notice: Notice::Cancelled,
            snapshot: BookingSnapshot { booking: next.clone(), facility_name },
        });
        Ok(next)
    }

    // ── Settings ─────────────────────────────────────────

    pub async fn update_settings(&self, updates: Vec<SettingUpdate>) -> Result<SiteSettings, EngineError> {
        if updates.iter().any(|u| u.value().len() > MAX_SETTING_LEN) {
            return Err(EngineError::validation(format!(
                "setting values are limited to {MAX_SETTING_LEN} bytes"
            )));
        }

        let _gate = self.gate.read().await;
        let mut guard = self.settings.write().await;
        let mut next = guard.clone();
        for update in updates {
            next.apply(update);
        }
        if next == *guard {
            return Ok(next);
        }

        let event = Event::SettingsUpdated { settings: next.clone() };
        self.journal_append(&event).await?;
        *guard = next.clone();
        info!("site settings updated");
        Ok(next)
    }

    // ── Journal maintenance ──────────────────────────────

    /// Rewrite the journal as the minimal event list that rebuilds current state.
    /// All mutations are paused until the swap completes.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;

        let mut ids: Vec<Ulid> = self.facilities.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut events = Vec::new();
        for id in ids {
            let Some(fs) = self.get_facility_state(&id) else { continue };
            let guard = fs.read().await;
            events.push(Event::FacilityCreated { facility: guard.facility.clone() });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        let settings = self.settings.read().await.clone();
        if settings != SiteSettings::default() {
            events.push(Event::SettingsUpdated { settings });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))?;
        info!(events = count, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
