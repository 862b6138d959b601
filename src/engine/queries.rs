use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::day_availability;
use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_facility(&self, id: Ulid) -> Result<Facility, EngineError> {
        let fs = self.get_facility_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = fs.read().await;
        Ok(guard.facility.clone())
    }

    /// Every facility, ordered by name.
    pub async fn list_facilities(&self) -> Vec<Facility> {
        let states: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for fs in states {
            out.push(fs.read().await.facility.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let facility_id = self.facility_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let fs = self
            .get_facility_state(&facility_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = fs.read().await;
        let booking = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        Ok(BookingView {
            booking,
            facility: guard.facility.clone(),
        })
    }

    /// Bookings matching the filter, ordered by start time.
    pub async fn list_bookings(&self, filter: BookingFilter) -> Result<Vec<BookingView>, EngineError> {
        let states = match filter.facility_id {
            Some(id) => vec![self.get_facility_state(&id).ok_or(EngineError::NotFound(id))?],
            None => self.facilities.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for fs in states {
            let guard = fs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| filter.status.is_none_or(|s| b.status == s))
                    .map(|b| BookingView {
                        booking: b.clone(),
                        facility: guard.facility.clone(),
                    }),
            );
        }
        out.sort_by_key(|v| (v.booking.span.start, v.booking.id));
        Ok(out)
    }

    /// Whether `[start, end)` overlaps a pending or confirmed booking, ignoring `exclude`.
    pub async fn has_conflict(
        &self,
        facility_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_span(start, end)?;
        let fs = self
            .get_facility_state(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_some())
    }

    pub async fn availability(
        &self,
        facility_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<DayAvailability, EngineError> {
        let fs = self
            .get_facility_state(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        Ok(day_availability(&guard, &self.schedule, date, now))
    }

    pub async fn settings(&self) -> SiteSettings {
        self.settings.read().await.clone()
    }
}
