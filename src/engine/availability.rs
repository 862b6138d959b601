use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};

use crate::model::*;

// ── Operating schedule ────────────────────────────────────────────

/// Daily operating window shared by every facility.
///
/// Hours are site-local wall-clock hours; `utc_offset` turns them into instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub open_hour: u32,
    /// Exclusive; `24` means midnight at the end of the day.
    pub close_hour: u32,
    pub slot_minutes: u32,
    /// Slots starting sooner than this after "now" cannot be booked.
    pub min_notice_ms: Ms,
    pub utc_offset: FixedOffset,
    pub closed_days: Vec<Weekday>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            open_hour: 7,
            close_hour: 23,
            slot_minutes: 60,
            min_notice_ms: 24 * HOUR_MS,
            utc_offset: Utc.fix(),
            closed_days: Vec::new(),
        }
    }
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        if self.close_hour > 24 || self.open_hour >= self.close_hour {
            return Err(format!(
                "operating hours {}:00-{}:00 are not a valid window",
                self.open_hour, self.close_hour
            ));
        }
        if self.slot_minutes == 0 {
            return Err("slot length must be positive".into());
        }
        if i64::from(self.slot_minutes) > i64::from(self.close_hour - self.open_hour) * 60 {
            return Err("slot length exceeds the operating window".into());
        }
        if self.min_notice_ms < 0 {
            return Err("minimum notice cannot be negative".into());
        }
        Ok(())
    }

    fn local_hour(&self, date: NaiveDate, hour: u32) -> Ms {
        let local = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        local + Ms::from(hour) * HOUR_MS - Ms::from(self.utc_offset.local_minus_utc()) * 1_000
    }

    /// Local midnight to the following local midnight.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        Span::new(self.local_hour(date, 0), self.local_hour(date, 24))
    }

    pub fn operating_span(&self, date: NaiveDate) -> Span {
        Span::new(
            self.local_hour(date, self.open_hour),
            self.local_hour(date, self.close_hour),
        )
    }

    pub fn local_datetime(&self, t: Ms) -> DateTime<FixedOffset> {
        DateTime::from_timestamp_millis(t)
            .unwrap_or_default()
            .with_timezone(&self.utc_offset)
    }

    pub fn today(&self, now: Ms) -> NaiveDate {
        self.local_datetime(now).date_naive()
    }

    pub fn label(&self, t: Ms) -> String {
        self.local_datetime(t).format("%H:%M").to_string()
    }

    pub fn is_closed(&self, weekday: Weekday) -> bool {
        self.closed_days.contains(&weekday)
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

// ── Slot computation ──────────────────────────────────────────────

/// Partition the operating window of `date` into slots and mark each one.
///
/// `booked` wins over `too_soon`. Past and closed days produce no slots.
pub fn day_availability(
    fs: &FacilityState,
    schedule: &Schedule,
    date: NaiveDate,
    now: Ms,
) -> DayAvailability {
    let weekday = date.weekday();
    let existing_bookings = fs.active_overlapping(&schedule.day_span(date)).count();
    let mut result = DayAvailability {
        facility: fs.facility.clone(),
        date,
        weekday,
        available: false,
        slots: Vec::new(),
        existing_bookings,
        message: None,
    };

    if date < schedule.today(now) {
        result.message = Some("Cannot book dates in the past".into());
        return result;
    }
    if schedule.is_closed(weekday) {
        result.message = Some(format!("Facility is closed on {}", weekday_name(weekday)));
        return result;
    }

    let window = schedule.operating_span(date);
    let step = Ms::from(schedule.slot_minutes) * MINUTE_MS;
    let earliest = now + schedule.min_notice_ms;

    let mut start = window.start;
    while start + step <= window.end {
        let span = Span::new(start, start + step);
        let reason = if fs.active_overlapping(&span).next().is_some() {
            Some(SlotReason::Booked)
        } else if span.start < earliest {
            Some(SlotReason::TooSoon)
        } else {
            None
        };
        result.slots.push(TimeSlot {
            span,
            start_label: schedule.label(span.start),
            end_label: schedule.label(span.end),
            available: reason.is_none(),
            reason,
        });
        start += step;
    }

    result.available = result.slots.iter().any(|s| s.available);
    if !result.available {
        result.message = Some("No time slots are available on this date".into());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(d: NaiveDate, hour: u32) -> Ms {
        d.and_hms_opt(hour, 0, 0).unwrap().and_utc().timestamp_millis()
    }

    fn hall() -> FacilityState {
        FacilityState::new(Facility {
            id: Ulid::new(),
            name: "Main Hall".into(),
            description: None,
            capacity: Some(150),
            hourly_rate: None,
            features: vec![],
        })
    }

    fn add(fs: &mut FacilityState, start: Ms, end: Ms, status: BookingStatus) {
        let span = Span::new(start, end);
        let (total_hours, total_cost) = price(&span, None);
        let facility_id = fs.id();
        fs.insert_booking(Booking {
            id: Ulid::new(),
            facility_id,
            customer_name: "Lee".into(),
            customer_email: "lee@example.org".into(),
            customer_phone: None,
            event_title: "Choir".into(),
            event_description: None,
            span,
            total_hours,
            total_cost,
            status,
            notes: None,
            created_at: 0,
            updated_at: 0,
        });
    }

    fn slot<'a>(day: &'a DayAvailability, label: &str) -> &'a TimeSlot {
        day.slots.iter().find(|s| s.start_label == label).unwrap()
    }

    #[test]
    fn default_window_has_sixteen_hourly_slots() {
        let d = date(2025, 6, 1);
        let day = day_availability(&hall(), &Schedule::default(), d, at(date(2025, 5, 1), 9));
        assert!(day.available);
        assert_eq!(day.slots.len(), 16);
        assert_eq!(day.slots[0].start_label, "07:00");
        assert_eq!(day.slots[15].end_label, "23:00");
        assert_eq!(day.weekday, Weekday::Sun);
        assert!(day.message.is_none());
    }

    #[test]
    fn booked_slots_are_marked() {
        let d = date(2025, 6, 1);
        let mut fs = hall();
        add(&mut fs, at(d, 10), at(d, 12), BookingStatus::Pending);
        let day = day_availability(&fs, &Schedule::default(), d, at(date(2025, 5, 1), 9));

        assert_eq!(slot(&day, "10:00").reason, Some(SlotReason::Booked));
        assert_eq!(slot(&day, "11:00").reason, Some(SlotReason::Booked));
        assert!(slot(&day, "12:00").available);
        assert!(slot(&day, "09:00").available);
        assert_eq!(day.existing_bookings, 1);
    }

    #[test]
    fn cancelled_bookings_free_their_slots() {
        let d = date(2025, 6, 1);
        let mut fs = hall();
        add(&mut fs, at(d, 10), at(d, 12), BookingStatus::Cancelled);
        let day = day_availability(&fs, &Schedule::default(), d, at(date(2025, 5, 1), 9));
        assert!(slot(&day, "10:00").available);
        assert_eq!(day.existing_bookings, 0);
    }

    #[test]
    fn partial_overlap_blocks_slot() {
        let d = date(2025, 6, 1);
        let mut fs = hall();
        add(&mut fs, at(d, 14) + 30 * MINUTE_MS, at(d, 15) + 15 * MINUTE_MS, BookingStatus::Confirmed);
        let day = day_availability(&fs, &Schedule::default(), d, at(date(2025, 5, 1), 9));
        assert_eq!(slot(&day, "14:00").reason, Some(SlotReason::Booked));
        assert_eq!(slot(&day, "15:00").reason, Some(SlotReason::Booked));
        assert!(slot(&day, "16:00").available);
    }

    #[test]
    fn minimum_notice_marks_too_soon() {
        let d = date(2025, 6, 1);
        let mut fs = hall();
        add(&mut fs, at(d, 8), at(d, 9), BookingStatus::Pending);
        // 24h notice from 2025-05-31 12:00 → everything before 12:00 on the 1st is too soon.
        let day = day_availability(&fs, &Schedule::default(), d, at(date(2025, 5, 31), 12));
        assert_eq!(slot(&day, "07:00").reason, Some(SlotReason::TooSoon));
        assert_eq!(slot(&day, "08:00").reason, Some(SlotReason::Booked));
        assert_eq!(slot(&day, "11:00").reason, Some(SlotReason::TooSoon));
        assert!(slot(&day, "12:00").available);
    }

    #[test]
    fn past_dates_are_unavailable() {
        let day = day_availability(
            &hall(),
            &Schedule::default(),
            date(2025, 6, 1),
            at(date(2025, 6, 2), 8),
        );
        assert!(!day.available);
        assert!(day.slots.is_empty());
        assert_eq!(day.message.as_deref(), Some("Cannot book dates in the past"));
    }

    #[test]
    fn today_is_not_past_but_slots_are_too_soon() {
        let d = date(2025, 6, 1);
        let day = day_availability(&hall(), &Schedule::default(), d, at(d, 6));
        assert!(!day.available);
        assert_eq!(day.slots.len(), 16);
        assert!(day.slots.iter().all(|s| s.reason == Some(SlotReason::TooSoon)));
    }

    #[test]
    fn closed_days_have_no_slots() {
        let schedule = Schedule {
            closed_days: vec![Weekday::Sun],
            ..Schedule::default()
        };
        let day = day_availability(&hall(), &schedule, date(2025, 6, 1), at(date(2025, 5, 1), 9));
        assert!(!day.available);
        assert!(day.slots.is_empty());
        assert_eq!(day.message.as_deref(), Some("Facility is closed on Sunday"));
    }

    #[test]
    fn offset_shifts_window_and_labels() {
        let schedule = Schedule {
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..Schedule::default()
        };
        let d = date(2025, 6, 1);
        let day = day_availability(&hall(), &schedule, d, at(date(2025, 5, 1), 9));
        // 07:00 at UTC+2 is 05:00 UTC.
        assert_eq!(day.slots[0].span.start, at(d, 5));
        assert_eq!(day.slots[0].start_label, "07:00");
    }

    #[test]
    fn trailing_partial_slot_is_dropped() {
        let schedule = Schedule {
            open_hour: 9,
            close_hour: 12,
            slot_minutes: 90,
            ..Schedule::default()
        };
        let day = day_availability(&hall(), &schedule, date(2025, 6, 1), at(date(2025, 5, 1), 9));
        let labels: Vec<&str> = day.slots.iter().map(|s| s.start_label.as_str()).collect();
        assert_eq!(labels, vec!["09:00", "10:30"]);
    }

    #[test]
    fn schedule_validation() {
        assert!(Schedule::default().validate().is_ok());
        let inverted = Schedule { open_hour: 20, close_hour: 8, ..Schedule::default() };
        assert!(inverted.validate().is_err());
        let zero_slot = Schedule { slot_minutes: 0, ..Schedule::default() };
        assert!(zero_slot.validate().is_err());
        let huge_slot = Schedule { open_hour: 9, close_hour: 10, slot_minutes: 120, ..Schedule::default() };
        assert!(huge_slot.validate().is_err());
    }
}
