use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::validation("start time must be before end time"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(span)
}

/// First active booking overlapping `span`, skipping `exclude`.
pub(crate) fn find_conflict(fs: &FacilityState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    fs.active_overlapping(span)
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    fs: &FacilityState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(fs, span, exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(existing))
        }
        None => Ok(()),
    }
}
