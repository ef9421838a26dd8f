use ulid::Ulid;

use crate::day::DayKey;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Field checks that run before any store is touched.
pub(crate) fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    required("name", &request.name)?;
    required("phone", &request.phone)?;
    required("pickup_location", &request.pickup_location)?;
    required("dropoff_location", &request.dropoff_location)?;

    if !request
        .phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
    {
        return Err(EngineError::InvalidInput(format!("phone {:?} has invalid characters", request.phone)));
    }

    if let Some(email) = &request.email {
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        let well_formed = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
        if !well_formed {
            return Err(EngineError::InvalidInput(format!("email {email:?} is malformed")));
        }
    }

    if request.price < 0 {
        return Err(EngineError::InvalidInput("price must not be negative".into()));
    }
    if request.price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

fn required(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} is required")));
    }
    if value.len() > MAX_TEXT_FIELD_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

pub(crate) fn validate_record(record: &AvailabilityRecord) -> Result<(), EngineError> {
    validate_capacity(record.max_per_slot)
}

pub(crate) fn validate_capacity(max_per_slot: u32) -> Result<(), EngineError> {
    if max_per_slot < 1 {
        return Err(EngineError::InvalidInput("max_per_slot must be at least 1".into()));
    }
    if max_per_slot > MAX_PER_SLOT_LIMIT {
        return Err(EngineError::LimitExceeded("max_per_slot too large"));
    }
    Ok(())
}

/// `RS-YYMMDD-XXXXXX`: the ride day plus the random tail of a fresh ULID.
pub(crate) fn booking_number(day: DayKey) -> String {
    let id = Ulid::new().to_string();
    format!("RS-{}-{}", day.compact(), &id[id.len() - 6..])
}
