use crate::day::{DayError, DayKey};
use crate::model::{BookingStatus, Slot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or missing request field; nothing was touched.
    InvalidInput(String),
    InvalidDate(String),
    SlotClosed {
        day: DayKey,
        slot: Slot,
    },
    SlotFull {
        day: DayKey,
        slot: Slot,
        max: u32,
    },
    /// The day holds more than one availability record and needs repair.
    DuplicateDay(DayKey),
    Conflict(String),
    NotFound(String),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    CapacityBelowOccupancy {
        day: DayKey,
        slot: Slot,
        active: u32,
        requested: u32,
    },
    LimitExceeded(&'static str),
    /// Log I/O failure. Safe to retry: nothing was applied.
    Transient(String),
}

impl EngineError {
    /// Stable application code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::InvalidDate(_) => "INVALID_DATE",
            EngineError::SlotClosed { .. } => "SLOT_CLOSED",
            EngineError::SlotFull { .. } => "SLOT_FULL",
            EngineError::DuplicateDay(_) => "DUPLICATE_DAY",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::CapacityBelowOccupancy { .. } => "CAPACITY_BELOW_OCCUPANCY",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Transient(_) => "TRANSIENT",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// Business rejections are expected outcomes, not failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::SlotClosed { .. } | EngineError::SlotFull { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidDate(msg) => write!(f, "invalid date: {msg}"),
            EngineError::SlotClosed { day, slot } => {
                write!(f, "{} slot unavailable for {day}", slot.label())
            }
            EngineError::SlotFull { day, slot, max } => {
                write!(f, "{} slot for {day} is fully booked ({max} of {max})", slot.label())
            }
            EngineError::DuplicateDay(day) => {
                write!(f, "duplicate availability records for {day}; run repair_duplicates()")
            }
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::CapacityBelowOccupancy { day, slot, active, requested } => write!(
                f,
                "cannot set capacity to {requested}: {} slot for {day} already has {active} active bookings",
                slot.label()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Transient(msg) => write!(f, "storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<DayError> for EngineError {
    fn from(e: DayError) -> Self {
        EngineError::InvalidDate(e.to_string())
    }
}
