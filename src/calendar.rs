use crate::model::{AvailabilityView, Slot};

/// Display state of a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarStatus {
    Available,
    Partial,
    Booked,
}

impl CalendarStatus {
    /// The projection itself: two admissibility bits in, one state out.
    pub fn from_admissible(morning: bool, evening: bool) -> Self {
        match (morning, evening) {
            (true, true) => CalendarStatus::Available,
            (false, false) => CalendarStatus::Booked,
            _ => CalendarStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarStatus::Available => "AVAILABLE",
            CalendarStatus::Partial => "PARTIAL",
            CalendarStatus::Booked => "BOOKED",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            CalendarStatus::Available => "green",
            CalendarStatus::Partial => "orange",
            CalendarStatus::Booked => "red",
        }
    }
}

/// A slot counts as open only if its flag is set and it still has capacity,
/// so a slot full by count never shows as available.
pub fn project(view: &AvailabilityView) -> CalendarStatus {
    CalendarStatus::from_admissible(view.admissible(Slot::Morning), view.admissible(Slot::Evening))
}
