use crate::model::DayKey;
use crate::schedule::Slot;

/// Machine-distinguishable failure class, one per rejection category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    CapacityExceeded,
    DuplicateBooking,
    Unauthorized,
    Forbidden,
    LimitExceeded,
    Unavailable,
}

impl ErrorKind {
    pub fn is_conflict(self) -> bool {
        matches!(self, ErrorKind::CapacityExceeded | ErrorKind::DuplicateBooking)
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::DuplicateBooking => "duplicate_booking",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    InvalidInput {
        field: &'static str,
        reason: &'static str,
    },
    NotFound(String),
    CapacityExceeded {
        slot: Slot,
        booked: u32,
        requested: u32,
        capacity: u32,
    },
    DuplicateBooking {
        user_id: String,
        day: DayKey,
        slot: Slot,
    },
    Unauthorized,
    Forbidden(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn invalid(field: &'static str, reason: &'static str) -> Self {
        EngineError::InvalidInput { field, reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput { .. } => ErrorKind::InvalidInput,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::DuplicateBooking { .. } => ErrorKind::DuplicateBooking,
            EngineError::Unauthorized => ErrorKind::Unauthorized,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::WalError(_) => ErrorKind::Unavailable,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::NotFound(id) => write!(f, "listing not found: {id}"),
            EngineError::CapacityExceeded {
                slot,
                booked,
                requested,
                capacity,
            } => {
                let remaining = capacity.saturating_sub(*booked);
                write!(
                    f,
                    "slot {slot} has {remaining} of {capacity} seats left; cannot seat {requested}"
                )
            }
            EngineError::DuplicateBooking { user_id, day, slot } => {
                write!(f, "user {user_id} already booked {day} {slot}")
            }
            EngineError::Unauthorized => write!(f, "unauthenticated caller"),
            EngineError::Forbidden(id) => write!(f, "caller may not access listing {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
