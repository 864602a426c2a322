/// Terminal status codes shared by replies and long-lived server states.
///
/// Call replies use `Success` through `Unavailable`, plus `Busy` when the
/// resource model reports backpressure. `Idle` and `Pending` describe
/// long-lived server states and never appear in a reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Unknown = 0,
    Success = 1,
    ErrorInvalid = 2,
    ErrorTimeout = 3,
    ErrorUnavailable = 4,
    Busy = 5,
    Idle = 6,
    Pending = 7,
}

impl Status {
    /// Decode a wire status byte. Unrecognized bytes map to `Unknown`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Status::Success,
            2 => Status::ErrorInvalid,
            3 => Status::ErrorTimeout,
            4 => Status::ErrorUnavailable,
            5 => Status::Busy,
            6 => Status::Idle,
            7 => Status::Pending,
            _ => Status::Unknown,
        }
    }

    /// The wire byte for this status.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// The canonical uppercase name used in error messages and logs.
    pub fn name(self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Success => "SUCCESS",
            Status::ErrorInvalid => "ERROR_INVALID",
            Status::ErrorTimeout => "ERROR_TIMEOUT",
            Status::ErrorUnavailable => "ERROR_UNAVAILABLE",
            Status::Busy => "BUSY",
            Status::Idle => "IDLE",
            Status::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_round_trip() {
        for raw in 0u8..=7 {
            assert_eq!(Status::from_u8(raw).as_u8(), raw);
        }
    }

    #[test]
    fn unrecognized_bytes_are_unknown() {
        assert_eq!(Status::from_u8(8), Status::Unknown);
        assert_eq!(Status::from_u8(255), Status::Unknown);
    }
}
