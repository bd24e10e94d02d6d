use std::fmt;

/// Which side of the recorded connection sent a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to client traffic (`<`), the only kind that is replayed
    Outbound,
    /// Client to server traffic (`>`)
    Inbound,
}

impl Direction {
    /// Parse the single-character marker used in session logs
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "<" => Some(Direction::Outbound),
            ">" => Some(Direction::Inbound),
            _ => None,
        }
    }

    pub fn marker(&self) -> char {
        match self {
            Direction::Outbound => '<',
            Direction::Inbound => '>',
        }
    }
}

/// One timestamped packet from a recorded session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture time in milliseconds
    pub timestamp_millis: i64,

    /// Who sent it in the recorded session
    pub direction: Direction,

    /// Raw protocol bytes, replayed verbatim
    pub payload: Vec<u8>,
}

impl PacketRecord {
    pub fn new(timestamp_millis: i64, direction: Direction, payload: Vec<u8>) -> Self {
        Self {
            timestamp_millis,
            direction,
            payload,
        }
    }

    /// Check if this record should be sent to the viewer
    pub fn is_replayable(&self) -> bool {
        self.direction == Direction::Outbound
    }
}

impl fmt::Display for PacketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.direction.marker(),
            self.timestamp_millis,
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_markers() {
        assert_eq!(Direction::from_marker("<"), Some(Direction::Outbound));
        assert_eq!(Direction::from_marker(">"), Some(Direction::Inbound));
        assert_eq!(Direction::from_marker("!"), None);
        assert_eq!(Direction::from_marker("<<"), None);
    }

    #[test]
    fn test_display_matches_log_line() {
        let record = PacketRecord::new(1000, Direction::Outbound, b"Hello".to_vec());
        assert_eq!(record.to_string(), "< 1000 48656c6c6f");
        assert!(record.is_replayable());
    }
}
