use crate::core::{Direction, PacketRecord};
use crate::error::LineError;

/// Parse one session log line: `<direction> <timestampMillis> <hexPayload>`
pub fn parse_line(line: &str) -> Result<PacketRecord, LineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(LineError::FieldCount(fields.len()));
    }

    let direction =
        Direction::from_marker(fields[0]).ok_or_else(|| LineError::Direction(fields[0].to_string()))?;

    let timestamp_millis = fields[1]
        .parse::<i64>()
        .map_err(|e| LineError::Timestamp(e.to_string()))?;

    let payload = hex::decode(fields[2]).map_err(|e| LineError::Hex(e.to_string()))?;

    Ok(PacketRecord::new(timestamp_millis, direction, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_lines() {
        let record = parse_line("< 1627391000 48656c6c6f\n").unwrap();
        assert_eq!(record.timestamp_millis, 1627391000);
        assert_eq!(record.direction, Direction::Outbound);
        assert_eq!(record.payload, b"Hello");

        let record = parse_line("> 1627391001 776F726C64\r\n").unwrap();
        assert_eq!(record.direction, Direction::Inbound);
        assert_eq!(record.payload, b"world");
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("< 1627391000", "invalid data format"),
            ("< 1 00 extra", "invalid data format"),
            ("! 1627391001 776f726c64", "invalid packet type"),
            ("< invalid_timestamp 48656c6c6f", "invalid timestamp format"),
            ("< 1627391000 invalid_hex", "error decoding hex string"),
            ("< 1627391000 abc", "error decoding hex string"),
        ];

        for (input, expected) in cases {
            let err = parse_line(input).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{input:?}: expected {expected:?}, got {err}"
            );
        }
    }

    #[test]
    fn test_negative_timestamp_and_single_byte() {
        let record = parse_line("< -5 00").unwrap();
        assert_eq!(record.timestamp_millis, -5);
        assert_eq!(record.payload, vec![0]);
    }
}
