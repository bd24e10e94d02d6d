use crate::error::CodecError;
use crate::protocol::xtea::{ExpandedKey, BLOCK_SIZE};

/// Size of the little-endian length prefixes (outer frame and inner body)
pub const HEADER_LENGTH: usize = 2;

/// Filler byte used to round encrypted bodies up to the block size
const PADDING_BYTE: u8 = 0x33;

/// Cursor over a received packet
///
/// Every accessor is bounds-checked; input comes straight off the network.
#[derive(Debug, Clone)]
pub struct IncomingPacket {
    buffer: Vec<u8>,
    position: usize,
}

impl IncomingPacket {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Decrypt a frame body and consume its inner length
    ///
    /// The returned packet is positioned at the first payload byte and
    /// truncated to the inner length, dropping cipher padding.
    pub fn open(mut body: Vec<u8>, key: &ExpandedKey) -> Result<Self, CodecError> {
        key.decrypt(&mut body)?;

        let mut packet = Self::new(body);
        let inner = packet.get_u16()? as usize;
        if inner > packet.remaining() {
            return Err(CodecError::InnerLength {
                inner,
                available: packet.remaining(),
            });
        }
        packet.buffer.truncate(HEADER_LENGTH + inner);

        Ok(packet)
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Unread bytes, without advancing
    pub fn peek_remaining(&self) -> &[u8] {
        &self.buffer[self.position..]
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::OutOfBounds {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.position += n;
        Ok(&self.buffer[start..self.position])
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read a u16 length-prefixed string (lossy on invalid UTF-8)
    pub fn get_string(&mut self) -> Result<String, CodecError> {
        let len = self.get_u16()? as usize;
        self.get_string_slice(len)
    }

    /// Read a string of known length without a prefix
    pub fn get_string_slice(&mut self, len: usize) -> Result<String, CodecError> {
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Growable buffer for a packet about to be sent
#[derive(Debug, Clone, Default)]
pub struct OutgoingPacket {
    buffer: Vec<u8>,
}

impl OutgoingPacket {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Wrap an already encoded payload, e.g. a replayed record
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut packet = Self::with_capacity(bytes.len());
        packet.add_bytes(bytes);
        packet
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn add_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn add_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn add_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Append a u16 length-prefixed string
    pub fn add_string(&mut self, value: &str) -> Result<&mut Self, CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::StringTooLong(value.len()))?;
        self.add_u16(len);
        self.add_bytes(value.as_bytes());
        Ok(self)
    }

    /// Produce a wire frame: `[outer len][encrypt([inner len][payload][padding])]`
    ///
    /// Payloads longer than a u16 inner length are rejected.
    pub fn seal(&self, key: &ExpandedKey) -> Result<Vec<u8>, CodecError> {
        let payload = self.as_bytes();
        let inner = u16::try_from(payload.len()).map_err(|_| CodecError::FrameTooLarge(payload.len()))?;

        let body_len = (HEADER_LENGTH + payload.len()).next_multiple_of(BLOCK_SIZE);
        let mut body = Vec::with_capacity(body_len);
        body.extend_from_slice(&inner.to_le_bytes());
        body.extend_from_slice(payload);
        body.resize(body_len, PADDING_BYTE);

        key.encrypt(&mut body)?;
        with_length_header(&body)
    }
}

/// Prefix `body` with its length as a little-endian u16
pub fn with_length_header(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u16::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge(body.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LENGTH + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xtea::XteaKey;
    use proptest::prelude::*;

    fn key() -> ExpandedKey {
        XteaKey([1, 2, 3, 4]).expand()
    }

    #[test]
    fn test_seal_raw_data() {
        let frame = OutgoingPacket::from_bytes(&[0x01, 0x02, 0x03]).seal(&key()).unwrap();
        assert_eq!(
            frame,
            vec![0x08, 0x00, 0x5c, 0xb8, 0x3e, 0x2c, 0xc8, 0x1f, 0x36, 0x7d]
        );
    }

    #[test]
    fn test_seal_single_byte() {
        let mut packet = OutgoingPacket::with_capacity(10);
        packet.add_u8(0xFF);
        assert_eq!(
            packet.seal(&key()).unwrap(),
            vec![0x08, 0x00, 0x30, 0x60, 0x3f, 0x01, 0xf7, 0x8d, 0x16, 0xd1]
        );
    }

    #[test]
    fn test_open_strips_inner_length_and_padding() {
        let frame = OutgoingPacket::from_bytes(&[0x6F]).seal(&key()).unwrap();
        let mut packet = IncomingPacket::open(frame[HEADER_LENGTH..].to_vec(), &key()).unwrap();
        assert_eq!(packet.remaining(), 1);
        assert_eq!(packet.get_u8().unwrap(), 0x6F);
        assert!(packet.get_u8().is_err());
    }

    #[test]
    fn test_open_rejects_partial_block() {
        let result = IncomingPacket::open(vec![0u8; 10], &key());
        assert!(matches!(result, Err(CodecError::Cipher(_))));
    }

    #[test]
    fn test_open_rejects_oversized_inner_length() {
        let mut body = vec![0xFF, 0x00, 0, 0, 0, 0, 0, 0];
        key().encrypt(&mut body).unwrap();
        let result = IncomingPacket::open(body, &key());
        assert_eq!(
            result.unwrap_err(),
            CodecError::InnerLength {
                inner: 255,
                available: 6
            }
        );
    }

    #[test]
    fn test_reads_are_bounds_checked() {
        let mut packet = IncomingPacket::new(vec![0x01, 0x02, 0x03]);
        assert_eq!(packet.get_u16().unwrap(), 0x0201);
        assert_eq!(
            packet.get_u32(),
            Err(CodecError::OutOfBounds {
                wanted: 4,
                remaining: 1
            })
        );
        // A failed read does not move the cursor
        assert_eq!(packet.get_u8().unwrap(), 0x03);
    }

    #[test]
    fn test_string_round_trip() {
        let mut out = OutgoingPacket::default();
        out.add_string("Hi").unwrap().add_u32(0xDEADBEEF);

        let mut packet = IncomingPacket::new(out.as_bytes().to_vec());
        assert_eq!(packet.get_string().unwrap(), "Hi");
        assert_eq!(packet.get_u32().unwrap(), 0xDEADBEEF);
    }

    #[test]
    fn test_truncated_string_is_an_error() {
        let mut packet = IncomingPacket::new(vec![0x05, 0x00, b'a', b'b']);
        assert!(matches!(
            packet.get_string(),
            Err(CodecError::OutOfBounds { wanted: 5, remaining: 2 })
        ));
    }

    #[test]
    fn test_string_too_long() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            OutgoingPacket::default().add_string(&long),
            Err(CodecError::StringTooLong(_))
        ));
    }

    #[test]
    fn test_seal_rejects_oversized_payload() {
        // padded body would be 65536 bytes
        let payload = vec![0u8; 65530];
        assert!(matches!(
            OutgoingPacket::from_bytes(&payload).seal(&key()),
            Err(CodecError::FrameTooLarge(65536))
        ));
        assert!(OutgoingPacket::from_bytes(&payload[..65526]).seal(&key()).is_ok());
    }

    proptest! {
        #[test]
        fn prop_frame_recovers_payload(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
            let frame = OutgoingPacket::from_bytes(&payload).seal(&key()).unwrap();

            let outer = u16::from_le_bytes([frame[0], frame[1]]) as usize;
            prop_assert_eq!(outer, frame.len() - HEADER_LENGTH);

            let packet = IncomingPacket::open(frame[HEADER_LENGTH..].to_vec(), &key()).unwrap();
            prop_assert_eq!(packet.peek_remaining(), &payload[..]);
        }
    }
}
