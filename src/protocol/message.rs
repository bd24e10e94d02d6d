//! Server to client messages generated by the replay server itself

use crate::error::CodecError;
use crate::protocol::packet::OutgoingPacket;

const OPCODE_CLIENT_ERROR: u8 = 0x0A;
const OPCODE_TEXT_MESSAGE: u8 = 0xB4;

/// Display channel of a text message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageChannel {
    /// Large centered notice
    Advance = 0x13,
    /// Small line above the status bar
    Status = 0x17,
}

/// Text message shown on the given channel
pub fn text_message(channel: MessageChannel, text: &str) -> Result<OutgoingPacket, CodecError> {
    let mut packet = OutgoingPacket::with_capacity(text.len() + 4);
    packet.add_u8(OPCODE_TEXT_MESSAGE).add_u8(channel as u8);
    packet.add_string(text)?;
    Ok(packet)
}

/// Login error popup; the client disconnects after showing it
pub fn client_error(text: &str) -> Result<OutgoingPacket, CodecError> {
    let mut packet = OutgoingPacket::with_capacity(text.len() + 3);
    packet.add_u8(OPCODE_CLIENT_ERROR);
    packet.add_string(text)?;
    Ok(packet)
}
