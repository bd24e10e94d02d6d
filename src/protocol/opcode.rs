//! Inbound opcodes and their mapping to playback commands

use crate::core::Command;
use crate::error::CodecError;
use crate::protocol::packet::IncomingPacket;

/// First byte of a decrypted client packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    Logout,
    SpeedUp,
    MoveForward,
    SpeedDown,
    MoveBackward,
    Say,
    Unknown(u8),
}

impl From<u8> for ClientOpcode {
    fn from(byte: u8) -> Self {
        match byte {
            0x14 => ClientOpcode::Logout,
            0x6F => ClientOpcode::SpeedUp,
            0x70 => ClientOpcode::MoveForward,
            0x71 => ClientOpcode::SpeedDown,
            0x72 => ClientOpcode::MoveBackward,
            0x96 => ClientOpcode::Say,
            other => ClientOpcode::Unknown(other),
        }
    }
}

/// Result of decoding one client packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Command(Command),
    Ignored(Ignored),
}

/// Why a client packet produced no command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    /// Walking has no meaning during replay
    Movement,
    /// Chat text that is not a playback command
    Chat(String),
    Unknown(u8),
}

/// Speak classes of the say packet (subset that changes its layout)
mod speak_class {
    pub const PRIVATE: u8 = 4;
    pub const CHANNEL_YELLOW: u8 = 5;
    pub const RVR_ANSWER: u8 = 7;
    pub const CHANNEL_RED: u8 = 10;
    pub const PRIVATE_RED: u8 = 11;
    pub const CHANNEL_RED_ANONYMOUS: u8 = 14;
}

/// Decode a client packet positioned at its opcode
pub fn dispatch(packet: &mut IncomingPacket) -> Result<Dispatch, CodecError> {
    let dispatch = match ClientOpcode::from(packet.get_u8()?) {
        ClientOpcode::Logout => Dispatch::Command(Command::Logout),
        ClientOpcode::SpeedUp => Dispatch::Command(Command::SpeedUp),
        ClientOpcode::SpeedDown => Dispatch::Command(Command::SpeedDown),
        ClientOpcode::MoveForward | ClientOpcode::MoveBackward => Dispatch::Ignored(Ignored::Movement),
        ClientOpcode::Say => {
            let text = parse_say(packet)?;
            match chat_command(&text) {
                Some(command) => Dispatch::Command(command),
                None => Dispatch::Ignored(Ignored::Chat(text)),
            }
        }
        ClientOpcode::Unknown(byte) => Dispatch::Ignored(Ignored::Unknown(byte)),
    };

    Ok(dispatch)
}

/// Extract the spoken text from a say packet body
pub fn parse_say(packet: &mut IncomingPacket) -> Result<String, CodecError> {
    match packet.get_u8()? {
        speak_class::PRIVATE | speak_class::PRIVATE_RED | speak_class::RVR_ANSWER => {
            // receiver name
            packet.get_string()?;
        }
        speak_class::CHANNEL_YELLOW | speak_class::CHANNEL_RED | speak_class::CHANNEL_RED_ANONYMOUS => {
            // channel id
            packet.get_u16()?;
        }
        _ => {}
    }

    packet.get_string()
}

/// Map chat text such as `/pause` to a command
pub fn chat_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    match word.to_ascii_lowercase().as_str() {
        "/pause" => Some(Command::Pause),
        "/resume" | "/play" => Some(Command::Resume),
        "/stop" => Some(Command::Stop),
        _ => None,
    }
}
