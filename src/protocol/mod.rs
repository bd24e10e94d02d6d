pub mod frame;
pub mod message;
pub mod opcode;
pub mod packet;
pub mod xtea;

pub use frame::FrameReader;
pub use message::{client_error, text_message, MessageChannel};
pub use opcode::{dispatch, Dispatch};
pub use packet::{IncomingPacket, OutgoingPacket};
pub use xtea::{ExpandedKey, XteaKey};
