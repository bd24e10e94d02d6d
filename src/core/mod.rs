pub mod command;
pub mod record;

pub use command::Command;
pub use record::{Direction, PacketRecord};
