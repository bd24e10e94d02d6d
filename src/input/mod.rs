pub mod line;
pub mod session_log;

pub use session_log::SessionLogReader;
