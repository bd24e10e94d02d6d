pub mod listener;
pub mod login;
pub mod session;
pub mod shutdown;

pub use listener::ReplayServer;
pub use login::RsaHandshake;
pub use shutdown::ShutdownSignal;
