/// Playback control requested by the viewer
///
/// `Stop` and `Logout` end the session; the rest change playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SpeedUp,
    SpeedDown,
    Pause,
    Resume,
    Stop,
    Logout,
}
