//! TCP accept loop and per-connection setup

use crate::config::Config;
use crate::input::SessionLogReader;
use crate::protocol::{client_error, ExpandedKey};
use crate::server::login::{Handshake, LoginRequest};
use crate::server::session::{Session, SessionConfig};
use crate::server::ShutdownSignal;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Recording extensions tried in order for a session name
const RECORDING_EXTENSIONS: [&str; 2] = ["cam", "cam.gz"];

/// Replay server accepting viewer connections
pub struct ReplayServer<H> {
    listener: TcpListener,
    handshake: Arc<H>,
    config: Arc<Config>,
    shutdown: ShutdownSignal,
}

impl<H: Handshake + 'static> ReplayServer<H> {
    pub async fn bind(config: Config, handshake: H, shutdown: ShutdownSignal) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            listener,
            handshake: Arc::new(handshake),
            config: Arc::new(config),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait for open sessions
    pub async fn run(self) -> io::Result<()> {
        let mut sessions = JoinSet::new();

        while !self.shutdown.is_triggered() {
            while let Some(result) = sessions.try_join_next() {
                if let Err(e) = result {
                    error!("Session task failed: {}", e);
                }
            }

            let (stream, peer) = match tokio::time::timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Cannot set TCP_NODELAY for {}: {}", peer, e);
            }
            info!("Connection from {}", peer);

            sessions.spawn(handle_connection(
                stream,
                peer,
                self.handshake.clone(),
                self.config.clone(),
                self.shutdown.clone(),
            ));
        }

        info!("No longer accepting connections, waiting for {} session(s)", sessions.len());
        while let Some(result) = sessions.join_next().await {
            if let Err(e) = result {
                error!("Session task failed: {}", e);
            }
        }
        Ok(())
    }
}

async fn handle_connection<H: Handshake>(
    stream: TcpStream,
    peer: SocketAddr,
    handshake: Arc<H>,
    config: Arc<Config>,
    shutdown: ShutdownSignal,
) {
    let (mut reader, mut writer) = stream.into_split();

    let request = match tokio::time::timeout(config.read_timeout(), handshake.accept(&mut reader)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            warn!("[{}] Login failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("[{}] Login timed out", peer);
            return;
        }
    };
    debug!("[{}] {:?}", peer, request);

    let key = request.key.expand();
    let log = match open_recording(&config, &request) {
        Ok(log) => log,
        Err(message) => {
            warn!("[{}] {}", peer, message);
            reject(&mut writer, &key, &message).await;
            return;
        }
    };

    let id = format!("{}@{}", request.character.trim(), peer);
    info!("[{}] Replaying {}", id, log.path().display());

    let session = Session::new(
        id,
        reader,
        writer,
        key,
        log,
        SessionConfig::from(config.as_ref()),
        shutdown,
    );
    // outcome is logged by the session
    let _ = session.run().await;
}

/// Open the recording for a login, or describe why it cannot be played
fn open_recording(config: &Config, request: &LoginRequest) -> Result<SessionLogReader, String> {
    let name = request.session_name().map_err(|e| e.to_string())?;
    let path = resolve_recording(config, name)
        .ok_or_else(|| format!("No recording found for session {:?}", name))?;
    SessionLogReader::open(&path).map_err(|e| format!("Cannot open recording: {}", e))
}

/// Locate `<recordings_dir>/<name>.cam[.gz]`, falling back to the default recording
pub fn resolve_recording(config: &Config, name: &str) -> Option<PathBuf> {
    RECORDING_EXTENSIONS
        .iter()
        .map(|ext| config.recordings_dir.join(format!("{}.{}", name, ext)))
        .find(|path| path.is_file())
        .or_else(|| {
            // a relative default is looked up in the recordings directory
            config
                .default_recording
                .as_deref()
                .map(|path| config.recordings_dir.join(path))
                .filter(|path| path.is_file())
        })
}

/// Tell the client why it cannot watch and close the connection
async fn reject<W: AsyncWrite + Unpin>(writer: &mut W, key: &ExpandedKey, message: &str) {
    let frame = match client_error(message).and_then(|packet| packet.seal(key)) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Cannot encode client error: {}", e);
            return;
        }
    };
    if let Err(e) = writer.write_all(&frame).await {
        debug!("Error sending client error: {}", e);
    }
    let _ = writer.shutdown().await;
}
