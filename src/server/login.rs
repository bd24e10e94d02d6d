//! Login handshake that opens a replay connection
//!
//! The client's first packet is sent in the clear except for one RSA block
//! holding the XTEA key and credentials. Everything after this packet is
//! XTEA framed.

use crate::error::LoginError;
use crate::protocol::{IncomingPacket, XteaKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const OTCV8_MAGIC: &str = "OTCv8";

/// Fields extracted from a client login packet
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub client_os: u16,
    pub protocol_version: u16,
    pub key: XteaKey,
    pub gamemaster: bool,
    pub account_number: u32,
    /// Selects the recording to replay
    pub character: String,
    pub password: String,
    pub otcv8_version: Option<u16>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("client_os", &self.client_os)
            .field("protocol_version", &self.protocol_version)
            .field("gamemaster", &self.gamemaster)
            .field("account_number", &self.account_number)
            .field("character", &self.character)
            .field("otcv8_version", &self.otcv8_version)
            .finish_non_exhaustive()
    }
}

impl LoginRequest {
    /// Character name as a recording name, rejecting anything path-like
    pub fn session_name(&self) -> Result<&str, LoginError> {
        let name = self.character.trim();
        let path_like = name.contains('/') || name.contains('\\') || name.contains("..");
        if name.is_empty() || path_like || name.chars().any(char::is_control) {
            return Err(LoginError::InvalidName(self.character.clone()));
        }
        Ok(name)
    }
}

/// Produces the cipher key and session name for a new connection
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn accept<R>(&self, reader: &mut R) -> Result<LoginRequest, LoginError>
    where
        R: AsyncRead + Unpin + Send;
}

/// Handshake for clients that RSA-encrypt their login block
pub struct RsaHandshake {
    key: Rsa<Private>,
}

impl RsaHandshake {
    pub fn new(key: Rsa<Private>) -> Self {
        Self { key }
    }

    /// Load a PEM encoded private key
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path)
            .with_context(|| format!("Failed to read RSA key {}", path.display()))?;
        let key = Rsa::private_key_from_pem(&pem)
            .with_context(|| format!("Failed to parse RSA key {}", path.display()))?;
        Ok(Self::new(key))
    }

    /// Size of the encrypted block in bytes
    pub fn block_size(&self) -> usize {
        self.key.size() as usize
    }

    /// Parse a login packet body (everything after the length header)
    pub fn parse(&self, body: Vec<u8>) -> Result<LoginRequest, LoginError> {
        let mut packet = IncomingPacket::new(body);

        // protocol id
        packet.skip(1)?;
        let client_os = packet.get_u16()?;
        let protocol_version = packet.get_u16()?;

        let block = packet.get_bytes(self.block_size())?;
        let mut plain = vec![0u8; self.block_size()];
        let n = self.key.private_decrypt(&block, &mut plain, Padding::NONE)?;
        plain.truncate(n);
        plain.extend_from_slice(packet.peek_remaining());

        let mut packet = IncomingPacket::new(plain);
        if packet.get_u8()? != 0 {
            return Err(LoginError::BadBlock);
        }

        let key = XteaKey([
            packet.get_u32()?,
            packet.get_u32()?,
            packet.get_u32()?,
            packet.get_u32()?,
        ]);
        let gamemaster = packet.get_u8()? != 0;
        let account_number = packet.get_u32()?;
        let character = packet.get_string()?;
        let password = packet.get_string()?;
        let otcv8_version = otcv8_extension(&mut packet);

        Ok(LoginRequest {
            client_os,
            protocol_version,
            key,
            gamemaster,
            account_number,
            character,
            password,
            otcv8_version,
        })
    }
}

#[async_trait]
impl Handshake for RsaHandshake {
    async fn accept<R>(&self, reader: &mut R) -> Result<LoginRequest, LoginError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let len = reader.read_u16_le().await? as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        debug!("Login packet of {} bytes", len);
        self.parse(body)
    }
}

/// Trailing `OTCv8` marker and client version, if present
fn otcv8_extension(packet: &mut IncomingPacket) -> Option<u16> {
    let len = packet.get_u16().ok()? as usize;
    if len != OTCV8_MAGIC.len() {
        return None;
    }
    let magic = packet.get_string_slice(len).ok()?;
    if magic != OTCV8_MAGIC {
        return None;
    }
    packet.get_u16().ok()
}
