//! Bearer-token persistence and redirect parsing.
//!
//! The token itself is opaque; we never inspect, refresh or log it. On disk
//! it is sealed with a per-install key and both files are owner-only.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const ACCESS_TOKEN_PARAM: &str = "access_token=";
const NONCE_LEN: usize = 12;

#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Returns `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} chars>)", self.0.len())
    }
}

/// Extract the bearer token from an auth redirect such as
/// `glance://callback#access_token=abc&token_type=Bearer&expires_in=3600`.
///
/// Only the fragment is inspected; the first `access_token=` parameter wins.
pub fn token_from_redirect(uri: &str) -> Option<AuthToken> {
    let (_, fragment) = uri.split_once('#')?;
    fragment
        .split('&')
        .find_map(|param| param.strip_prefix(ACCESS_TOKEN_PARAM))
        .and_then(AuthToken::new)
}

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("token key is not 32 bytes of base64")]
    BadKey,
    #[error("stored token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token cipher failed (wrong key or altered file)")]
    Cipher,
}

type TokenKey = [u8; 32];

/// On-disk form of the token: ChaCha20-Poly1305 under the key file.
#[derive(Debug, Serialize, Deserialize)]
struct SealedToken {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredToken {
    Sealed(SealedToken),
    /// Written by older builds; resealed on the next save.
    Plain { access_token: String },
}

fn decode_key(encoded: &str) -> Result<TokenKey, SealError> {
    let bytes = BASE64.decode(encoded.trim())?;
    bytes.try_into().map_err(|_| SealError::BadKey)
}

fn seal(key: &TokenKey, plaintext: &str) -> Result<SealedToken, SealError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| SealError::Cipher)?;

    Ok(SealedToken {
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

fn open(key: &TokenKey, sealed: &SealedToken) -> Result<String, SealError> {
    let nonce = BASE64.decode(&sealed.nonce)?;
    if nonce.len() != NONCE_LEN {
        return Err(SealError::Cipher);
    }
    let ciphertext = BASE64.decode(&sealed.ciphertext)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| SealError::Cipher)?;
    String::from_utf8(plaintext).map_err(|_| SealError::Cipher)
}

/// Write a file only the owner can read.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;

    // `mode` only applies on creation; tighten files left by older builds.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

pub struct TokenStore {
    token_file: PathBuf,
    key_file: PathBuf,
}

impl TokenStore {
    pub fn new(token_file: PathBuf, key_file: PathBuf) -> Self {
        Self {
            token_file,
            key_file,
        }
    }

    pub fn path(&self) -> &Path {
        &self.token_file
    }

    /// Missing, unreadable, corrupt or undecryptable files all read as
    /// "no token".
    pub fn load(&self) -> Option<AuthToken> {
        let content = match std::fs::read_to_string(&self.token_file) {
            Ok(c) => c,
            Err(e) => {
                debug!("No stored token at {:?}: {}", self.token_file, e);
                return None;
            }
        };

        let stored = match serde_json::from_str::<StoredToken>(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Ignoring corrupt token file {:?}: {}", self.token_file, e);
                return None;
            }
        };

        match stored {
            StoredToken::Sealed(sealed) => {
                let key = self.read_key()?;
                match open(&key, &sealed) {
                    Ok(secret) => AuthToken::new(secret),
                    Err(e) => {
                        warn!("Ignoring stored token {:?}: {}", self.token_file, e);
                        None
                    }
                }
            }
            StoredToken::Plain { access_token } => {
                warn!("Stored token is not sealed; it will be sealed on the next save");
                AuthToken::new(access_token)
            }
        }
    }

    fn read_key(&self) -> Option<TokenKey> {
        let content = match std::fs::read_to_string(&self.key_file) {
            Ok(c) => c,
            Err(e) => {
                warn!("Token key {:?} unreadable: {}", self.key_file, e);
                return None;
            }
        };
        match decode_key(&content) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Token key {:?} unusable: {}", self.key_file, e);
                None
            }
        }
    }

    async fn load_or_create_key(&self) -> anyhow::Result<TokenKey> {
        match tokio::fs::read_to_string(&self.key_file).await {
            Ok(content) => match decode_key(&content) {
                Ok(key) => return Ok(key),
                Err(e) => warn!("Replacing unusable token key {:?}: {}", self.key_file, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        write_private(&self.key_file, BASE64.encode(key).as_bytes()).await?;
        info!("Created token key at {:?}", self.key_file);
        Ok(key)
    }

    pub async fn save(&self, token: &AuthToken) -> anyhow::Result<()> {
        let key = self.load_or_create_key().await?;
        let sealed = seal(&key, token.secret())?;
        let json = serde_json::to_string_pretty(&sealed)?;
        write_private(&self.token_file, json.as_bytes()).await?;
        Ok(())
    }
}
