// =============================================================================
// Credential Store — authenticated encryption for venue API keys at rest
// =============================================================================
//
// SECURITY: cleartext credentials exist only in memory and are never logged
// or serialized. The blob on disk is AES-256-GCM under a key derived from
// the master password with PBKDF2-HMAC-SHA256 (100k iterations, per-blob
// random salt). Writes are atomic (tmp + rename) and the file is owner-only.
// =============================================================================

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// AES-256-GCM with a 128-bit IV, matching the on-disk blob format.
type BlobCipher = AesGcm<Aes256, U16>;

/// PBKDF2 iteration count. Never lowered.
const PBKDF2_ITERATIONS: u32 = 100_000;
/// Per-blob salt length (256 bit).
const SALT_LEN: usize = 32;
/// Per-write IV length (128 bit).
const IV_LEN: usize = 16;
/// GCM authentication tag length.
const TAG_LEN: usize = 16;
/// Required minimum master password length.
const MIN_PASSWORD_LEN: usize = 12;
/// Current blob format version.
const BLOB_VERSION: u32 = 1;

/// API key pair for one venue. `Debug` redacts both fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueKeys {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for VenueKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueKeys")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// The encrypted blob as stored on disk. All byte fields are base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecretsBlob {
    pub version: u32,
    pub salt: String,
    pub iv: String,
    pub auth_tag: String,
    pub ciphertext: String,
}

/// Typed failures. Authorization-class errors (bad tag, wrong password) are
/// never retried by callers.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("master password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,
    #[error("authentication tag mismatch — wrong password or corrupted blob")]
    AuthFailed,
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed blob field: {0}")]
    Malformed(&'static str),
    #[error("secrets file not found at {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("blob serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Encrypts and decrypts the venue-credential map at a fixed path.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `~/.titan-scanner/secrets.enc`.
    pub fn default_path() -> PathBuf {
        state_dir().join("secrets.enc")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt `credentials` under `password` and persist atomically.
    pub fn save(
        &self,
        credentials: &BTreeMap<String, VenueKeys>,
        password: &str,
    ) -> Result<(), SecretsError> {
        let blob = encrypt(credentials, password)?;
        let content = serde_json::to_string_pretty(&blob)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Atomic write: tmp sibling, permissions first, then rename.
        let tmp = self.path.with_extension("enc.tmp");
        std::fs::write(&tmp, content)?;
        set_owner_only(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), venues = credentials.len(), "credentials saved");
        Ok(())
    }

    /// Decrypt the blob. The GCM tag is verified before any cleartext is
    /// returned.
    pub fn load(&self, password: &str) -> Result<BTreeMap<String, VenueKeys>, SecretsError> {
        if !self.path.exists() {
            return Err(SecretsError::NotFound(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path)?;
        let blob: EncryptedSecretsBlob = serde_json::from_str(&content)?;
        decrypt(&blob, password)
    }

    /// Re-encrypt under a new password. The old password must decrypt the
    /// current blob first; the replacement write is atomic, so a crash leaves
    /// either the old or the new blob intact.
    pub fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SecretsError> {
        let credentials = self.load(old_password)?;
        self.save(&credentials, new_password)?;
        info!(path = %self.path.display(), "credential blob re-encrypted under new password");
        Ok(())
    }
}

/// State directory root: `$TITAN_CONFIG_DIR` or `~/.titan-scanner`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TITAN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".titan-scanner")
}

// =============================================================================
// Encrypt / decrypt primitives
// =============================================================================

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn encrypt(
    credentials: &BTreeMap<String, VenueKeys>,
    password: &str,
) -> Result<EncryptedSecretsBlob, SecretsError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(SecretsError::PasswordTooShort);
    }

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let key = derive_key(password, &salt);
    let cipher = BlobCipher::new(Key::<BlobCipher>::from_slice(&key));

    let cleartext = serde_json::to_vec(credentials)?;
    let mut sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), cleartext.as_slice())
        .map_err(|_| SecretsError::AuthFailed)?;

    // The AEAD appends the tag; the blob stores it as its own field.
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(EncryptedSecretsBlob {
        version: BLOB_VERSION,
        salt: BASE64.encode(salt),
        iv: BASE64.encode(iv),
        auth_tag: BASE64.encode(tag),
        ciphertext: BASE64.encode(sealed),
    })
}

fn decrypt(
    blob: &EncryptedSecretsBlob,
    password: &str,
) -> Result<BTreeMap<String, VenueKeys>, SecretsError> {
    if blob.version != BLOB_VERSION {
        return Err(SecretsError::UnsupportedVersion(blob.version));
    }

    let salt = BASE64
        .decode(&blob.salt)
        .map_err(|_| SecretsError::Malformed("salt"))?;
    let iv = BASE64
        .decode(&blob.iv)
        .map_err(|_| SecretsError::Malformed("iv"))?;
    let tag = BASE64
        .decode(&blob.auth_tag)
        .map_err(|_| SecretsError::Malformed("auth_tag"))?;
    let mut sealed = BASE64
        .decode(&blob.ciphertext)
        .map_err(|_| SecretsError::Malformed("ciphertext"))?;

    if iv.len() != IV_LEN {
        return Err(SecretsError::Malformed("iv"));
    }
    if tag.len() != TAG_LEN {
        return Err(SecretsError::Malformed("auth_tag"));
    }
    sealed.extend_from_slice(&tag);

    let key = derive_key(password, &salt);
    let cipher = BlobCipher::new(Key::<BlobCipher>::from_slice(&key));

    let cleartext = cipher
        .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_slice())
        .map_err(|_| SecretsError::AuthFailed)?;

    Ok(serde_json::from_slice(&cleartext)?)
}

fn set_owner_only(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

// =============================================================================
// Environment fallbacks
// =============================================================================

/// Resolve keys for `venue` from the environment: `{VENUE}_API_KEY` /
/// `{VENUE}_API_SECRET`, or `{VENUE}_API_KEY_FILE` / `{VENUE}_API_SECRET_FILE`
/// pointing at files containing the value.
pub fn venue_keys_from_env(venue: &str) -> Option<VenueKeys> {
    let prefix = venue.to_uppercase();
    let api_key = env_or_file(&format!("{prefix}_API_KEY"))?;
    let api_secret = env_or_file(&format!("{prefix}_API_SECRET"))?;
    Some(VenueKeys {
        api_key,
        api_secret,
    })
}

fn env_or_file(name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    let file_var = format!("{name}_FILE");
    if let Ok(path) = std::env::var(&file_var) {
        match std::fs::read_to_string(&path) {
            Ok(content) => return Some(content.trim().to_string()),
            Err(e) => warn!(var = %file_var, path, error = %e, "failed to read secrets file"),
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<String, VenueKeys> {
        BTreeMap::from([
            (
                "binance".to_string(),
                VenueKeys {
                    api_key: "key-a".into(),
                    api_secret: "secret-a".into(),
                },
            ),
            (
                "bybit".to_string(),
                VenueKeys {
                    api_key: "key-b".into(),
                    api_secret: "secret-b".into(),
                },
            ),
        ])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let blob = encrypt(&sample(), "correct horse battery").unwrap();
        let out = decrypt(&blob, "correct horse battery").unwrap();
        assert_eq!(out, sample());
    }

    #[test]
    fn wrong_password_fails_auth() {
        let blob = encrypt(&sample(), "correct horse battery").unwrap();
        assert!(matches!(
            decrypt(&blob, "incorrect horse battery"),
            Err(SecretsError::AuthFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let mut blob = encrypt(&sample(), "correct horse battery").unwrap();
        let mut bytes = BASE64.decode(&blob.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        blob.ciphertext = BASE64.encode(bytes);
        assert!(matches!(
            decrypt(&blob, "correct horse battery"),
            Err(SecretsError::AuthFailed)
        ));
    }

    #[test]
    fn short_password_rejected() {
        assert!(matches!(
            encrypt(&sample(), "short"),
            Err(SecretsError::PasswordTooShort)
        ));
    }

    #[test]
    fn salts_and_ivs_are_fresh_per_write() {
        let a = encrypt(&sample(), "correct horse battery").unwrap();
        let b = encrypt(&sample(), "correct horse battery").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn store_round_trip_and_password_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("secrets.enc"));

        store.save(&sample(), "original-password").unwrap();
        assert_eq!(store.load("original-password").unwrap(), sample());

        store
            .change_password("original-password", "replacement-password")
            .unwrap();
        assert_eq!(store.load("replacement-password").unwrap(), sample());
        // The old key no longer decrypts.
        assert!(matches!(
            store.load("original-password"),
            Err(SecretsError::AuthFailed)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn blob_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("secrets.enc"));
        store.save(&sample(), "original-password").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("none.enc"));
        assert!(matches!(
            store.load("whatever-password"),
            Err(SecretsError::NotFound(_))
        ));
    }

    #[test]
    fn debug_redacts_keys() {
        let keys = VenueKeys {
            api_key: "k".into(),
            api_secret: "s".into(),
        };
        let printed = format!("{keys:?}");
        assert!(!printed.contains('k') || printed.contains("<redacted>"));
        assert!(printed.contains("<redacted>"));
    }
}
