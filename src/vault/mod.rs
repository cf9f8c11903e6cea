//! Wallet Vault
//!
//! Encrypted key custody and scoped signing. Private keys exist on disk only
//! as ChaCha20-Poly1305 ciphertext under an Argon2id-derived key; plaintext
//! key bytes live in a zeroized buffer for the duration of a single signing
//! call and are wiped on every exit path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use thiserror::Error;
use zeroize::Zeroizing;

/// Registry of public wallet records
pub const REGISTRY_FILE: &str = "wallets.json";
/// Per-address ciphertext blobs live under this subdirectory
pub const KEYS_DIR: &str = "keys";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("No master secret configured - set TREASURY_MASTER_SECRET")]
    KeyDerivation,

    /// Wrong master secret or malformed ciphertext. Deliberately generic:
    /// the message never echoes the input or any key material.
    #[error("Secure key operation failed")]
    SecureKey,

    #[error("Wallet not found: {0}")]
    NotFound(String),

    #[error("Refusing to delete the treasury wallet")]
    TreasuryProtected,

    #[error("A treasury wallet already exists")]
    TreasuryExists,

    #[error("Wallet storage error: {0}")]
    Storage(String),
}

/// Public registry entry. Key material is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub is_treasury: bool,
    /// Cached balance in lamports; not authoritative
    #[serde(default)]
    pub balance_lamports: u64,
}

/// Per-address ciphertext, stored separately from the registry.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedKeyBlob {
    ciphertext: String,
    salt: String,
    nonce: String,
}

/// Encrypted key storage and signing.
pub struct WalletVault {
    wallet_dir: PathBuf,
    master_secret: Zeroizing<String>,
    registry: std::sync::Mutex<HashMap<String, WalletRecord>>,
}

impl WalletVault {
    /// Open (or initialize) a vault directory. Fails without a master secret.
    pub fn new(wallet_dir: impl Into<PathBuf>, master_secret: &str) -> Result<Self, VaultError> {
        if master_secret.is_empty() {
            return Err(VaultError::KeyDerivation);
        }
        let wallet_dir = wallet_dir.into();
        let registry = Self::load_registry(&wallet_dir)?;

        Ok(Self {
            wallet_dir,
            master_secret: Zeroizing::new(master_secret.to_string()),
            registry: std::sync::Mutex::new(registry),
        })
    }

    fn registry_path(wallet_dir: &Path) -> PathBuf {
        wallet_dir.join(REGISTRY_FILE)
    }

    fn blob_path(&self, address: &str) -> PathBuf {
        self.wallet_dir.join(KEYS_DIR).join(format!("{}.json", address))
    }

    fn load_registry(wallet_dir: &Path) -> Result<HashMap<String, WalletRecord>, VaultError> {
        let path = Self::registry_path(wallet_dir);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| VaultError::Storage(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| VaultError::Storage(e.to_string()))
    }

    fn persist_registry(&self, registry: &HashMap<String, WalletRecord>) -> Result<(), VaultError> {
        self.ensure_dirs()?;
        let content = serde_json::to_string_pretty(registry)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let path = Self::registry_path(&self.wallet_dir);
        fs::write(&path, content).map_err(|e| VaultError::Storage(e.to_string()))?;
        restrict_permissions(&path, false);
        Ok(())
    }

    fn ensure_dirs(&self) -> Result<(), VaultError> {
        let keys_dir = self.wallet_dir.join(KEYS_DIR);
        fs::create_dir_all(&keys_dir).map_err(|e| VaultError::Storage(e.to_string()))?;
        restrict_permissions(&self.wallet_dir, true);
        restrict_permissions(&keys_dir, true);
        Ok(())
    }

    // ==========================================================================
    // KEY DERIVATION & ENCRYPTION
    // ==========================================================================

    /// Argon2id over the master secret with a per-blob salt.
    fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(self.master_secret.as_bytes(), salt, key.as_mut())
            .map_err(|_| VaultError::SecureKey)?;
        Ok(key)
    }

    fn encrypt_secret(&self, secret: &[u8]) -> Result<EncryptedKeyBlob, VaultError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret)
            .map_err(|_| VaultError::SecureKey)?;

        Ok(EncryptedKeyBlob {
            ciphertext: BASE64.encode(ciphertext),
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    fn decrypt_blob(&self, blob: &EncryptedKeyBlob) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let salt = BASE64.decode(&blob.salt).map_err(|_| VaultError::SecureKey)?;
        let nonce = BASE64.decode(&blob.nonce).map_err(|_| VaultError::SecureKey)?;
        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|_| VaultError::SecureKey)?;
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::SecureKey);
        }

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| VaultError::SecureKey)?;

        Ok(Zeroizing::new(plaintext))
    }

    // ==========================================================================
    // PUBLIC CONTRACT
    // ==========================================================================

    /// Generate a keypair, encrypt its secret, register the public record.
    /// At most one record may carry the treasury flag.
    pub fn create_wallet(&self, label: &str, is_treasury: bool) -> Result<WalletRecord, VaultError> {
        let mut registry = self.registry.lock().unwrap();

        if is_treasury && registry.values().any(|w| w.is_treasury) {
            return Err(VaultError::TreasuryExists);
        }

        let keypair = Keypair::new();
        let address = keypair.pubkey().to_string();
        let secret = Zeroizing::new(keypair.to_bytes().to_vec());

        let blob = self.encrypt_secret(&secret)?;

        self.ensure_dirs()?;
        let blob_path = self.blob_path(&address);
        let content =
            serde_json::to_string_pretty(&blob).map_err(|e| VaultError::Storage(e.to_string()))?;
        fs::write(&blob_path, content).map_err(|e| VaultError::Storage(e.to_string()))?;
        restrict_permissions(&blob_path, false);

        let record = WalletRecord {
            address: address.clone(),
            label: label.to_string(),
            created_at: Utc::now(),
            is_treasury,
            balance_lamports: 0,
        };
        registry.insert(address.clone(), record.clone());

        if let Err(e) = self.persist_registry(&registry) {
            // Registry and blob go together: undo the blob on a failed write
            registry.remove(&address);
            let _ = fs::remove_file(&blob_path);
            return Err(e);
        }

        tracing::info!("Created wallet {} ({})", &address[..8.min(address.len())], label);
        Ok(record)
    }

    /// Decrypt the key into a transient buffer, sign, wipe, return only the
    /// signature bytes. The decrypted buffer zeroizes on drop, covering
    /// success, error and cancellation paths alike.
    pub fn sign(&self, address: &str, payload: &[u8]) -> Result<Vec<u8>, VaultError> {
        {
            let registry = self.registry.lock().unwrap();
            if !registry.contains_key(address) {
                return Err(VaultError::NotFound(address.to_string()));
            }
        }

        let blob_path = self.blob_path(address);
        let content = fs::read_to_string(&blob_path).map_err(|_| VaultError::SecureKey)?;
        let blob: EncryptedKeyBlob =
            serde_json::from_str(&content).map_err(|_| VaultError::SecureKey)?;

        let secret = self.decrypt_blob(&blob)?;
        let keypair = Keypair::try_from(secret.as_slice()).map_err(|_| VaultError::SecureKey)?;
        let signature = keypair.sign_message(payload);

        Ok(signature.as_ref().to_vec())
    }

    /// The single record flagged as treasury, if any.
    pub fn get_treasury(&self) -> Option<WalletRecord> {
        self.registry
            .lock()
            .unwrap()
            .values()
            .find(|w| w.is_treasury)
            .cloned()
    }

    pub fn get_wallet(&self, address: &str) -> Option<WalletRecord> {
        self.registry.lock().unwrap().get(address).cloned()
    }

    pub fn list_wallets(&self) -> Vec<WalletRecord> {
        let mut wallets: Vec<WalletRecord> =
            self.registry.lock().unwrap().values().cloned().collect();
        wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        wallets
    }

    /// Remove key ciphertext and registry entry together or not at all.
    /// The treasury wallet cannot be deleted.
    pub fn delete(&self, address: &str) -> Result<(), VaultError> {
        let mut registry = self.registry.lock().unwrap();

        let removed = registry
            .remove(address)
            .ok_or_else(|| VaultError::NotFound(address.to_string()))?;
        if removed.is_treasury {
            registry.insert(address.to_string(), removed);
            return Err(VaultError::TreasuryProtected);
        }
        if let Err(e) = self.persist_registry(&registry) {
            registry.insert(address.to_string(), removed);
            return Err(e);
        }

        let blob_path = self.blob_path(address);
        if blob_path.exists() {
            fs::remove_file(&blob_path).map_err(|e| VaultError::Storage(e.to_string()))?;
        }

        tracing::info!("Deleted wallet {}", &address[..8.min(address.len())]);
        Ok(())
    }

    /// Update the cached (non-authoritative) balance for a wallet.
    pub fn set_balance(&self, address: &str, lamports: u64) -> Result<(), VaultError> {
        let mut registry = self.registry.lock().unwrap();
        let record = registry
            .get_mut(address)
            .ok_or_else(|| VaultError::NotFound(address.to_string()))?;
        record.balance_lamports = lamports;
        self.persist_registry(&registry)
    }
}

/// 0o700 for directories, 0o600 for files. Best-effort on non-unix.
fn restrict_permissions(path: &Path, is_dir: bool) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if is_dir { 0o700 } else { 0o600 };
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            tracing::warn!("Failed to restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, is_dir);
    }
}
