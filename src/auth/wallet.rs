//! Wallet capability: a connected address that can sign personal messages.

use alloy_primitives::{eip191_hash_message, Address};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet not connected")]
    NotConnected,

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Something that holds a wallet address and signs messages with it.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Connected address, if any.
    fn address(&self) -> Option<String>;

    /// Sign `message` as an EIP-191 personal message, returning `0x`-prefixed hex.
    async fn sign_message(&self, message: &str) -> Result<String, WalletError>;
}

/// Wallet slot with nothing connected. Used when signatures arrive
/// pre-computed from the browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedWallet;

#[async_trait]
impl Wallet for DisconnectedWallet {
    fn address(&self) -> Option<String> {
        None
    }

    async fn sign_message(&self, _message: &str) -> Result<String, WalletError> {
        Err(WalletError::NotConnected)
    }
}

/// In-process secp256k1 key.
#[derive(Clone)]
pub struct LocalWallet {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("key", &"[REDACTED]")
            .field("address", &self.address)
            .finish()
    }
}

impl LocalWallet {
    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = Address::from_public_key(key.verifying_key());
        LocalWallet { key, address }
    }

    /// Parse a hex private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> Result<Self, WalletError> {
        let trimmed = private_key.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(
            hex::decode(trimmed).map_err(|e| WalletError::InvalidKey(e.to_string()))?,
        );
        let key =
            SigningKey::from_slice(&bytes).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    /// Fresh random key.
    pub fn random() -> Self {
        loop {
            let mut seed = Zeroizing::new([0u8; 32]);
            rand::fill(&mut seed[..]);
            // Zero or >= curve order: draw again.
            if let Ok(key) = SigningKey::from_slice(&seed[..]) {
                return Self::from_signing_key(key);
            }
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Checksummed `0x` address.
    pub fn address_string(&self) -> String {
        self.address.to_string()
    }

    /// Sign synchronously; the signature is `r || s || v` with `v` in {27, 28}.
    pub fn sign_personal_message(&self, message: &str) -> Result<String, WalletError> {
        let hash = eip191_hash_message(message.as_bytes());
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| WalletError::Signing(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn address(&self) -> Option<String> {
        Some(self.address_string())
    }

    async fn sign_message(&self, message: &str) -> Result<String, WalletError> {
        self.sign_personal_message(message)
    }
}
