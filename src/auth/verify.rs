//! Wallet signature verification (EIP-191 personal messages over secp256k1).

use alloy_primitives::{Address, Signature};

/// Reasons a signature could not be recovered. Never leaves this module:
/// callers only see `false`.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Invalid signature hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid signature length: expected 65 bytes, got {0}")]
    Length(usize),

    #[error("Invalid recovery byte: {0}")]
    RecoveryByte(u8),

    #[error("Recovery failed: {0}")]
    Recovery(#[from] alloy_primitives::SignatureError),
}

/// Check that `signature` over `message` was produced by `address`.
///
/// Addresses compare case-insensitively. A missing `0x` prefix on the
/// signature is tolerated. Malformed input yields `false`.
pub fn verify_signature(address: &str, signature: &str, message: &str) -> bool {
    match recover_address(signature, message) {
        Ok(recovered) => recovered.to_string().to_lowercase() == address.trim().to_lowercase(),
        Err(e) => {
            tracing::debug!(error = %e, "Signature recovery failed");
            false
        }
    }
}

/// Recover the signer of a personal message.
pub fn recover_address(signature: &str, message: &str) -> Result<Address, VerifyError> {
    let digits = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    let bytes = hex::decode(digits)?;

    if bytes.len() != 65 {
        return Err(VerifyError::Length(bytes.len()));
    }

    // Wallets emit v as 27/28; some libraries use 0/1.
    let parity = match bytes[64] {
        0 | 27 => false,
        1 | 28 => true,
        v => return Err(VerifyError::RecoveryByte(v)),
    };

    let signature = Signature::from_bytes_and_parity(&bytes[..64], parity);
    Ok(signature.recover_address_from_msg(message.as_bytes())?)
}
