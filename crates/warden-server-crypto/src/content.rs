// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Content encryption for secret payloads.
//!
//! Secrets are encrypted with AES-256-GCM under a key derived from the
//! secret's name, so each series gets its own content key. The ciphertext is
//! a self-describing JSON envelope carrying the derivation info and nonce;
//! decryption never needs the name re-supplied.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Derivation info for the content checksum key.
const CHECKSUM_INFO: &str = "hmackey";

type HmacSha256 = Hmac<Sha256>;

/// Self-describing ciphertext envelope.
///
/// Carries everything needed to decrypt: the derivation info the content key
/// was derived with, the ciphertext, and the nonce. Fields are base64.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
	derivation_info: String,
	content: String,
	iv: String,
}

/// Cryptographer which encrypts and decrypts secret content.
///
/// Holds the master key; all operational keys (per-name content keys, the
/// checksum key, the row tag key) are derived from it with HKDF-SHA256.
#[derive(Clone)]
pub struct ContentCryptographer {
	master_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl ContentCryptographer {
	pub fn new(master_key: [u8; KEY_SIZE]) -> Self {
		Self {
			master_key: Zeroizing::new(master_key),
		}
	}

	/// Generate a cryptographer with a random master key.
	///
	/// Suitable for tests and ephemeral deployments; production deployments
	/// load the master key from their key-management collaborator.
	pub fn generate() -> Self {
		let mut key = [0u8; KEY_SIZE];
		OsRng.fill_bytes(&mut key);
		Self::new(key)
	}

	/// Derive a purpose-specific key from the master key.
	pub(crate) fn derive_key(&self, info: &str) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
		let hk = Hkdf::<Sha256>::new(None, self.master_key.as_ref());
		let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
		hk.expand(info.as_bytes(), okm.as_mut())
			.map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
		Ok(okm)
	}

	/// Builds an encrypter using a key derived from the provided secret name.
	///
	/// # Errors
	/// Returns `CryptoError::InvalidDerivationInfo` if the name is empty.
	pub fn encrypter(&self, secret_name: &str) -> CryptoResult<ContentEncrypter> {
		if secret_name.is_empty() {
			return Err(CryptoError::InvalidDerivationInfo(
				"derivation name must not be empty".to_string(),
			));
		}
		Ok(ContentEncrypter {
			key: self.derive_key(secret_name)?,
			derivation_info: secret_name.to_string(),
		})
	}

	/// Decrypts an envelope previously produced by [`ContentEncrypter::encrypt`].
	///
	/// The content key is re-derived from the derivation info embedded in the
	/// envelope; no name parameter is needed.
	pub fn decrypt(&self, envelope_json: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
		let envelope: Envelope = serde_json::from_str(envelope_json)?;

		let ciphertext = BASE64
			.decode(&envelope.content)
			.map_err(|e| CryptoError::Decryption(format!("invalid content encoding: {e}")))?;
		let nonce_bytes = BASE64
			.decode(&envelope.iv)
			.map_err(|e| CryptoError::Decryption(format!("invalid nonce encoding: {e}")))?;
		if nonce_bytes.len() != NONCE_SIZE {
			return Err(CryptoError::Decryption(format!(
				"nonce must be {NONCE_SIZE} bytes, got {}",
				nonce_bytes.len()
			)));
		}

		let key = self.derive_key(&envelope.derivation_info)?;
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
		let nonce = Nonce::from_slice(&nonce_bytes);

		let plaintext = cipher
			.decrypt(nonce, ciphertext.as_slice())
			.map_err(|e| CryptoError::Decryption(format!("content decryption failed: {e}")))?;

		Ok(Zeroizing::new(plaintext))
	}

	/// Compute a keyed checksum over secret content.
	///
	/// Stored alongside the ciphertext so rotations that re-upload identical
	/// content can be detected without decrypting.
	pub fn compute_checksum(&self, content: &[u8]) -> CryptoResult<String> {
		let key = self.derive_key(CHECKSUM_INFO)?;
		let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref())
			.map_err(|e| CryptoError::KeyDerivation(format!("invalid checksum key: {e}")))?;
		mac.update(content);
		Ok(hex::encode(mac.finalize().into_bytes()))
	}
}

impl std::fmt::Debug for ContentCryptographer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ContentCryptographer")
			.field("master_key", &"REDACTED")
			.finish()
	}
}

/// Encrypter bound to one derivation name.
pub struct ContentEncrypter {
	key: Zeroizing<[u8; KEY_SIZE]>,
	derivation_info: String,
}

impl ContentEncrypter {
	/// Encrypts content under the derived key.
	///
	/// # Returns
	/// A serialized JSON envelope containing the ciphertext and the
	/// parameters necessary for decryption.
	pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<String> {
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_ref()));

		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let ciphertext = cipher
			.encrypt(nonce, plaintext)
			.map_err(|e| CryptoError::Encryption(format!("content encryption failed: {e}")))?;

		let envelope = Envelope {
			derivation_info: self.derivation_info.clone(),
			content: BASE64.encode(&ciphertext),
			iv: BASE64.encode(nonce_bytes),
		};

		Ok(serde_json::to_string(&envelope)?)
	}
}
