// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
	#[error("Encryption failed: {0}")]
	Encryption(String),

	#[error("Decryption failed: {0}")]
	Decryption(String),

	#[error("Key derivation failed: {0}")]
	KeyDerivation(String),

	#[error("Malformed ciphertext envelope: {0}")]
	MalformedEnvelope(#[from] serde_json::Error),

	#[error("Invalid derivation info: {0}")]
	InvalidDerivationInfo(String),
}

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
