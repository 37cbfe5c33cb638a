// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Opaque pagination cursor.
//!
//! The cursor encodes the last-returned series id. Listing orders by that
//! monotonic id, so following cursors re-chunks one stable result: rows
//! inserted mid-sweep get ids past every issued cursor and can only appear
//! at the tail, never reshuffle already-returned pages.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::SecretsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretCursor {
	pub last_id: i64,
}

impl SecretCursor {
	pub fn new(last_id: i64) -> Self {
		Self { last_id }
	}

	/// Encode as an opaque token.
	pub fn encode(&self) -> Result<String, SecretsError> {
		let json = serde_json::to_string(self).map_err(|_| SecretsError::InvalidCursor)?;
		Ok(BASE64.encode(json))
	}

	/// Decode a token previously produced by [`encode`](Self::encode).
	pub fn decode(token: &str) -> Result<Self, SecretsError> {
		let bytes = BASE64.decode(token).map_err(|_| SecretsError::InvalidCursor)?;
		serde_json::from_slice(&bytes).map_err(|_| SecretsError::InvalidCursor)
	}
}
