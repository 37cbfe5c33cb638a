// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_server_auth::AuthError;
use warden_server_crypto::CryptoError;
use warden_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
	#[error(transparent)]
	Db(#[from] DbError),

	#[error(transparent)]
	Crypto(#[from] CryptoError),

	/// Permission gate denial, propagated untouched.
	#[error(transparent)]
	Denied(#[from] AuthError),

	/// Payload exceeds the configured maximum; rejected before any write.
	#[error("Secret is too large: {size} bytes exceeds maximum size of {max} bytes")]
	ContentTooLarge { size: usize, max: u64 },

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Unknown batch mode: {0}")]
	UnknownBatchMode(String),

	#[error("Invalid pagination cursor")]
	InvalidCursor,
}

pub type Result<T> = std::result::Result<T, SecretsError>;

impl SecretsError {
	/// True when the error is the not-found kind, at any nesting.
	pub fn is_not_found(&self) -> bool {
		matches!(self, SecretsError::Db(DbError::NotFound(_)))
	}
}
