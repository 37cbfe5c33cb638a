// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_server_auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	/// Permission gate denial, propagated untouched from the gate.
	#[error(transparent)]
	Denied(#[from] AuthError),

	/// A stored row's integrity tag failed verification. Fatal for the read:
	/// retrying would re-read the same tampered row.
	#[error("Row integrity violation: {0}")]
	IntegrityViolation(String),

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Crypto error: {0}")]
	Crypto(#[from] warden_server_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Surface SQLite uniqueness violations as caller-visible conflicts.
pub(crate) fn map_unique_violation(err: sqlx::Error, what: impl Into<String>) -> DbError {
	match err.as_database_error() {
		Some(db) if db.is_unique_violation() => DbError::Conflict(what.into()),
		_ => DbError::Sqlx(err),
	}
}
