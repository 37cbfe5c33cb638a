// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared test helpers.
//!
//! The pool is pinned to a single connection so every statement in a test
//! sees the same in-memory database.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use warden_server_crypto::{ContentCryptographer, RowIntegrityTagger};

use crate::schema::create_schema;

pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")
		.unwrap()
		.foreign_keys(true)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	create_schema(&pool).await.expect("Failed to create schema");
	pool
}

/// Deterministic cryptographer so tags recompute stably across a test.
pub fn test_cryptographer() -> ContentCryptographer {
	ContentCryptographer::new([42u8; 32])
}

pub fn test_tagger() -> RowIntegrityTagger {
	RowIntegrityTagger::new(&test_cryptographer()).expect("Failed to build tagger")
}
