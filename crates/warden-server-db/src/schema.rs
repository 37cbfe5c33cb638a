// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schema DDL.
//!
//! IDs are `INTEGER PRIMARY KEY AUTOINCREMENT` so they are assigned
//! monotonically; pagination cursors rely on that ordering. Junction tables
//! cascade from both sides, and every tamper-tracked table carries a
//! `row_hmac` column.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const DDL: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS clients (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL UNIQUE,
		description TEXT NOT NULL DEFAULT '',
		created_at INTEGER NOT NULL,
		created_by TEXT NOT NULL,
		updated_at INTEGER NOT NULL,
		updated_by TEXT NOT NULL,
		enabled INTEGER NOT NULL DEFAULT 1,
		automation_allowed INTEGER NOT NULL DEFAULT 0,
		row_hmac TEXT
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS groups (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL UNIQUE,
		description TEXT NOT NULL DEFAULT '',
		metadata TEXT NOT NULL DEFAULT '{}',
		created_at INTEGER NOT NULL,
		created_by TEXT NOT NULL,
		updated_at INTEGER NOT NULL,
		updated_by TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS secrets (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		name TEXT NOT NULL UNIQUE,
		description TEXT NOT NULL DEFAULT '',
		type TEXT,
		owner TEXT,
		generation_options TEXT NOT NULL DEFAULT '{}',
		current INTEGER,
		row_hmac TEXT,
		created_at INTEGER NOT NULL,
		created_by TEXT NOT NULL,
		updated_at INTEGER NOT NULL,
		updated_by TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS secrets_content (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		secretid INTEGER NOT NULL REFERENCES secrets(id) ON DELETE CASCADE,
		encrypted_content TEXT NOT NULL,
		content_hmac TEXT NOT NULL,
		version TEXT,
		metadata TEXT NOT NULL DEFAULT '{}',
		expiry INTEGER NOT NULL DEFAULT 0,
		row_hmac TEXT,
		created_at INTEGER NOT NULL,
		created_by TEXT NOT NULL,
		updated_at INTEGER NOT NULL,
		updated_by TEXT NOT NULL,
		UNIQUE (secretid, version)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_secrets_content_secretid ON secrets_content(secretid)",
	r#"
	CREATE TABLE IF NOT EXISTS memberships (
		clientid INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
		groupid INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
		row_hmac TEXT,
		PRIMARY KEY (clientid, groupid)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS accessgrants (
		secretid INTEGER NOT NULL REFERENCES secrets(id) ON DELETE CASCADE,
		groupid INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
		row_hmac TEXT,
		PRIMARY KEY (secretid, groupid)
	)
	"#,
];

/// Create all warden tables if they do not exist.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), DbError> {
	for statement in DDL {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!("schema ensured");
	Ok(())
}
