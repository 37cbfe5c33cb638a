// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row tag backfill.
//!
//! Rows written before integrity tagging was enabled carry no tag and fail
//! verification. The walker visits each tracked table in id-order batches
//! and writes the missing tags; with `force` it rewrites every tag, which
//! also repairs tags after a master key rotation.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use warden_server_crypto::RowIntegrityTagger;

use crate::error::DbError;

/// Per-table counts of rewritten tags.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
	pub clients: u64,
	pub secrets: u64,
	pub secrets_content: u64,
	pub memberships: u64,
	pub accessgrants: u64,
}

/// Walks tracked tables and rewrites row tags.
pub struct BackfillRunner {
	pool: SqlitePool,
	tagger: RowIntegrityTagger,
	batch_size: i64,
}

impl BackfillRunner {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger, batch_size: i64) -> Self {
		Self {
			pool,
			tagger,
			batch_size: batch_size.max(1),
		}
	}

	/// Backfill every tracked table.
	///
	/// # Arguments
	/// * `force` - rewrite all tags instead of only missing ones
	#[tracing::instrument(skip(self))]
	pub async fn backfill_row_hmacs(&self, force: bool) -> Result<BackfillReport, DbError> {
		let report = BackfillReport {
			clients: self.backfill_clients(force).await?,
			secrets: self.backfill_secrets(force).await?,
			secrets_content: self.backfill_secrets_content(force).await?,
			memberships: self
				.backfill_junction("memberships", "clientid", "groupid", force)
				.await?,
			accessgrants: self
				.backfill_junction("accessgrants", "secretid", "groupid", force)
				.await?,
		};

		tracing::info!(?report, "row tag backfill finished");
		Ok(report)
	}

	async fn backfill_clients(&self, force: bool) -> Result<u64, DbError> {
		let mut rewritten = 0u64;
		let mut last_id = 0i64;
		loop {
			let rows = sqlx::query(
				"SELECT id, name, row_hmac FROM clients WHERE id > ? ORDER BY id ASC LIMIT ?",
			)
			.bind(last_id)
			.bind(self.batch_size)
			.fetch_all(&self.pool)
			.await?;
			if rows.is_empty() {
				break;
			}

			for row in &rows {
				let id: i64 = row.get("id");
				last_id = id;
				let stored: Option<String> = row.get("row_hmac");
				if !force && stored.as_deref().is_some_and(|s| !s.is_empty()) {
					continue;
				}
				let name: String = row.get("name");
				let tag = self.tagger.tag("clients", &[&name, &id.to_string()]);
				sqlx::query("UPDATE clients SET row_hmac = ? WHERE id = ?")
					.bind(&tag)
					.bind(id)
					.execute(&self.pool)
					.await?;
				rewritten += 1;
			}
		}
		Ok(rewritten)
	}

	async fn backfill_secrets(&self, force: bool) -> Result<u64, DbError> {
		let mut rewritten = 0u64;
		let mut last_id = 0i64;
		loop {
			let rows = sqlx::query(
				"SELECT id, name, row_hmac FROM secrets WHERE id > ? ORDER BY id ASC LIMIT ?",
			)
			.bind(last_id)
			.bind(self.batch_size)
			.fetch_all(&self.pool)
			.await?;
			if rows.is_empty() {
				break;
			}

			for row in &rows {
				let id: i64 = row.get("id");
				last_id = id;
				let stored: Option<String> = row.get("row_hmac");
				if !force && stored.as_deref().is_some_and(|s| !s.is_empty()) {
					continue;
				}
				let name: String = row.get("name");
				let tag = self.tagger.tag("secrets", &[&name, &id.to_string()]);
				sqlx::query("UPDATE secrets SET row_hmac = ? WHERE id = ?")
					.bind(&tag)
					.bind(id)
					.execute(&self.pool)
					.await?;
				rewritten += 1;
			}
		}
		Ok(rewritten)
	}

	async fn backfill_secrets_content(&self, force: bool) -> Result<u64, DbError> {
		let mut rewritten = 0u64;
		let mut last_id = 0i64;
		loop {
			let rows = sqlx::query(
				r#"
				SELECT id, encrypted_content, metadata, row_hmac
				FROM secrets_content
				WHERE id > ?
				ORDER BY id ASC
				LIMIT ?
				"#,
			)
			.bind(last_id)
			.bind(self.batch_size)
			.fetch_all(&self.pool)
			.await?;
			if rows.is_empty() {
				break;
			}

			for row in &rows {
				let id: i64 = row.get("id");
				last_id = id;
				let stored: Option<String> = row.get("row_hmac");
				if !force && stored.as_deref().is_some_and(|s| !s.is_empty()) {
					continue;
				}
				let encrypted_content: String = row.get("encrypted_content");
				let metadata: String = row.get("metadata");
				let tag = self.tagger.tag(
					"secrets_content",
					&[&encrypted_content, &metadata, &id.to_string()],
				);
				sqlx::query("UPDATE secrets_content SET row_hmac = ? WHERE id = ?")
					.bind(&tag)
					.bind(id)
					.execute(&self.pool)
					.await?;
				rewritten += 1;
			}
		}
		Ok(rewritten)
	}

	async fn backfill_junction(
		&self,
		table: &str,
		left_col: &str,
		right_col: &str,
		force: bool,
	) -> Result<u64, DbError> {
		let mut rewritten = 0u64;
		let mut cursor: Option<(i64, i64)> = None;
		loop {
			let sql = format!(
				"SELECT {left_col}, {right_col}, row_hmac FROM {table} \
				 WHERE ({left_col} > ? OR ({left_col} = ? AND {right_col} > ?)) \
				 ORDER BY {left_col} ASC, {right_col} ASC LIMIT ?",
			);
			let (last_left, last_right) = cursor.unwrap_or((i64::MIN, i64::MIN));
			let rows = sqlx::query(&sql)
				.bind(last_left)
				.bind(last_left)
				.bind(last_right)
				.bind(self.batch_size)
				.fetch_all(&self.pool)
				.await?;
			if rows.is_empty() {
				break;
			}

			for row in &rows {
				let left: i64 = row.get(left_col);
				let right: i64 = row.get(right_col);
				cursor = Some((left, right));
				let stored: Option<String> = row.get("row_hmac");
				if !force && stored.as_deref().is_some_and(|s| !s.is_empty()) {
					continue;
				}
				let tag = self.tagger.tag(table, &[&left.to_string(), &right.to_string()]);
				let update =
					format!("UPDATE {table} SET row_hmac = ? WHERE {left_col} = ? AND {right_col} = ?");
				sqlx::query(&update)
					.bind(&tag)
					.bind(left)
					.bind(right)
					.execute(&self.pool)
					.await?;
				rewritten += 1;
			}
		}
		Ok(rewritten)
	}
}
