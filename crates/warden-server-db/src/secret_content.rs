// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret content repository.
//!
//! Content rows are immutable once written; edits create a new row. Each row
//! is tamper-tracked over (encrypted_content, metadata, id) so swapping one
//! row's ciphertext into another row's identity fails verification loudly.
//!
//! Old revisions are pruned after every insert to bound storage growth from
//! rotation, with a retention floor guaranteeing a minimum history window.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use warden_server_crypto::RowIntegrityTagger;

use crate::error::{map_unique_violation, DbError};
use crate::types::SecretContent;

const TABLE: &str = "secrets_content";

/// Number of non-current revisions always retained, newest first.
pub(crate) const PRUNE_CUTOFF_ITEMS: usize = 10;

/// Revisions younger than this are never pruned, regardless of count.
pub(crate) const PRUNE_CUTOFF_DAYS: i64 = 45;

const CONTENT_COLUMNS: &str = "id, secretid, encrypted_content, content_hmac, version, metadata, \
                               expiry, row_hmac, created_at, created_by, updated_at, updated_by";

/// Repository for secret content database operations.
#[derive(Clone)]
pub struct SecretContentRepository {
	pool: SqlitePool,
	tagger: RowIntegrityTagger,
}

impl SecretContentRepository {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger) -> Self {
		Self { pool, tagger }
	}

	pub(crate) fn tagger(&self) -> &RowIntegrityTagger {
		&self.tagger
	}

	/// Create a content revision for a series and prune old revisions.
	///
	/// # Errors
	/// `DbError::Conflict` when the legacy version label is already used
	/// within this series.
	#[tracing::instrument(skip(self, encrypted_content, metadata), fields(secret_id = %secret_series_id, created_by = %created_by))]
	pub async fn create_secret_content(
		&self,
		secret_series_id: i64,
		encrypted_content: &str,
		content_checksum: &str,
		version: Option<&str>,
		created_by: &str,
		metadata: &BTreeMap<String, String>,
		expiry: i64,
	) -> Result<i64, DbError> {
		let mut tx = self.pool.begin().await?;
		let id = self
			.create_secret_content_tx(
				&mut tx,
				secret_series_id,
				encrypted_content,
				content_checksum,
				version,
				created_by,
				metadata,
				expiry,
			)
			.await?;
		tx.commit().await?;
		Ok(id)
	}

	#[allow(clippy::too_many_arguments)]
	pub(crate) async fn create_secret_content_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_series_id: i64,
		encrypted_content: &str,
		content_checksum: &str,
		version: Option<&str>,
		created_by: &str,
		metadata: &BTreeMap<String, String>,
		expiry: i64,
	) -> Result<i64, DbError> {
		let now = Utc::now().timestamp();
		let metadata_json = serde_json::to_string(metadata)?;

		let row = sqlx::query(
			r#"
			INSERT INTO secrets_content (
				secretid, encrypted_content, content_hmac, version, metadata, expiry,
				created_at, created_by, updated_at, updated_by
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			RETURNING id
			"#,
		)
		.bind(secret_series_id)
		.bind(encrypted_content)
		.bind(content_checksum)
		.bind(version)
		.bind(&metadata_json)
		.bind(expiry)
		.bind(now)
		.bind(created_by)
		.bind(now)
		.bind(created_by)
		.fetch_one(&mut *conn)
		.await
		.map_err(|e| {
			map_unique_violation(
				e,
				format!("version label {version:?} already exists for secret {secret_series_id}"),
			)
		})?;

		let id: i64 = row.get("id");
		let row_hmac = self
			.tagger
			.tag(TABLE, &[encrypted_content, &metadata_json, &id.to_string()]);
		sqlx::query("UPDATE secrets_content SET row_hmac = ? WHERE id = ?")
			.bind(&row_hmac)
			.bind(id)
			.execute(&mut *conn)
			.await?;

		self.prune_old_contents_tx(conn, secret_series_id).await?;

		tracing::debug!(content_id = id, secret_id = secret_series_id, "secret content created");
		Ok(id)
	}

	/// Prune old revisions of a series.
	///
	/// Retains the revision `current` points at and the
	/// [`PRUNE_CUTOFF_ITEMS`] most recent others unconditionally; beyond
	/// that, a revision is deleted only once it is older than
	/// [`PRUNE_CUTOFF_DAYS`]. Skipped entirely while the series has no
	/// current revision (it is still being created).
	pub(crate) async fn prune_old_contents_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_series_id: i64,
	) -> Result<(), DbError> {
		let row = sqlx::query("SELECT current FROM secrets WHERE id = ?")
			.bind(secret_series_id)
			.fetch_optional(&mut *conn)
			.await?;

		let current: Option<i64> = match row {
			Some(r) => r.get("current"),
			None => return Ok(()),
		};
		let Some(current_id) = current else {
			return Ok(());
		};

		let rows = sqlx::query(
			r#"
			SELECT id, created_at
			FROM secrets_content
			WHERE secretid = ? AND id != ?
			ORDER BY created_at DESC, id DESC
			"#,
		)
		.bind(secret_series_id)
		.bind(current_id)
		.fetch_all(&mut *conn)
		.await?;

		let cutoff = Utc::now().timestamp() - PRUNE_CUTOFF_DAYS * 86_400;
		let mut pruned = 0u64;
		for row in rows.iter().skip(PRUNE_CUTOFF_ITEMS) {
			let created_at: i64 = row.get("created_at");
			if created_at < cutoff {
				let id: i64 = row.get("id");
				sqlx::query("DELETE FROM secrets_content WHERE id = ?")
					.bind(id)
					.execute(&mut *conn)
					.await?;
				pruned += 1;
			}
		}

		if pruned > 0 {
			tracing::info!(secret_id = secret_series_id, pruned, "pruned old secret contents");
		}
		Ok(())
	}

	/// Run the pruning pass for a series in its own transaction.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_series_id))]
	pub async fn prune_old_contents(&self, secret_series_id: i64) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		self.prune_old_contents_tx(&mut tx, secret_series_id).await?;
		tx.commit().await?;
		Ok(())
	}

	/// Get a content revision by id, verifying its integrity tag.
	///
	/// A tag mismatch means the row was tampered with or swapped and aborts
	/// the read with `DbError::IntegrityViolation`; it is not a not-found.
	#[tracing::instrument(skip(self), fields(content_id = %id))]
	pub async fn get_secret_content_by_id(&self, id: i64) -> Result<Option<SecretContent>, DbError> {
		let row = sqlx::query(&format!("SELECT {CONTENT_COLUMNS} FROM secrets_content WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| self.verified_content(&r)).transpose()
	}

	pub(crate) async fn get_secret_content_by_id_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
	) -> Result<Option<SecretContent>, DbError> {
		let row = sqlx::query(&format!("SELECT {CONTENT_COLUMNS} FROM secrets_content WHERE id = ?"))
			.bind(id)
			.fetch_optional(&mut *conn)
			.await?;

		row.map(|r| self.verified_content(&r)).transpose()
	}

	/// Find a revision of a series by its legacy version label.
	pub async fn get_secret_content_by_series_and_version(
		&self,
		secret_series_id: i64,
		version: &str,
	) -> Result<Option<SecretContent>, DbError> {
		let row = sqlx::query(&format!(
			"SELECT {CONTENT_COLUMNS} FROM secrets_content WHERE secretid = ? AND version = ?"
		))
		.bind(secret_series_id)
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| self.verified_content(&r)).transpose()
	}

	/// All content ids and legacy version labels for a series, newest first.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_series_id))]
	pub async fn list_version_labels(
		&self,
		secret_series_id: i64,
	) -> Result<Vec<(i64, Option<String>)>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, version
			FROM secrets_content
			WHERE secretid = ?
			ORDER BY created_at DESC, id DESC
			"#,
		)
		.bind(secret_series_id)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.iter()
			.map(|r| (r.get::<i64, _>("id"), r.get::<Option<String>, _>("version")))
			.collect())
	}

	/// Page through a series' revisions, newest first.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_series_id, idx, num))]
	pub async fn get_versions_paged(
		&self,
		secret_series_id: i64,
		idx: i64,
		num: i64,
	) -> Result<Vec<SecretContent>, DbError> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {CONTENT_COLUMNS}
			FROM secrets_content
			WHERE secretid = ?
			ORDER BY created_at DESC, id DESC
			LIMIT ? OFFSET ?
			"#
		))
		.bind(secret_series_id)
		.bind(num)
		.bind(idx)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(|r| self.verified_content(r)).collect()
	}

	/// Merge a new expiry into a revision, keeping the earlier deadline.
	///
	/// # Returns
	/// `true` if the revision exists and was updated.
	#[tracing::instrument(skip(self), fields(content_id = %id, expiry))]
	pub async fn set_expiration(&self, id: i64, expiry: i64) -> Result<bool, DbError> {
		let mut tx = self.pool.begin().await?;

		let row = sqlx::query("SELECT expiry FROM secrets_content WHERE id = ?")
			.bind(id)
			.fetch_optional(&mut *tx)
			.await?;
		let Some(row) = row else {
			return Ok(false);
		};

		let existing: i64 = row.get("expiry");
		let merged = if existing == 0 { expiry } else { existing.min(expiry) };

		sqlx::query("UPDATE secrets_content SET expiry = ?, updated_at = ? WHERE id = ?")
			.bind(merged)
			.bind(Utc::now().timestamp())
			.bind(id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::debug!(content_id = id, expiry = merged, "expiry merged");
		Ok(true)
	}

	pub(crate) fn verified_content(&self, row: &SqliteRow) -> Result<SecretContent, DbError> {
		let id: i64 = row.get("id");
		let encrypted_content: String = row.get("encrypted_content");
		let metadata_json: String = row.get("metadata");
		let row_hmac: Option<String> = row.get("row_hmac");

		// Verify against the stored metadata serialization, not a re-encoding.
		if !self.tagger.verify(
			row_hmac.as_deref().unwrap_or(""),
			TABLE,
			&[&encrypted_content, &metadata_json, &id.to_string()],
		) {
			return Err(DbError::IntegrityViolation(format!(
				"secret content row {id} failed integrity verification"
			)));
		}

		Ok(SecretContent {
			id,
			secret_series_id: row.get("secretid"),
			encrypted_content,
			content_checksum: row.get("content_hmac"),
			version: row.get("version"),
			metadata: serde_json::from_str(&metadata_json)?,
			expiry: row.get("expiry"),
			created_at: row.get("created_at"),
			created_by: row.get("created_by"),
			updated_at: row.get("updated_at"),
			updated_by: row.get("updated_by"),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::secret_series::SecretSeriesRepository;
	use crate::testing::{create_test_pool, test_tagger};

	async fn make_repos() -> (SecretSeriesRepository, SecretContentRepository) {
		let pool = create_test_pool().await;
		let tagger = test_tagger();
		(
			SecretSeriesRepository::new(pool.clone(), tagger.clone()),
			SecretContentRepository::new(pool, tagger),
		)
	}

	async fn make_series(series: &SecretSeriesRepository, name: &str) -> i64 {
		series
			.create_secret_series(name, None, "admin", "", None, &BTreeMap::new())
			.await
			.unwrap()
	}

	async fn add_content(content: &SecretContentRepository, series_id: i64) -> i64 {
		content
			.create_secret_content(series_id, "envelope", "checksum", None, "admin", &BTreeMap::new(), 0)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn create_and_get_content() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		let mut metadata = BTreeMap::new();
		metadata.insert("rotation".to_string(), "weekly".to_string());
		let id = content
			.create_secret_content(series_id, "envelope", "checksum", Some("v1"), "admin", &metadata, 42)
			.await
			.unwrap();

		let found = content.get_secret_content_by_id(id).await.unwrap().unwrap();
		assert_eq!(found.secret_series_id, series_id);
		assert_eq!(found.version.as_deref(), Some("v1"));
		assert_eq!(found.expiry, 42);
		assert_eq!(found.metadata.get("rotation").map(String::as_str), Some("weekly"));

		let by_label = content
			.get_secret_content_by_series_and_version(series_id, "v1")
			.await
			.unwrap();
		assert!(by_label.is_some());
	}

	#[tokio::test]
	async fn duplicate_version_label_conflicts_within_a_series() {
		let (series, content) = make_repos().await;
		let a = make_series(&series, "a").await;
		let b = make_series(&series, "b").await;

		content
			.create_secret_content(a, "e", "c", Some("v1"), "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();

		let err = content
			.create_secret_content(a, "e2", "c2", Some("v1"), "admin", &BTreeMap::new(), 0)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));

		// The same label under another series is fine, as are repeated
		// unlabeled revisions.
		content
			.create_secret_content(b, "e", "c", Some("v1"), "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();
		add_content(&content, a).await;
		add_content(&content, a).await;
	}

	#[tokio::test]
	async fn swapped_ciphertext_is_an_integrity_violation() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		let victim = add_content(&content, series_id).await;
		let other = content
			.create_secret_content(series_id, "other-envelope", "c", None, "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();
		assert_ne!(victim, other);

		// Swap the other row's ciphertext into the victim's identity without
		// recomputing the tag - the attack the tag exists to catch.
		sqlx::query("UPDATE secrets_content SET encrypted_content = 'other-envelope' WHERE id = ?")
			.bind(victim)
			.execute(&content.pool)
			.await
			.unwrap();

		let err = content.get_secret_content_by_id(victim).await.unwrap_err();
		assert!(matches!(err, DbError::IntegrityViolation(_)));
	}

	#[tokio::test]
	async fn version_labels_listing() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		content
			.create_secret_content(series_id, "e1", "c1", Some("v1"), "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();
		let unlabeled = add_content(&content, series_id).await;

		let labels = content.list_version_labels(series_id).await.unwrap();
		assert_eq!(labels.len(), 2);
		assert!(labels.iter().any(|(id, v)| *id == unlabeled && v.is_none()));
		assert!(labels.iter().any(|(_, v)| v.as_deref() == Some("v1")));
	}

	#[tokio::test]
	async fn expiry_merge_keeps_the_earlier_deadline() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;
		let id = add_content(&content, series_id).await;

		// From "no expiry", any deadline sticks.
		assert!(content.set_expiration(id, 5000).await.unwrap());
		let found = content.get_secret_content_by_id(id).await.unwrap().unwrap();
		assert_eq!(found.expiry, 5000);

		// A later deadline never extends an earlier one.
		content.set_expiration(id, 9000).await.unwrap();
		let found = content.get_secret_content_by_id(id).await.unwrap().unwrap();
		assert_eq!(found.expiry, 5000);

		content.set_expiration(id, 1000).await.unwrap();
		let found = content.get_secret_content_by_id(id).await.unwrap().unwrap();
		assert_eq!(found.expiry, 1000);

		assert!(!content.set_expiration(9999, 1).await.unwrap());
	}

	async fn age_all_contents(content: &SecretContentRepository, series_id: i64, age_days: i64) {
		let old = Utc::now().timestamp() - age_days * 86_400;
		sqlx::query("UPDATE secrets_content SET created_at = ? WHERE secretid = ?")
			.bind(old)
			.bind(series_id)
			.execute(&content.pool)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn prune_keeps_current_plus_ten_most_recent_old_rows() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		let mut ids = Vec::new();
		for _ in 0..15 {
			ids.push(add_content(&content, series_id).await);
		}
		let newest = *ids.last().unwrap();
		series.set_current_version(series_id, newest, "admin").await.unwrap();

		// All fifteen revisions are well past the retention floor.
		age_all_contents(&content, series_id, 90).await;

		content.prune_old_contents(series_id).await.unwrap();

		let remaining = content.list_version_labels(series_id).await.unwrap();
		assert_eq!(remaining.len(), 11);
		assert!(remaining.iter().any(|(id, _)| *id == newest));
	}

	#[tokio::test]
	async fn prune_never_touches_rows_inside_the_retention_floor() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		let mut ids = Vec::new();
		for _ in 0..15 {
			ids.push(add_content(&content, series_id).await);
		}
		series
			.set_current_version(series_id, *ids.last().unwrap(), "admin")
			.await
			.unwrap();

		// Created "now": nothing is old enough to prune.
		content.prune_old_contents(series_id).await.unwrap();
		assert_eq!(content.list_version_labels(series_id).await.unwrap().len(), 15);
	}

	#[tokio::test]
	async fn prune_skips_series_without_a_current_version() {
		let (series, content) = make_repos().await;
		let series_id = make_series(&series, "db-password").await;

		for _ in 0..15 {
			add_content(&content, series_id).await;
		}
		age_all_contents(&content, series_id, 90).await;

		content.prune_old_contents(series_id).await.unwrap();
		assert_eq!(content.list_version_labels(series_id).await.unwrap().len(), 15);
	}
}
