// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Combined secret operations spanning series and content rows.
//!
//! Every multi-row mutation here runs inside a single transaction so partial
//! writes are never observable; `_tx` variants accept an open connection so
//! the batch coordinator can widen the transaction to a whole batch.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};

use warden_server_crypto::RowIntegrityTagger;

use crate::error::DbError;
use crate::secret_content::SecretContentRepository;
use crate::secret_series::SecretSeriesRepository;
use crate::types::SecretSeriesAndContent;

/// Everything needed to persist one secret revision.
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
	pub name: String,
	pub owner: Option<String>,
	pub encrypted_content: String,
	pub content_checksum: String,
	/// Optional legacy version label for the new revision.
	pub version: Option<String>,
	pub creator: String,
	pub metadata: BTreeMap<String, String>,
	/// Epoch seconds; 0 means no expiry.
	pub expiry: i64,
	pub description: String,
	pub secret_type: Option<String>,
	pub generation_options: BTreeMap<String, String>,
}

/// Repository orchestrating secret series and content rows.
#[derive(Clone)]
pub struct SecretRepository {
	pool: SqlitePool,
	series: SecretSeriesRepository,
	content: SecretContentRepository,
}

impl SecretRepository {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger) -> Self {
		Self {
			series: SecretSeriesRepository::new(pool.clone(), tagger.clone()),
			content: SecretContentRepository::new(pool.clone(), tagger),
			pool,
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn series(&self) -> &SecretSeriesRepository {
		&self.series
	}

	pub fn content(&self) -> &SecretContentRepository {
		&self.content
	}

	/// Create a new secret: series row, first content revision, and the
	/// current pointer, in one transaction.
	///
	/// # Errors
	/// `DbError::Conflict` when the name is taken.
	#[tracing::instrument(skip(self, secret), fields(name = %secret.name, creator = %secret.creator))]
	pub async fn create_secret(&self, secret: &NewSecret) -> Result<(i64, i64), DbError> {
		let mut tx = self.pool.begin().await?;
		let ids = self.create_secret_tx(&mut tx, secret).await?;
		tx.commit().await?;

		tracing::info!(secret_id = ids.0, name = %secret.name, "secret created");
		Ok(ids)
	}

	pub async fn create_secret_tx(
		&self,
		conn: &mut SqliteConnection,
		secret: &NewSecret,
	) -> Result<(i64, i64), DbError> {
		let series_id = self
			.series
			.create_secret_series_tx(
				conn,
				&secret.name,
				secret.owner.as_deref(),
				&secret.creator,
				&secret.description,
				secret.secret_type.as_deref(),
				&secret.generation_options,
			)
			.await?;

		let content_id = self.attach_revision_tx(conn, series_id, secret).await?;
		Ok((series_id, content_id))
	}

	/// Create the secret, or add a revision to the existing series of the
	/// same name and refresh its mutable fields.
	#[tracing::instrument(skip(self, secret), fields(name = %secret.name, creator = %secret.creator))]
	pub async fn create_or_update_secret(&self, secret: &NewSecret) -> Result<(i64, i64), DbError> {
		let mut tx = self.pool.begin().await?;
		let ids = self.create_or_update_secret_tx(&mut tx, secret).await?;
		tx.commit().await?;

		tracing::info!(secret_id = ids.0, name = %secret.name, "secret created or updated");
		Ok(ids)
	}

	pub async fn create_or_update_secret_tx(
		&self,
		conn: &mut SqliteConnection,
		secret: &NewSecret,
	) -> Result<(i64, i64), DbError> {
		let existing = self.series.get_secret_series_by_name_tx(conn, &secret.name).await?;

		match existing {
			Some(series) => {
				self.series
					.update_secret_series_tx(
						conn,
						series.id,
						&secret.name,
						secret.owner.as_deref(),
						&secret.creator,
						&secret.description,
						secret.secret_type.as_deref(),
						&secret.generation_options,
					)
					.await?;
				let content_id = self.attach_revision_tx(conn, series.id, secret).await?;
				Ok((series.id, content_id))
			}
			None => self.create_secret_tx(conn, secret).await,
		}
	}

	/// Write a content revision and advance the current pointer.
	async fn attach_revision_tx(
		&self,
		conn: &mut SqliteConnection,
		series_id: i64,
		secret: &NewSecret,
	) -> Result<i64, DbError> {
		let content_id = self
			.content
			.create_secret_content_tx(
				conn,
				series_id,
				&secret.encrypted_content,
				&secret.content_checksum,
				secret.version.as_deref(),
				&secret.creator,
				&secret.metadata,
				secret.expiry,
			)
			.await?;

		self.series
			.set_current_version_tx(conn, series_id, content_id, &secret.creator)
			.await?;
		Ok(content_id)
	}

	/// Resolve a secret to its current revision.
	///
	/// Returns `None` while the series has no current revision. A dangling
	/// current pointer is surfaced as `DbError::NotFound`.
	#[tracing::instrument(skip(self), fields(secret_id = %id))]
	pub async fn get_secret_by_id(&self, id: i64) -> Result<Option<SecretSeriesAndContent>, DbError> {
		let mut tx = self.pool.begin().await?;
		let result = self.get_secret_by_id_tx(&mut tx, id).await?;
		tx.commit().await?;
		Ok(result)
	}

	pub async fn get_secret_by_id_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
	) -> Result<Option<SecretSeriesAndContent>, DbError> {
		let Some(series) = self.series.get_secret_series_by_id_tx(conn, id).await? else {
			return Ok(None);
		};
		self.resolve_current_tx(conn, series).await
	}

	#[tracing::instrument(skip(self), fields(name = %name))]
	pub async fn get_secret_by_name(&self, name: &str) -> Result<Option<SecretSeriesAndContent>, DbError> {
		let mut tx = self.pool.begin().await?;
		let result = self.get_secret_by_name_tx(&mut tx, name).await?;
		tx.commit().await?;
		Ok(result)
	}

	pub async fn get_secret_by_name_tx(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
	) -> Result<Option<SecretSeriesAndContent>, DbError> {
		let Some(series) = self.series.get_secret_series_by_name_tx(conn, name).await? else {
			return Ok(None);
		};
		self.resolve_current_tx(conn, series).await
	}

	async fn resolve_current_tx(
		&self,
		conn: &mut SqliteConnection,
		series: crate::types::SecretSeries,
	) -> Result<Option<SecretSeriesAndContent>, DbError> {
		let Some(current_id) = series.current_version else {
			return Ok(None);
		};
		let content = self
			.content
			.get_secret_content_by_id_tx(conn, current_id)
			.await?
			.ok_or_else(|| {
				DbError::NotFound(format!(
					"current content {current_id} of secret {} not found",
					series.id
				))
			})?;
		Ok(Some(SecretSeriesAndContent { series, content }))
	}

	/// Resolve several secrets by name in one consistent read; absent names
	/// are skipped.
	#[tracing::instrument(skip(self, names), fields(count = names.len()))]
	pub async fn get_secrets_by_names(
		&self,
		names: &[String],
	) -> Result<Vec<SecretSeriesAndContent>, DbError> {
		let mut tx = self.pool.begin().await?;
		let mut secrets = Vec::with_capacity(names.len());
		for name in names {
			if let Some(secret) = self.get_secret_by_name_tx(&mut tx, name).await? {
				secrets.push(secret);
			}
		}
		tx.commit().await?;
		Ok(secrets)
	}

	/// List secrets with their current revision, ordered by series id.
	///
	/// # Arguments
	/// * `owner` - restrict to series owned by this group name
	/// * `expire_max_time` - exclusive upper bound on expiry; only secrets
	///   that expire (expiry > 0) before this time are returned
	/// * `min_id_exclusive` - resume point for cursor pagination
	/// * `limit` - maximum number of rows to return
	///
	/// The ordering key is the monotonic series id, so rows inserted during a
	/// pagination sweep never reshuffle pages already returned.
	#[tracing::instrument(skip(self))]
	pub async fn list_secrets(
		&self,
		owner: Option<&str>,
		expire_max_time: Option<i64>,
		min_id_exclusive: Option<i64>,
		limit: Option<i64>,
	) -> Result<Vec<SecretSeriesAndContent>, DbError> {
		let mut sql = String::from(
			r#"
			SELECT s.id, s.name, s.description, s.type, s.owner, s.generation_options,
			       s.current, s.row_hmac, s.created_at, s.created_by, s.updated_at, s.updated_by,
			       c.id AS c_id, c.secretid AS c_secretid,
			       c.encrypted_content AS c_encrypted_content, c.content_hmac AS c_content_hmac,
			       c.version AS c_version, c.metadata AS c_metadata, c.expiry AS c_expiry,
			       c.row_hmac AS c_row_hmac, c.created_at AS c_created_at,
			       c.created_by AS c_created_by, c.updated_at AS c_updated_at,
			       c.updated_by AS c_updated_by
			FROM secrets s
			JOIN secrets_content c ON c.id = s.current
			WHERE s.current IS NOT NULL
			"#,
		);
		if owner.is_some() {
			sql.push_str(" AND s.owner = ?");
		}
		if expire_max_time.is_some() {
			sql.push_str(" AND c.expiry > 0 AND c.expiry < ?");
		}
		if min_id_exclusive.is_some() {
			sql.push_str(" AND s.id > ?");
		}
		sql.push_str(" ORDER BY s.id ASC");
		if limit.is_some() {
			sql.push_str(" LIMIT ?");
		}

		let mut query = sqlx::query(&sql);
		if let Some(owner) = owner {
			query = query.bind(owner);
		}
		if let Some(expire_max_time) = expire_max_time {
			query = query.bind(expire_max_time);
		}
		if let Some(min_id) = min_id_exclusive {
			query = query.bind(min_id);
		}
		if let Some(limit) = limit {
			query = query.bind(limit);
		}

		let rows = query.fetch_all(&self.pool).await?;

		let mut secrets = Vec::with_capacity(rows.len());
		for row in &rows {
			let series = self.series.verified_series(row)?;

			// Content columns are aliased; rebuild a content view and verify
			// its tag against the stored serialization.
			let c_id: i64 = row.get("c_id");
			let encrypted_content: String = row.get("c_encrypted_content");
			let metadata_json: String = row.get("c_metadata");
			let c_row_hmac: Option<String> = row.get("c_row_hmac");
			if !self.content_tag_matches(&encrypted_content, &metadata_json, c_id, c_row_hmac.as_deref()) {
				return Err(DbError::IntegrityViolation(format!(
					"secret content row {c_id} failed integrity verification"
				)));
			}

			let content = crate::types::SecretContent {
				id: c_id,
				secret_series_id: row.get("c_secretid"),
				encrypted_content,
				content_checksum: row.get("c_content_hmac"),
				version: row.get("c_version"),
				metadata: serde_json::from_str(&metadata_json)?,
				expiry: row.get("c_expiry"),
				created_at: row.get("c_created_at"),
				created_by: row.get("c_created_by"),
				updated_at: row.get("c_updated_at"),
				updated_by: row.get("c_updated_by"),
			};
			secrets.push(SecretSeriesAndContent { series, content });
		}

		tracing::debug!(count = secrets.len(), "listed secrets");
		Ok(secrets)
	}

	fn content_tag_matches(
		&self,
		encrypted_content: &str,
		metadata_json: &str,
		id: i64,
		stored: Option<&str>,
	) -> bool {
		self.content
			.tagger()
			.verify(
				stored.unwrap_or(""),
				"secrets_content",
				&[encrypted_content, metadata_json, &id.to_string()],
			)
	}

	/// Page through secrets by creation time with their current revision.
	#[tracing::instrument(skip(self))]
	pub async fn list_batched(
		&self,
		idx: i64,
		num: i64,
		newest_first: bool,
	) -> Result<Vec<SecretSeriesAndContent>, DbError> {
		let mut tx = self.pool.begin().await?;
		let batch = {
			let order = if newest_first {
				"ORDER BY created_at DESC, id DESC"
			} else {
				"ORDER BY created_at ASC, id ASC"
			};
			let sql = format!(
				"SELECT id FROM secrets WHERE current IS NOT NULL {order} LIMIT ? OFFSET ?"
			);
			sqlx::query(&sql)
				.bind(num)
				.bind(idx)
				.fetch_all(&mut *tx)
				.await?
		};

		let mut secrets = Vec::with_capacity(batch.len());
		for row in &batch {
			let id: i64 = row.get("id");
			if let Some(secret) = self.get_secret_by_id_tx(&mut tx, id).await? {
				secrets.push(secret);
			}
		}
		tx.commit().await?;
		Ok(secrets)
	}

	/// Merge a new expiry into the current revision of the named secret.
	#[tracing::instrument(skip(self), fields(name = %name, expiry))]
	pub async fn set_expiration_by_name(&self, name: &str, expiry: i64) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let series = self
			.series
			.get_secret_series_by_name_tx(&mut tx, name)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("secret {name} not found")))?;
		let current_id = series
			.current_version
			.ok_or_else(|| DbError::NotFound(format!("secret {name} has no current version")))?;

		let row = sqlx::query("SELECT expiry FROM secrets_content WHERE id = ?")
			.bind(current_id)
			.fetch_one(&mut *tx)
			.await?;
		let existing: i64 = row.get("expiry");
		let merged = if existing == 0 { expiry } else { existing.min(expiry) };

		sqlx::query("UPDATE secrets_content SET expiry = ?, updated_at = ? WHERE id = ?")
			.bind(merged)
			.bind(Utc::now().timestamp())
			.bind(current_id)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		Ok(())
	}

	/// Roll the named secret back (or forward) to one of its revisions.
	#[tracing::instrument(skip(self), fields(name = %name, version_id, updated_by = %updated_by))]
	pub async fn set_current_version_by_name(
		&self,
		name: &str,
		version_id: i64,
		updated_by: &str,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		let series = self
			.series
			.get_secret_series_by_name_tx(&mut tx, name)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("secret {name} not found")))?;

		self.series
			.set_current_version_tx(&mut tx, series.id, version_id, updated_by)
			.await?;
		tx.commit().await?;

		tracing::info!(name = %name, version_id, "secret current version changed");
		Ok(())
	}

	/// Delete a secret; content rows and access grants cascade.
	pub async fn delete_secret_by_name(&self, name: &str) -> Result<(), DbError> {
		self.series.delete_secret_series_by_name(name).await
	}

	pub async fn delete_secret_by_id(&self, id: i64) -> Result<(), DbError> {
		self.series.delete_secret_series_by_id(id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, test_tagger};

	async fn make_repo() -> SecretRepository {
		SecretRepository::new(create_test_pool().await, test_tagger())
	}

	fn new_secret(name: &str) -> NewSecret {
		NewSecret {
			name: name.to_string(),
			encrypted_content: format!("envelope-{name}"),
			content_checksum: "checksum".to_string(),
			creator: "admin".to_string(),
			description: "a secret".to_string(),
			..NewSecret::default()
		}
	}

	#[tokio::test]
	async fn create_resolves_to_current() {
		let repo = make_repo().await;
		let (series_id, content_id) = repo.create_secret(&new_secret("db-password")).await.unwrap();

		let secret = repo.get_secret_by_name("db-password").await.unwrap().unwrap();
		assert_eq!(secret.series.id, series_id);
		assert_eq!(secret.content.id, content_id);
		assert_eq!(secret.series.current_version, Some(content_id));

		let by_id = repo.get_secret_by_id(series_id).await.unwrap().unwrap();
		assert_eq!(by_id.content.id, content_id);
	}

	#[tokio::test]
	async fn create_or_update_adds_revisions_to_one_series() {
		let repo = make_repo().await;
		let (series_a, content_a) = repo.create_or_update_secret(&new_secret("db-password")).await.unwrap();

		let mut update = new_secret("db-password");
		update.encrypted_content = "envelope-v2".to_string();
		update.description = "rotated".to_string();
		let (series_b, content_b) = repo.create_or_update_secret(&update).await.unwrap();

		assert_eq!(series_a, series_b);
		assert_ne!(content_a, content_b);

		let secret = repo.get_secret_by_name("db-password").await.unwrap().unwrap();
		assert_eq!(secret.content.id, content_b);
		assert_eq!(secret.content.encrypted_content, "envelope-v2");
		assert_eq!(secret.series.description, "rotated");

		// Both revisions remain on the series.
		let labels = repo.content().list_version_labels(series_a).await.unwrap();
		assert_eq!(labels.len(), 2);
	}

	#[tokio::test]
	async fn plain_create_conflicts_on_existing_name() {
		let repo = make_repo().await;
		repo.create_secret(&new_secret("db-password")).await.unwrap();

		let err = repo.create_secret(&new_secret("db-password")).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn get_secrets_by_names_skips_absent() {
		let repo = make_repo().await;
		repo.create_secret(&new_secret("a")).await.unwrap();
		repo.create_secret(&new_secret("b")).await.unwrap();

		let found = repo
			.get_secrets_by_names(&["a".to_string(), "missing".to_string(), "b".to_string()])
			.await
			.unwrap();
		let names: Vec<&str> = found.iter().map(|s| s.series.name.as_str()).collect();
		assert_eq!(names, vec!["a", "b"]);
	}

	#[tokio::test]
	async fn list_filters_by_owner_and_expiry() {
		let repo = make_repo().await;

		let mut owned = new_secret("owned");
		owned.owner = Some("infra".to_string());
		owned.expiry = 10_000;
		repo.create_secret(&owned).await.unwrap();

		let mut other = new_secret("other");
		other.expiry = 20_000;
		repo.create_secret(&other).await.unwrap();

		let mut no_expiry = new_secret("forever");
		no_expiry.owner = Some("infra".to_string());
		repo.create_secret(&no_expiry).await.unwrap();

		let infra = repo.list_secrets(Some("infra"), None, None, None).await.unwrap();
		let names: Vec<&str> = infra.iter().map(|s| s.series.name.as_str()).collect();
		assert_eq!(names, vec!["owned", "forever"]);

		// Expiry filter excludes non-expiring secrets and those at/after the bound.
		let expiring = repo.list_secrets(None, Some(20_000), None, None).await.unwrap();
		let names: Vec<&str> = expiring.iter().map(|s| s.series.name.as_str()).collect();
		assert_eq!(names, vec!["owned"]);
	}

	#[tokio::test]
	async fn list_orders_by_series_id_and_respects_cursor_bounds() {
		let repo = make_repo().await;
		for name in ["c", "a", "b"] {
			repo.create_secret(&new_secret(name)).await.unwrap();
		}

		let all = repo.list_secrets(None, None, None, None).await.unwrap();
		let ids: Vec<i64> = all.iter().map(|s| s.series.id).collect();
		let mut sorted = ids.clone();
		sorted.sort_unstable();
		assert_eq!(ids, sorted);

		let after_first = repo
			.list_secrets(None, None, Some(ids[0]), Some(1))
			.await
			.unwrap();
		assert_eq!(after_first.len(), 1);
		assert_eq!(after_first[0].series.id, ids[1]);
	}

	#[tokio::test]
	async fn rollback_to_older_version() {
		let repo = make_repo().await;
		let (series_id, v1) = repo.create_secret(&new_secret("db-password")).await.unwrap();

		let mut update = new_secret("db-password");
		update.encrypted_content = "envelope-v2".to_string();
		repo.create_or_update_secret(&update).await.unwrap();

		repo.set_current_version_by_name("db-password", v1, "admin").await.unwrap();
		let secret = repo.get_secret_by_name("db-password").await.unwrap().unwrap();
		assert_eq!(secret.content.id, v1);
		assert_eq!(secret.series.id, series_id);
	}

	#[tokio::test]
	async fn expiry_merge_by_name() {
		let repo = make_repo().await;
		let mut secret = new_secret("db-password");
		secret.expiry = 9_000;
		repo.create_secret(&secret).await.unwrap();

		repo.set_expiration_by_name("db-password", 5_000).await.unwrap();
		let found = repo.get_secret_by_name("db-password").await.unwrap().unwrap();
		assert_eq!(found.content.expiry, 5_000);

		assert!(matches!(
			repo.set_expiration_by_name("missing", 1).await.unwrap_err(),
			DbError::NotFound(_)
		));
	}
}
