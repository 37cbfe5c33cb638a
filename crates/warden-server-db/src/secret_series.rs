// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret series repository.
//!
//! A series row is the stable identity of a secret; content revisions hang
//! off it and `current` points at the revision the secret resolves to.
//! Series rows are tamper-tracked over (name, id), so a swapped or renamed
//! row fails verification on read.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use warden_server_crypto::RowIntegrityTagger;

use crate::error::{map_unique_violation, DbError};
use crate::types::SecretSeries;

const TABLE: &str = "secrets";

const SERIES_COLUMNS: &str = "id, name, description, type, owner, generation_options, current, \
                              row_hmac, created_at, created_by, updated_at, updated_by";

/// Repository for secret series database operations.
#[derive(Clone)]
pub struct SecretSeriesRepository {
	pool: SqlitePool,
	tagger: RowIntegrityTagger,
}

impl SecretSeriesRepository {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger) -> Self {
		Self { pool, tagger }
	}

	/// Create a new series. The caller is expected to attach a content
	/// revision and advance `current` in the same transaction.
	#[tracing::instrument(skip(self, generation_options), fields(name = %name, created_by = %created_by))]
	pub async fn create_secret_series(
		&self,
		name: &str,
		owner: Option<&str>,
		created_by: &str,
		description: &str,
		secret_type: Option<&str>,
		generation_options: &BTreeMap<String, String>,
	) -> Result<i64, DbError> {
		let mut tx = self.pool.begin().await?;
		let id = self
			.create_secret_series_tx(
				&mut tx,
				name,
				owner,
				created_by,
				description,
				secret_type,
				generation_options,
			)
			.await?;
		tx.commit().await?;
		Ok(id)
	}

	pub(crate) async fn create_secret_series_tx(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		owner: Option<&str>,
		created_by: &str,
		description: &str,
		secret_type: Option<&str>,
		generation_options: &BTreeMap<String, String>,
	) -> Result<i64, DbError> {
		let now = Utc::now().timestamp();
		let options_json = serde_json::to_string(generation_options)?;

		let row = sqlx::query(
			r#"
			INSERT INTO secrets (
				name, description, type, owner, generation_options,
				created_at, created_by, updated_at, updated_by
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			RETURNING id
			"#,
		)
		.bind(name)
		.bind(description)
		.bind(secret_type)
		.bind(owner)
		.bind(&options_json)
		.bind(now)
		.bind(created_by)
		.bind(now)
		.bind(created_by)
		.fetch_one(&mut *conn)
		.await
		.map_err(|e| map_unique_violation(e, format!("secret {name} already exists")))?;

		let id: i64 = row.get("id");
		let row_hmac = self.tagger.tag(TABLE, &[name, &id.to_string()]);
		sqlx::query("UPDATE secrets SET row_hmac = ? WHERE id = ?")
			.bind(&row_hmac)
			.bind(id)
			.execute(&mut *conn)
			.await?;

		tracing::debug!(secret_id = id, name = %name, "secret series created");
		Ok(id)
	}

	/// Refresh a series' mutable fields during create-or-update.
	pub(crate) async fn update_secret_series_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
		name: &str,
		owner: Option<&str>,
		updated_by: &str,
		description: &str,
		secret_type: Option<&str>,
		generation_options: &BTreeMap<String, String>,
	) -> Result<(), DbError> {
		let options_json = serde_json::to_string(generation_options)?;
		let row_hmac = self.tagger.tag(TABLE, &[name, &id.to_string()]);

		sqlx::query(
			r#"
			UPDATE secrets
			SET name = ?, owner = ?, description = ?, type = ?, generation_options = ?,
			    row_hmac = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(name)
		.bind(owner)
		.bind(description)
		.bind(secret_type)
		.bind(&options_json)
		.bind(&row_hmac)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(id)
		.execute(&mut *conn)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(secret_id = %id))]
	pub async fn get_secret_series_by_id(&self, id: i64) -> Result<Option<SecretSeries>, DbError> {
		let row = sqlx::query(&format!("SELECT {SERIES_COLUMNS} FROM secrets WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| self.verified_series(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(name = %name))]
	pub async fn get_secret_series_by_name(&self, name: &str) -> Result<Option<SecretSeries>, DbError> {
		let row = sqlx::query(&format!("SELECT {SERIES_COLUMNS} FROM secrets WHERE name = ?"))
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;

		row.map(|r| self.verified_series(&r)).transpose()
	}

	pub(crate) async fn get_secret_series_by_id_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
	) -> Result<Option<SecretSeries>, DbError> {
		let row = sqlx::query(&format!("SELECT {SERIES_COLUMNS} FROM secrets WHERE id = ?"))
			.bind(id)
			.fetch_optional(&mut *conn)
			.await?;

		row.map(|r| self.verified_series(&r)).transpose()
	}

	pub(crate) async fn get_secret_series_by_name_tx(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
	) -> Result<Option<SecretSeries>, DbError> {
		let row = sqlx::query(&format!("SELECT {SERIES_COLUMNS} FROM secrets WHERE name = ?"))
			.bind(name)
			.fetch_optional(&mut *conn)
			.await?;

		row.map(|r| self.verified_series(&r)).transpose()
	}

	pub async fn secret_series_exists(&self, name: &str) -> Result<bool, DbError> {
		let row = sqlx::query("SELECT 1 FROM secrets WHERE name = ?")
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.is_some())
	}

	/// Point a series at one of its own content revisions.
	///
	/// # Errors
	/// - `DbError::NotFound` when the content row does not exist.
	/// - `DbError::InvalidArgument` when it belongs to a different series;
	///   pointing a series at a foreign revision is never allowed.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_id, content_id = %secret_content_id, updated_by = %updated_by))]
	pub async fn set_current_version(
		&self,
		secret_id: i64,
		secret_content_id: i64,
		updated_by: &str,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		self.set_current_version_tx(&mut tx, secret_id, secret_content_id, updated_by)
			.await?;
		tx.commit().await?;
		Ok(())
	}

	pub(crate) async fn set_current_version_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_id: i64,
		secret_content_id: i64,
		updated_by: &str,
	) -> Result<(), DbError> {
		let row = sqlx::query("SELECT secretid FROM secrets_content WHERE id = ?")
			.bind(secret_content_id)
			.fetch_optional(&mut *conn)
			.await?;

		let Some(row) = row else {
			return Err(DbError::NotFound(format!(
				"version {secret_content_id} is not a known version of this secret"
			)));
		};

		let owning_series: i64 = row.get("secretid");
		if owning_series != secret_id {
			return Err(DbError::InvalidArgument(format!(
				"version {secret_content_id} is not associated with secret {secret_id}"
			)));
		}

		sqlx::query(
			r#"
			UPDATE secrets
			SET current = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(secret_content_id)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(secret_id)
		.execute(&mut *conn)
		.await?;

		tracing::debug!(secret_id, content_id = secret_content_id, "current version set");
		Ok(())
	}

	/// Rename a series, recomputing its integrity tag.
	///
	/// # Errors
	/// `DbError::Conflict` when the new name is taken.
	#[tracing::instrument(skip(self), fields(secret_id = %secret_id, name = %name))]
	pub async fn rename_secret_series(
		&self,
		secret_id: i64,
		name: &str,
		updated_by: &str,
	) -> Result<(), DbError> {
		let row_hmac = self.tagger.tag(TABLE, &[name, &secret_id.to_string()]);
		let result = sqlx::query(
			r#"
			UPDATE secrets
			SET name = ?, row_hmac = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(name)
		.bind(&row_hmac)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(secret_id)
		.execute(&self.pool)
		.await
		.map_err(|e| map_unique_violation(e, format!("secret {name} already exists")))?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("secret {secret_id} not found")));
		}
		tracing::info!(secret_id, name = %name, "secret series renamed");
		Ok(())
	}

	/// Page through series by creation time.
	///
	/// # Arguments
	/// * `idx` - first index to select, in creation order
	/// * `num` - number of series to return
	/// * `newest_first` - reverse the creation-time ordering
	#[tracing::instrument(skip(self))]
	pub async fn list_batched(
		&self,
		idx: i64,
		num: i64,
		newest_first: bool,
	) -> Result<Vec<SecretSeries>, DbError> {
		let order = if newest_first {
			"ORDER BY created_at DESC, id DESC"
		} else {
			"ORDER BY created_at ASC, id ASC"
		};
		let rows = sqlx::query(&format!(
			"SELECT {SERIES_COLUMNS} FROM secrets WHERE current IS NOT NULL {order} LIMIT ? OFFSET ?"
		))
		.bind(num)
		.bind(idx)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(|r| self.verified_series(r)).collect()
	}

	/// Delete a series; content rows and access grants cascade.
	#[tracing::instrument(skip(self), fields(secret_id = %id))]
	pub async fn delete_secret_series_by_id(&self, id: i64) -> Result<(), DbError> {
		let result = sqlx::query("DELETE FROM secrets WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("secret {id} not found")));
		}
		tracing::info!(secret_id = id, "secret series deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(name = %name))]
	pub async fn delete_secret_series_by_name(&self, name: &str) -> Result<(), DbError> {
		let result = sqlx::query("DELETE FROM secrets WHERE name = ?")
			.bind(name)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("secret {name} not found")));
		}
		tracing::info!(name = %name, "secret series deleted");
		Ok(())
	}

	pub(crate) fn verified_series(&self, row: &SqliteRow) -> Result<SecretSeries, DbError> {
		let id: i64 = row.get("id");
		let name: String = row.get("name");
		let row_hmac: Option<String> = row.get("row_hmac");

		if !self
			.tagger
			.verify(row_hmac.as_deref().unwrap_or(""), TABLE, &[&name, &id.to_string()])
		{
			return Err(DbError::IntegrityViolation(format!(
				"secret series row {id} failed integrity verification"
			)));
		}

		let options_json: String = row.get("generation_options");
		Ok(SecretSeries {
			id,
			name,
			description: row.get("description"),
			secret_type: row.get("type"),
			owner: row.get("owner"),
			generation_options: serde_json::from_str(&options_json)?,
			current_version: row.get("current"),
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
	use crate::secret_content::SecretContentRepository;
	use crate::testing::{create_test_pool, test_tagger};

	async fn make_repos() -> (SecretSeriesRepository, SecretContentRepository) {
		let pool = create_test_pool().await;
		let tagger = test_tagger();
		(
			SecretSeriesRepository::new(pool.clone(), tagger.clone()),
			SecretContentRepository::new(pool, tagger),
		)
	}

	async fn make_series(repo: &SecretSeriesRepository, name: &str) -> i64 {
		repo.create_secret_series(name, None, "admin", "", None, &BTreeMap::new())
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn create_and_get_series() {
		let (series, _) = make_repos().await;
		let id = make_series(&series, "db-password").await;

		let found = series.get_secret_series_by_name("db-password").await.unwrap().unwrap();
		assert_eq!(found.id, id);
		assert!(found.current_version.is_none());
		assert!(series.secret_series_exists("db-password").await.unwrap());
	}

	#[tokio::test]
	async fn duplicate_name_is_a_conflict() {
		let (series, _) = make_repos().await;
		make_series(&series, "db-password").await;

		let err = series
			.create_secret_series("db-password", None, "admin", "", None, &BTreeMap::new())
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn set_current_version_validates_ownership() {
		let (series, content) = make_repos().await;
		let a = make_series(&series, "a").await;
		let b = make_series(&series, "b").await;

		let content_a = content
			.create_secret_content(a, "envelope", "checksum", None, "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();

		series.set_current_version(a, content_a, "admin").await.unwrap();
		let found = series.get_secret_series_by_id(a).await.unwrap().unwrap();
		assert_eq!(found.current_version, Some(content_a));

		// A content row belonging to a different series is rejected.
		let err = series.set_current_version(b, content_a, "admin").await.unwrap_err();
		assert!(matches!(err, DbError::InvalidArgument(_)));

		// A content row that does not exist at all is not found.
		let err = series.set_current_version(a, 9999, "admin").await.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn rename_recomputes_the_tag() {
		let (series, _) = make_repos().await;
		let id = make_series(&series, "old-name").await;

		series.rename_secret_series(id, "new-name", "admin").await.unwrap();

		// Read back passes verification because the tag was recomputed.
		let found = series.get_secret_series_by_id(id).await.unwrap().unwrap();
		assert_eq!(found.name, "new-name");

		let err = series
			.rename_secret_series(9999, "other", "admin")
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn tampered_name_fails_verification() {
		let (series, _) = make_repos().await;
		let id = make_series(&series, "db-password").await;

		sqlx::query("UPDATE secrets SET name = 'impostor' WHERE id = ?")
			.bind(id)
			.execute(&series.pool)
			.await
			.unwrap();

		assert!(matches!(
			series.get_secret_series_by_id(id).await.unwrap_err(),
			DbError::IntegrityViolation(_)
		));
	}

	#[tokio::test]
	async fn delete_cascades_to_content() {
		let (series, content) = make_repos().await;
		let id = make_series(&series, "db-password").await;
		let content_id = content
			.create_secret_content(id, "envelope", "checksum", None, "admin", &BTreeMap::new(), 0)
			.await
			.unwrap();

		series.delete_secret_series_by_name("db-password").await.unwrap();
		assert!(series.get_secret_series_by_id(id).await.unwrap().is_none());
		assert!(content.get_secret_content_by_id(content_id).await.unwrap().is_none());
	}
}
