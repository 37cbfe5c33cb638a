// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client repository for database operations.
//!
//! Client rows are tamper-tracked: a keyed tag over (name, id) is written on
//! every insert/update and verified on every read. A verification failure is
//! a fatal integrity violation, not a not-found.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use warden_server_crypto::RowIntegrityTagger;

use crate::error::{map_unique_violation, DbError};
use crate::types::Client;

const TABLE: &str = "clients";

/// Repository for client database operations.
#[derive(Clone)]
pub struct ClientRepository {
	pool: SqlitePool,
	tagger: RowIntegrityTagger,
}

impl ClientRepository {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger) -> Self {
		Self { pool, tagger }
	}

	/// Create a new client.
	///
	/// # Returns
	/// The assigned client id.
	///
	/// # Errors
	/// `DbError::Conflict` when a client with this name already exists.
	#[tracing::instrument(skip(self), fields(name = %name, created_by = %created_by))]
	pub async fn create_client(
		&self,
		name: &str,
		description: &str,
		created_by: &str,
		automation_allowed: bool,
	) -> Result<i64, DbError> {
		let mut tx = self.pool.begin().await?;
		let id = self
			.create_client_tx(&mut tx, name, description, created_by, automation_allowed)
			.await?;
		tx.commit().await?;

		tracing::info!(client_id = id, name = %name, "client created");
		Ok(id)
	}

	pub(crate) async fn create_client_tx(
		&self,
		conn: &mut SqliteConnection,
		name: &str,
		description: &str,
		created_by: &str,
		automation_allowed: bool,
	) -> Result<i64, DbError> {
		let now = Utc::now().timestamp();

		let row = sqlx::query(
			r#"
			INSERT INTO clients (
				name, description, created_at, created_by, updated_at, updated_by,
				enabled, automation_allowed
			) VALUES (?, ?, ?, ?, ?, ?, 1, ?)
			RETURNING id
			"#,
		)
		.bind(name)
		.bind(description)
		.bind(now)
		.bind(created_by)
		.bind(now)
		.bind(created_by)
		.bind(automation_allowed as i32)
		.fetch_one(&mut *conn)
		.await
		.map_err(|e| map_unique_violation(e, format!("client {name} already exists")))?;

		let id: i64 = row.get("id");
		let row_hmac = self.tagger.tag(TABLE, &[name, &id.to_string()]);
		sqlx::query("UPDATE clients SET row_hmac = ? WHERE id = ?")
			.bind(&row_hmac)
			.bind(id)
			.execute(&mut *conn)
			.await?;

		Ok(id)
	}

	/// Get a client by id, verifying its integrity tag.
	#[tracing::instrument(skip(self), fields(client_id = %id))]
	pub async fn get_client_by_id(&self, id: i64) -> Result<Option<Client>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, created_at, created_by, updated_at, updated_by,
			       enabled, automation_allowed, row_hmac
			FROM clients
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| self.verified_client(&r)).transpose()
	}

	/// Get a client by name, verifying its integrity tag.
	#[tracing::instrument(skip(self), fields(name = %name))]
	pub async fn get_client_by_name(&self, name: &str) -> Result<Option<Client>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, created_at, created_by, updated_at, updated_by,
			       enabled, automation_allowed, row_hmac
			FROM clients
			WHERE name = ?
			"#,
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| self.verified_client(&r)).transpose()
	}

	pub(crate) async fn get_client_by_id_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
	) -> Result<Option<Client>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, created_at, created_by, updated_at, updated_by,
			       enabled, automation_allowed, row_hmac
			FROM clients
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;

		row.map(|r| self.verified_client(&r)).transpose()
	}

	/// List all clients, ordered by name.
	#[tracing::instrument(skip(self))]
	pub async fn list_clients(&self) -> Result<Vec<Client>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, name, description, created_at, created_by, updated_at, updated_by,
			       enabled, automation_allowed, row_hmac
			FROM clients
			ORDER BY name ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		let clients: Result<Vec<_>, _> = rows.iter().map(|r| self.verified_client(r)).collect();
		let clients = clients?;
		tracing::debug!(count = clients.len(), "listed clients");
		Ok(clients)
	}

	/// Enable or disable a client.
	///
	/// # Returns
	/// `true` if a row was updated.
	#[tracing::instrument(skip(self), fields(client_id = %id, enabled))]
	pub async fn set_enabled(&self, id: i64, enabled: bool, updated_by: &str) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE clients
			SET enabled = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(enabled as i32)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(id)
		.execute(&self.pool)
		.await?;

		let updated = result.rows_affected() > 0;
		if updated {
			tracing::info!(client_id = id, enabled, "client enabled flag changed");
		}
		Ok(updated)
	}

	/// Set whether a client may use automation operations.
	#[tracing::instrument(skip(self), fields(client_id = %id, automation_allowed))]
	pub async fn set_automation_allowed(
		&self,
		id: i64,
		automation_allowed: bool,
		updated_by: &str,
	) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE clients
			SET automation_allowed = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(automation_allowed as i32)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Delete a client. Memberships referencing it are removed by cascade.
	///
	/// # Errors
	/// `DbError::NotFound` when no client exists with this id.
	#[tracing::instrument(skip(self), fields(client_id = %id))]
	pub async fn delete_client(&self, id: i64) -> Result<(), DbError> {
		let result = sqlx::query("DELETE FROM clients WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("client {id} not found")));
		}
		tracing::info!(client_id = id, "client deleted");
		Ok(())
	}

	fn verified_client(&self, row: &SqliteRow) -> Result<Client, DbError> {
		let id: i64 = row.get("id");
		let name: String = row.get("name");
		let row_hmac: Option<String> = row.get("row_hmac");

		if !self
			.tagger
			.verify(row_hmac.as_deref().unwrap_or(""), TABLE, &[&name, &id.to_string()])
		{
			return Err(DbError::IntegrityViolation(format!(
				"client row {id} failed integrity verification"
			)));
		}

		let enabled: i64 = row.get("enabled");
		let automation_allowed: i64 = row.get("automation_allowed");
		Ok(Client {
			id,
			name,
			description: row.get("description"),
			created_at: row.get("created_at"),
			created_by: row.get("created_by"),
			updated_at: row.get("updated_at"),
			updated_by: row.get("updated_by"),
			enabled: enabled != 0,
			automation_allowed: automation_allowed != 0,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_test_pool, test_tagger};

	async fn make_repo() -> ClientRepository {
		ClientRepository::new(create_test_pool().await, test_tagger())
	}

	#[tokio::test]
	async fn create_and_get_client() {
		let repo = make_repo().await;

		let id = repo.create_client("ci-runner", "CI", "admin", true).await.unwrap();
		let client = repo.get_client_by_id(id).await.unwrap().unwrap();

		assert_eq!(client.name, "ci-runner");
		assert_eq!(client.created_by, "admin");
		assert!(client.enabled);
		assert!(client.automation_allowed);

		let by_name = repo.get_client_by_name("ci-runner").await.unwrap().unwrap();
		assert_eq!(by_name.id, id);
	}

	#[tokio::test]
	async fn duplicate_name_is_a_conflict() {
		let repo = make_repo().await;
		repo.create_client("ci", "", "admin", false).await.unwrap();

		let err = repo.create_client("ci", "", "admin", false).await.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
	}

	#[tokio::test]
	async fn missing_client_is_none() {
		let repo = make_repo().await;
		assert!(repo.get_client_by_id(999).await.unwrap().is_none());
		assert!(repo.get_client_by_name("nope").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn flags_can_be_toggled() {
		let repo = make_repo().await;
		let id = repo.create_client("ci", "", "admin", false).await.unwrap();

		assert!(repo.set_enabled(id, false, "admin").await.unwrap());
		assert!(repo.set_automation_allowed(id, true, "admin").await.unwrap());

		let client = repo.get_client_by_id(id).await.unwrap().unwrap();
		assert!(!client.enabled);
		assert!(client.automation_allowed);

		assert!(!repo.set_enabled(999, true, "admin").await.unwrap());
	}

	#[tokio::test]
	async fn delete_is_not_found_when_absent() {
		let repo = make_repo().await;
		let id = repo.create_client("ci", "", "admin", false).await.unwrap();

		repo.delete_client(id).await.unwrap();
		assert!(matches!(
			repo.delete_client(id).await.unwrap_err(),
			DbError::NotFound(_)
		));
	}

	#[tokio::test]
	async fn tampered_row_fails_integrity_check() {
		let repo = make_repo().await;
		let id = repo.create_client("ci", "", "admin", false).await.unwrap();

		// Rename the row underneath the stored tag.
		sqlx::query("UPDATE clients SET name = 'swapped' WHERE id = ?")
			.bind(id)
			.execute(&repo.pool)
			.await
			.unwrap();

		assert!(matches!(
			repo.get_client_by_id(id).await.unwrap_err(),
			DbError::IntegrityViolation(_)
		));
	}
}
