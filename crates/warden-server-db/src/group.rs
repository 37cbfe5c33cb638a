// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Group repository for database operations.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use crate::error::{map_unique_violation, DbError};
use crate::types::Group;

/// Repository for group database operations.
///
/// Deleting a group removes exactly the memberships and access grants that
/// reference it (cascading foreign keys), never other rows.
#[derive(Clone)]
pub struct GroupRepository {
	pool: SqlitePool,
}

impl GroupRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Create a new group.
	///
	/// # Errors
	/// `DbError::Conflict` when a group with this name already exists.
	#[tracing::instrument(skip(self, metadata), fields(name = %name, created_by = %created_by))]
	pub async fn create_group(
		&self,
		name: &str,
		description: &str,
		created_by: &str,
		metadata: &BTreeMap<String, String>,
	) -> Result<i64, DbError> {
		let now = Utc::now().timestamp();
		let metadata_json = serde_json::to_string(metadata)?;

		let row = sqlx::query(
			r#"
			INSERT INTO groups (name, description, metadata, created_at, created_by, updated_at, updated_by)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			RETURNING id
			"#,
		)
		.bind(name)
		.bind(description)
		.bind(&metadata_json)
		.bind(now)
		.bind(created_by)
		.bind(now)
		.bind(created_by)
		.fetch_one(&self.pool)
		.await
		.map_err(|e| map_unique_violation(e, format!("group {name} already exists")))?;

		let id: i64 = row.get("id");
		tracing::info!(group_id = id, name = %name, "group created");
		Ok(id)
	}

	#[tracing::instrument(skip(self), fields(group_id = %id))]
	pub async fn get_group_by_id(&self, id: i64) -> Result<Option<Group>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, metadata, created_at, created_by, updated_at, updated_by
			FROM groups
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| parse_group_row(&r)).transpose()
	}

	#[tracing::instrument(skip(self), fields(name = %name))]
	pub async fn get_group_by_name(&self, name: &str) -> Result<Option<Group>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, metadata, created_at, created_by, updated_at, updated_by
			FROM groups
			WHERE name = ?
			"#,
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| parse_group_row(&r)).transpose()
	}

	pub(crate) async fn get_group_by_id_tx(
		&self,
		conn: &mut SqliteConnection,
		id: i64,
	) -> Result<Option<Group>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, name, description, metadata, created_at, created_by, updated_at, updated_by
			FROM groups
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;

		row.map(|r| parse_group_row(&r)).transpose()
	}

	/// List all groups, ordered by name.
	#[tracing::instrument(skip(self))]
	pub async fn list_groups(&self) -> Result<Vec<Group>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, name, description, metadata, created_at, created_by, updated_at, updated_by
			FROM groups
			ORDER BY name ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_group_row).collect()
	}

	/// Update a group's description and metadata.
	#[tracing::instrument(skip(self, metadata), fields(group_id = %id, updated_by = %updated_by))]
	pub async fn update_group(
		&self,
		id: i64,
		description: &str,
		metadata: &BTreeMap<String, String>,
		updated_by: &str,
	) -> Result<(), DbError> {
		let metadata_json = serde_json::to_string(metadata)?;
		let result = sqlx::query(
			r#"
			UPDATE groups
			SET description = ?, metadata = ?, updated_at = ?, updated_by = ?
			WHERE id = ?
			"#,
		)
		.bind(description)
		.bind(&metadata_json)
		.bind(Utc::now().timestamp())
		.bind(updated_by)
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("group {id} not found")));
		}
		tracing::debug!(group_id = id, "group updated");
		Ok(())
	}

	/// Delete a group. Its memberships and access grants cascade.
	///
	/// # Errors
	/// `DbError::NotFound` when no group exists with this id.
	#[tracing::instrument(skip(self), fields(group_id = %id))]
	pub async fn delete_group(&self, id: i64) -> Result<(), DbError> {
		let result = sqlx::query("DELETE FROM groups WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("group {id} not found")));
		}
		tracing::info!(group_id = id, "group deleted");
		Ok(())
	}
}

pub(crate) fn parse_group_row(row: &SqliteRow) -> Result<Group, DbError> {
	let metadata_json: String = row.get("metadata");
	let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)?;

	Ok(Group {
		id: row.get("id"),
		name: row.get("name"),
		description: row.get("description"),
		metadata,
		created_at: row.get("created_at"),
		created_by: row.get("created_by"),
		updated_at: row.get("updated_at"),
		updated_by: row.get("updated_by"),
	})
}
