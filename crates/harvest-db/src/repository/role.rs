//! # Role Repository
//!
//! User role assignments. A user may hold several roles; `admin` implies
//! `staff`, which implies `viewer`.

use sqlx::SqlitePool;
use tracing::info;

use super::{generate_id, now};
use crate::error::{DbError, DbResult};
use harvest_core::{NewUserRole, Role, UserRoleAssignment};

#[derive(Debug, Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

impl RoleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RoleRepository { pool }
    }

    /// Grants a role. Granting a role the user already holds is a duplicate.
    pub async fn assign(&self, input: &NewUserRole) -> DbResult<UserRoleAssignment> {
        input.validate()?;

        let id = generate_id();
        let user_id = input.user_id.trim();
        sqlx::query("INSERT INTO user_roles (id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user_id)
            .bind(input.role)
            .bind(now())
            .execute(&self.pool)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => {
                    DbError::duplicate("role", format!("{user_id}/{}", input.role))
                }
                other => other,
            })?;

        info!(user_id = %user_id, role = %input.role, "Role assigned");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> DbResult<UserRoleAssignment> {
        sqlx::query_as::<_, UserRoleAssignment>(
            "SELECT id, user_id, role, created_at FROM user_roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Role assignment", id))
    }

    pub async fn revoke(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Role assignment", id));
        }

        info!(assignment_id = %id, "Role revoked");
        Ok(())
    }

    pub async fn list(&self) -> DbResult<Vec<UserRoleAssignment>> {
        let roles = sqlx::query_as::<_, UserRoleAssignment>(
            "SELECT id, user_id, role, created_at FROM user_roles ORDER BY user_id, role",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    pub async fn roles_for(&self, user_id: &str) -> DbResult<Vec<Role>> {
        let roles = sqlx::query_scalar::<_, Role>("SELECT role FROM user_roles WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    /// Whether the user holds `role` or a higher one.
    pub async fn has_role(&self, user_id: &str, role: Role) -> DbResult<bool> {
        let held = self.roles_for(user_id).await?;
        Ok(held.into_iter().any(|r| r >= role))
    }

    /// Number of admins; the API refuses to revoke the last one.
    pub async fn admin_count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_id) FROM user_roles WHERE role = 'admin'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
