use futures_util::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::time::Duration;
use tracing::{error, info};

use crate::models::{AccessRole, User};
use crate::services::access_resolver::{AccessResolver, ResolverError};

/// Sessions joined to their user, only while the session is still valid
const RESOLVE_USER_SQL: &str = r#"
    SELECT u.id, u.name
    FROM sessions s
        JOIN users u ON u.id = s.user_id
    WHERE
        s.token = $1
        AND s.expires_at > NOW()
"#;

/// The project owner always holds `owner`, everyone else needs a collaborator row
const RESOLVE_ROLE_SQL: &str = r#"
    SELECT
        CASE
            WHEN p.owner_id = $2 THEN 'owner'
            ELSE pc.role
        END AS role
    FROM projects p
        LEFT JOIN project_collaborators pc
            ON pc.project_id = p.id AND pc.user_id = $2
    WHERE p.id = $1
"#;

/// Access store backed by the sessions/projects/collaborators tables
pub struct DbAccess {
    pool: PgPool,
}

impl DbAccess {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to access store...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            // Admission waits on this, fail fast when the store is gone
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Access store connection pool created successfully");

        Ok(Self { pool })
    }

    /// Look up the user behind a session token
    ///
    /// # Returns
    /// * `Ok(None)` - token unknown or expired
    pub async fn find_session_user(&self, token: &str) -> Result<Option<User>, SqlxError> {
        sqlx::query_as::<_, User>(RESOLVE_USER_SQL)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    /// Look up a user's role on a project
    pub async fn find_project_role(&self, user_id: &str, project_id: &str) -> Result<AccessRole, SqlxError> {
        let role: Option<Option<String>> = sqlx::query_scalar(RESOLVE_ROLE_SQL)
            .bind(project_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(role
            .flatten()
            .map(|r| AccessRole::from_db(&r))
            .unwrap_or(AccessRole::None))
    }
}

impl AccessResolver for DbAccess {
    fn resolve_user<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Option<User>, ResolverError>> {
        Box::pin(async move {
            self.find_session_user(token).await.map_err(|e| {
                error!(
                    "Failed to resolve session: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                ResolverError::Unavailable(e.to_string())
            })
        })
    }

    fn resolve_role<'a>(&'a self, user: &'a User, project_id: &'a str) -> BoxFuture<'a, Result<AccessRole, ResolverError>> {
        Box::pin(async move {
            self.find_project_role(&user.id, project_id).await.map_err(|e| {
                error!("Failed to resolve role of {} on project {}: {}", user.id, project_id, e);
                ResolverError::Unavailable(e.to_string())
            })
        })
    }
}
