use rbaskets_core::models::validate_basket_name;
use rbaskets_core::token::generate_auth;
use rbaskets_core::{AppError, Auth, BasketConfig, BasketNamesPage, BasketsDatabase, PageRequest};
use sqlx::{PgPool, Postgres, Transaction};
use sqlx::postgres::PgPoolOptions;

use crate::basket_repository::BasketRepository;
use crate::config::DatabaseConfig;

/// Central database facade. Owns the connection pool, runs migrations,
/// and vends basket handles.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to basket database"
        );
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Clamp a pagination parameter into a SQL `BIGINT`.
pub(crate) fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl BasketsDatabase for Database {
    type Basket = BasketRepository;

    async fn create(&self, name: &str, config: BasketConfig) -> Result<Auth, AppError> {
        validate_basket_name(name)?;
        let config = config.validated()?;
        let auth = generate_auth();

        // The primary key makes check-then-insert atomic across callers.
        let result = sqlx::query(
            r#"
            INSERT INTO baskets (name, capacity, forward_url, proxy_response, insecure_tls, expand_path, auth_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(config.capacity as i32)
        .bind(&config.forward_url)
        .bind(config.proxy_response)
        .bind(config.insecure_tls)
        .bind(config.expand_path)
        .bind(&auth.token)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NameConflict(name.to_string()));
        }

        tracing::info!(basket = %name, capacity = config.capacity, "Basket created");
        Ok(auth)
    }

    async fn get(&self, name: &str) -> Result<Option<BasketRepository>, AppError> {
        let row: Option<(String,)> = sqlx::query_as(r#"SELECT name FROM baskets WHERE name = $1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(name,)| BasketRepository::new(self.pool.clone(), name)))
    }

    async fn delete(&self, name: &str) -> Result<(), AppError> {
        // requests and responses go with the basket row (ON DELETE CASCADE)
        let result = sqlx::query(r#"DELETE FROM baskets WHERE name = $1"#)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() > 0 {
            tracing::info!(basket = %name, "Basket deleted");
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM baskets"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as usize)
    }

    async fn get_names(&self, max: usize, skip: usize) -> Result<BasketNamesPage, AppError> {
        let mut tx = self.snapshot().await?;

        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM baskets"#)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name FROM baskets
            ORDER BY name COLLATE "C"
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(sql_count(max))
        .bind(sql_count(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(names_page(names, count, max, skip))
    }

    async fn find_names(
        &self,
        query: &str,
        max: usize,
        skip: usize,
    ) -> Result<BasketNamesPage, AppError> {
        let mut tx = self.snapshot().await?;

        // strpos avoids LIKE wildcards (`_` is common in basket names)
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM baskets WHERE strpos(lower(name), lower($1)) > 0"#,
        )
        .bind(query)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name FROM baskets
            WHERE strpos(lower(name), lower($1)) > 0
            ORDER BY name COLLATE "C"
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(query)
        .bind(sql_count(max))
        .bind(sql_count(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(names_page(names, count, max, skip))
    }

    async fn release(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::info!("Basket database released");
        }
    }
}

impl Database {
    /// Read-only transaction whose statements all see one snapshot, so a
    /// count and the page selected next to it agree.
    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(tx)
    }
}

fn names_page(rows: Vec<(String,)>, count: i64, max: usize, skip: usize) -> BasketNamesPage {
    let names: Vec<String> = rows.into_iter().map(|(name,)| name).collect();
    let count = count as usize;
    let has_more = PageRequest::new(max, skip).has_more(names.len(), count);
    BasketNamesPage {
        names,
        count,
        has_more,
    }
}
