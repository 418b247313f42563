use bytes::Bytes;
use chrono::{DateTime, Utc};
use rbaskets_core::responses::{log_rejected_key, validate_method};
use rbaskets_core::token::tokens_match;
use rbaskets_core::{
    AppError, Basket, BasketConfig, Headers, PageRequest, RequestRecord, RequestsPage,
    RequestsQueryPage, ResponseConfig, SearchScope,
};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Pool, Postgres};

use crate::database::sql_count;

/// PostgreSQL-backed handle to a single basket.
///
/// Mutations run in one transaction that first locks the basket row with
/// `SELECT ... FOR UPDATE`, which serializes them per basket and turns a
/// deleted basket into [`AppError::BasketDeleted`].
#[derive(Clone)]
pub struct BasketRepository {
    pool: Pool<Postgres>,
    name: String,
}

impl BasketRepository {
    pub(crate) fn new(pool: PgPool, name: String) -> Self {
        Self { pool, name }
    }

    /// Lock the basket row for the rest of the transaction and return its capacity.
    async fn lock(&self, conn: &mut PgConnection) -> Result<i64, AppError> {
        let row: Option<(i32,)> =
            sqlx::query_as(r#"SELECT capacity FROM baskets WHERE name = $1 FOR UPDATE"#)
                .bind(&self.name)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(|(capacity,)| i64::from(capacity))
            .ok_or_else(|| AppError::BasketDeleted(self.name.clone()))
    }

    /// Delete every request older than the newest `capacity` ones.
    async fn trim(&self, conn: &mut PgConnection, capacity: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM requests
            WHERE basket_name = $1
              AND id <= (
                SELECT id FROM requests
                WHERE basket_name = $1
                ORDER BY id DESC
                OFFSET $2
                LIMIT 1
              )
            "#,
        )
        .bind(&self.name)
        .bind(capacity)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ConfigRow {
    capacity: i32,
    forward_url: Option<String>,
    proxy_response: bool,
    insecure_tls: bool,
    expand_path: bool,
}

impl From<ConfigRow> for BasketConfig {
    fn from(row: ConfigRow) -> Self {
        BasketConfig {
            capacity: row.capacity.max(0) as u32,
            forward_url: row.forward_url,
            proxy_response: row.proxy_response,
            insecure_tls: row.insecure_tls,
            expand_path: row.expand_path,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    method: String,
    path: String,
    query: String,
    headers: Json<Headers>,
    body: String,
    content_length: i64,
    received_at: DateTime<Utc>,
}

impl From<RequestRow> for RequestRecord {
    fn from(row: RequestRow) -> Self {
        RequestRecord {
            method: row.method,
            path: row.path,
            query: row.query,
            headers: row.headers.0,
            body: row.body,
            content_length: row.content_length.max(0) as u64,
            received_at: row.received_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResponseRow {
    status: i32,
    headers: Json<Headers>,
    body: String,
    is_template: bool,
}

impl From<ResponseRow> for ResponseConfig {
    fn from(row: ResponseRow) -> Self {
        ResponseConfig {
            status: u16::try_from(row.status).unwrap_or(500),
            headers: row.headers.0,
            body: row.body,
            is_template: row.is_template,
        }
    }
}

const BODY_MATCH: &str = "strpos(body, $2) > 0";
const QUERY_MATCH: &str = "strpos(query, $2) > 0";
const HEADERS_MATCH: &str = "EXISTS (\
    SELECT 1 FROM jsonb_each(headers) AS h(name, vals) \
    WHERE strpos(h.name, $2) > 0 \
       OR EXISTS (SELECT 1 FROM jsonb_array_elements_text(h.vals) AS v(val) WHERE strpos(v.val, $2) > 0))";

/// SQL condition matching `$2` inside the given scope of a `requests` row.
fn scope_predicate(scope: SearchScope) -> String {
    match scope {
        SearchScope::Any => format!("{BODY_MATCH} OR {HEADERS_MATCH} OR {QUERY_MATCH}"),
        SearchScope::Body => BODY_MATCH.to_string(),
        SearchScope::Headers => HEADERS_MATCH.to_string(),
        SearchScope::Query => QUERY_MATCH.to_string(),
    }
}

impl Basket for BasketRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn config(&self) -> Result<BasketConfig, AppError> {
        let row = sqlx::query_as::<_, ConfigRow>(
            r#"
            SELECT capacity, forward_url, proxy_response, insecure_tls, expand_path
            FROM baskets
            WHERE name = $1
            "#,
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(BasketConfig::from).unwrap_or_default())
    }

    async fn update(&self, config: BasketConfig) -> Result<(), AppError> {
        let config = config.validated()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.lock(&mut tx).await?;
        sqlx::query(
            r#"
            UPDATE baskets
            SET capacity = $2, forward_url = $3, proxy_response = $4, insecure_tls = $5, expand_path = $6
            WHERE name = $1
            "#,
        )
        .bind(&self.name)
        .bind(config.capacity as i32)
        .bind(&config.forward_url)
        .bind(config.proxy_response)
        .bind(config.insecure_tls)
        .bind(config.expand_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let evicted = self.trim(&mut tx, i64::from(config.capacity)).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(basket = %self.name, evicted, "Basket configuration updated");
        Ok(())
    }

    async fn authorize(&self, token: &str) -> Result<bool, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT auth_token FROM baskets WHERE name = $1"#)
                .bind(&self.name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.is_some_and(|(stored,)| tokens_match(token, &stored)))
    }

    async fn get_response(&self, method: &str) -> Result<Option<ResponseConfig>, AppError> {
        if validate_method(method).is_err() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, ResponseRow>(
            r#"
            SELECT status, headers, body, is_template
            FROM responses
            WHERE basket_name = $1 AND method = $2
            "#,
        )
        .bind(&self.name)
        .bind(method)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn set_response(&self, method: &str, response: ResponseConfig) -> Result<(), AppError> {
        if validate_method(method).is_err() {
            log_rejected_key(&self.name, method);
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            INSERT INTO responses (basket_name, method, status, headers, body, is_template)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE EXISTS (SELECT 1 FROM baskets WHERE name = $1)
            ON CONFLICT (basket_name, method) DO UPDATE
            SET status = EXCLUDED.status,
                headers = EXCLUDED.headers,
                body = EXCLUDED.body,
                is_template = EXCLUDED.is_template
            "#,
        )
        .bind(&self.name)
        .bind(method)
        .bind(i32::from(response.status))
        .bind(Json(&response.headers))
        .bind(&response.body)
        .bind(response.is_template)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::BasketDeleted(self.name.clone()));
        }
        Ok(())
    }

    async fn add(&self, request: &http::Request<Bytes>) -> Result<RequestRecord, AppError> {
        let record = RequestRecord::from_request(request);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let capacity = self.lock(&mut tx).await?;
        sqlx::query(
            r#"
            INSERT INTO requests (basket_name, method, path, query, headers, body, content_length, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&self.name)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.query)
        .bind(Json(&record.headers))
        .bind(&record.body)
        .bind(i64::try_from(record.content_length).unwrap_or(i64::MAX))
        .bind(record.received_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(r#"UPDATE baskets SET lifetime_count = lifetime_count + 1 WHERE name = $1"#)
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let evicted = self.trim(&mut tx, capacity).await?;
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(
            basket = %self.name,
            method = %record.method,
            evicted,
            "Request captured"
        );
        Ok(record)
    }

    async fn clear(&self) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.lock(&mut tx).await?;
        sqlx::query(r#"DELETE FROM requests WHERE basket_name = $1"#)
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        sqlx::query(r#"UPDATE baskets SET lifetime_count = 0 WHERE name = $1"#)
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn size(&self) -> Result<usize, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM requests WHERE basket_name = $1"#)
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count as usize)
    }

    async fn get_requests(&self, max: usize, skip: usize) -> Result<RequestsPage, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // counters and page must come from the same snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let lifetime: Option<(i64,)> =
            sqlx::query_as(r#"SELECT lifetime_count FROM baskets WHERE name = $1"#)
                .bind(&self.name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        let Some((lifetime,)) = lifetime else {
            return Ok(RequestsPage::default());
        };

        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM requests WHERE basket_name = $1"#)
                .bind(&self.name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let rows = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT method, path, query, headers, body, content_length, received_at
            FROM requests
            WHERE basket_name = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&self.name)
        .bind(sql_count(max))
        .bind(sql_count(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let requests: Vec<RequestRecord> = rows.into_iter().map(Into::into).collect();
        let count = count as usize;
        let has_more = PageRequest::new(max, skip).has_more(requests.len(), count);
        Ok(RequestsPage {
            requests,
            count,
            total_count: lifetime.max(0) as usize,
            has_more,
        })
    }

    async fn find_requests(
        &self,
        query: &str,
        scope: SearchScope,
        max: usize,
        skip: usize,
    ) -> Result<RequestsQueryPage, AppError> {
        let sql = format!(
            r#"
            SELECT method, path, query, headers, body, content_length, received_at
            FROM requests
            WHERE basket_name = $1 AND ({})
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#,
            scope_predicate(scope)
        );

        // one extra row tells whether matches continue past this page
        let mut rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(&self.name)
            .bind(query)
            .bind(sql_count(max.saturating_add(1)))
            .bind(sql_count(skip))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let has_more = rows.len() > max;
        rows.truncate(max);
        Ok(RequestsQueryPage {
            requests: rows.into_iter().map(Into::into).collect(),
            has_more,
        })
    }
}
