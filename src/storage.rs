//! SQLite storage layer for ForHealth.
//!
//! Foods and food records are kept as JSON documents next to a handful of
//! indexed columns used for lookups:
//!
//! - `foods`: owner, name, brand, barcode and the external id/code, plus the
//!   serialized [`StandardFoodRecord`]
//! - `food_records`: owner, food id and time, plus the serialized
//!   [`FoodRecord`]

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::model::{FoodRecord, PUBLIC_OWNER, StandardFoodRecord, StoredFood};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:forhealth.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database sees its own empty
        // database, so those get exactly one long-lived connection.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS foods (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_by TEXT NOT NULL,
                name TEXT NOT NULL,
                brand TEXT,
                barcode TEXT,
                external_id INTEGER,
                external_code TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_foods_barcode ON foods(barcode)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_foods_external ON foods(external_id, external_code)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS food_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                food_id INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for daily summaries by owner
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_food_records_owner_ts
            ON food_records(owner, recorded_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a food owned by `created_by` and return its id.
    pub async fn insert_food(
        &self,
        created_by: &str,
        food: &StandardFoodRecord,
    ) -> anyhow::Result<i64> {
        let now = Utc::now().timestamp();
        let document = serde_json::to_string(food)?;

        let result = sqlx::query(
            r#"
            INSERT INTO foods
                (created_by, name, brand, barcode, external_id, external_code,
                 created_at, updated_at, document)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(created_by)
        .bind(&food.name)
        .bind(&food.brand)
        .bind(&food.barcode)
        .bind(food.external_id)
        .bind(&food.external_code)
        .bind(now)
        .bind(now)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Cache an external food, updating the existing entry if one matches.
    ///
    /// An entry matches on external id first, then external code, then
    /// barcode. New entries are public.
    pub async fn upsert_external_food(&self, food: &StandardFoodRecord) -> anyhow::Result<i64> {
        let Some(id) = self.find_external_match(food).await? else {
            return self.insert_food(PUBLIC_OWNER, food).await;
        };

        let document = serde_json::to_string(food)?;
        sqlx::query(
            r#"
            UPDATE foods
            SET name = ?, brand = ?, barcode = ?, external_id = ?, external_code = ?,
                updated_at = ?, document = ?
            WHERE id = ?
            "#,
        )
        .bind(&food.name)
        .bind(&food.brand)
        .bind(&food.barcode)
        .bind(food.external_id)
        .bind(&food.external_code)
        .bind(Utc::now().timestamp())
        .bind(document)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_external_match(&self, food: &StandardFoodRecord) -> anyhow::Result<Option<i64>> {
        if let Some(external_id) = food.external_id {
            let id = self
                .first_id("SELECT id FROM foods WHERE external_id = ? ORDER BY id LIMIT 1", external_id)
                .await?;
            if id.is_some() {
                return Ok(id);
            }
        }

        if let Some(code) = &food.external_code {
            let id = self
                .first_id("SELECT id FROM foods WHERE external_code = ? ORDER BY id LIMIT 1", code.as_str())
                .await?;
            if id.is_some() {
                return Ok(id);
            }
        }

        if let Some(barcode) = &food.barcode {
            return self
                .first_id("SELECT id FROM foods WHERE barcode = ? ORDER BY id LIMIT 1", barcode.as_str())
                .await;
        }

        Ok(None)
    }

    async fn first_id<'q, T>(&self, sql: &'q str, value: T) -> anyhow::Result<Option<i64>>
    where
        T: 'q + Send + sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        let row = sqlx::query(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Get a food by its local id.
    pub async fn get_food(&self, id: i64) -> anyhow::Result<Option<StoredFood>> {
        let row = sqlx::query("SELECT id, created_by, document FROM foods WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(stored_food_from_row).transpose()
    }

    /// Most recently updated food carrying `barcode`.
    pub async fn find_by_barcode(&self, barcode: &str) -> anyhow::Result<Option<StoredFood>> {
        let row = sqlx::query(
            r#"
            SELECT id, created_by, document
            FROM foods
            WHERE barcode = ?
            ORDER BY updated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stored_food_from_row).transpose()
    }

    /// Search foods visible to `owner` by name or brand.
    ///
    /// # Arguments
    ///
    /// * `keyword` - Substring to match (case-insensitive); `None` lists everything
    /// * `owner` - Whose private foods to include; public foods are always included
    /// * `limit` - Maximum number of results
    ///
    /// # Returns
    ///
    /// The owner's own foods first, then public ones, newest first within each group.
    pub async fn search_foods(
        &self,
        keyword: Option<&str>,
        owner: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<Vec<StoredFood>> {
        let pattern = keyword
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", escape_like(&k.to_lowercase())));
        let owner = owner.unwrap_or(PUBLIC_OWNER);

        let rows = sqlx::query(
            r#"
            SELECT id, created_by, document
            FROM foods
            WHERE (created_by = ? OR created_by = ?)
              AND (? IS NULL
                   OR lower(name) LIKE ? ESCAPE '\'
                   OR lower(COALESCE(brand, '')) LIKE ? ESCAPE '\')
            ORDER BY CASE WHEN created_by = ? THEN 0 ELSE 1 END,
                     created_at DESC,
                     id DESC
            LIMIT ?
            "#,
        )
        .bind(owner)
        .bind(PUBLIC_OWNER)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(owner)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_food_from_row).collect()
    }

    /// Insert a food record and return its id.
    pub async fn insert_food_record(&self, record: &FoodRecord) -> anyhow::Result<i64> {
        let document = serde_json::to_string(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO food_records (owner, food_id, recorded_at, document)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.owner)
        .bind(record.food_id)
        .bind(record.recorded_at.timestamp())
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Records of `owner` with `start <= recorded_at < end`, oldest first.
    pub async fn records_between(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<FoodRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document
            FROM food_records
            WHERE owner = ? AND recorded_at >= ? AND recorded_at < ?
            ORDER BY recorded_at, id
            "#,
        )
        .bind(owner)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let document: String = row.get("document");
                let mut record: FoodRecord = serde_json::from_str(&document)?;
                record.id = Some(row.get("id"));
                Ok(record)
            })
            .collect()
    }
}

fn stored_food_from_row(row: &SqliteRow) -> anyhow::Result<StoredFood> {
    let document: String = row.get("document");
    Ok(StoredFood {
        id: row.get("id"),
        created_by: row.get("created_by"),
        food: serde_json::from_str(&document)?,
    })
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
