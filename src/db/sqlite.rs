use crate::config::CarSeed;
use crate::db::models::{ConfigKey, DbCar, DbToken, NewToken};
use crate::db::schema::SQLITE_INIT;
use crate::error::FleetError;
use crate::fleet::car::FleetApiState;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

#[derive(Clone)]
pub struct CredentialsStorage {
    pool: SqlitePool,
}

impl CredentialsStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, FleetError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Single-connection in-memory database; every connection of a
    /// `sqlite::memory:` pool would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, FleetError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), FleetError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn list_tokens(&self) -> Result<Vec<DbToken>, FleetError> {
        let rows = sqlx::query(
            r#"SELECT id, access_token, refresh_token, id_token, expires_at, region,
               unauthorized_counter
               FROM fleet_tokens ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_token).collect()
    }

    /// The most recently expiring token, if any.
    pub async fn latest_token(&self) -> Result<Option<DbToken>, FleetError> {
        let tokens = self.list_tokens().await?;
        Ok(tokens.into_iter().max_by_key(|t| t.expires_at))
    }

    /// Delete every stored token and insert `token` in one transaction.
    pub async fn replace_tokens(&self, token: NewToken) -> Result<i64, FleetError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fleet_tokens")
            .execute(&mut *tx)
            .await?;
        let rec: (i64,) = sqlx::query_as(
            r#"INSERT INTO fleet_tokens (
                access_token, refresh_token, id_token, expires_at, region, unauthorized_counter
            ) VALUES (?, ?, ?, ?, ?, 0)
            RETURNING id"#,
        )
        .bind(token.access_token)
        .bind(token.refresh_token)
        .bind(token.id_token)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.region.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rec.0)
    }

    /// Store the result of a successful refresh and reset the unauthorized counter.
    pub async fn update_refreshed(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: &str,
        id_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        sqlx::query(
            r#"UPDATE fleet_tokens SET
                access_token = ?,
                refresh_token = ?,
                id_token = ?,
                expires_at = ?,
                unauthorized_counter = 0
              WHERE id = ?"#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(id_token)
        .bind(expires_at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically bump the unauthorized counter. Returns the new value, `None`
    /// when the token row no longer exists.
    pub async fn increment_unauthorized(&self, id: i64) -> Result<Option<i64>, FleetError> {
        let rec: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE fleet_tokens SET unauthorized_counter = unauthorized_counter + 1
               WHERE id = ? RETURNING unauthorized_counter"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec.map(|r| r.0))
    }

    pub async fn get_config(&self, key: ConfigKey) -> Result<Option<String>, FleetError> {
        let rec: Option<(String,)> =
            sqlx::query_as("SELECT value FROM configurations WHERE key = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(rec.map(|r| r.0))
    }

    pub async fn has_config(&self, key: ConfigKey) -> Result<bool, FleetError> {
        Ok(self.get_config(key).await?.is_some())
    }

    pub async fn set_config(&self, key: ConfigKey, value: &str) -> Result<(), FleetError> {
        sqlx::query(
            r#"INSERT INTO configurations (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the flag only if absent. Returns whether a row was written.
    pub async fn insert_config_if_absent(
        &self,
        key: ConfigKey,
        value: &str,
    ) -> Result<bool, FleetError> {
        let res = sqlx::query("INSERT OR IGNORE INTO configurations (key, value) VALUES (?, ?)")
            .bind(key.as_str())
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete_config(&self, key: ConfigKey) -> Result<(), FleetError> {
        sqlx::query("DELETE FROM configurations WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_cars(&self) -> Result<Vec<DbCar>, FleetError> {
        let rows = sqlx::query(
            r#"SELECT id, vin, name, fleet_api_state, minimum_soc, priority, should_be_managed
               FROM cars ORDER BY priority, id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_car).collect()
    }

    /// Merge a configured car into the table; authorization health is left untouched.
    pub async fn upsert_car(&self, seed: &CarSeed) -> Result<(), FleetError> {
        sqlx::query(
            r#"INSERT INTO cars (id, vin, name, minimum_soc, priority, should_be_managed)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   vin = excluded.vin,
                   name = excluded.name,
                   minimum_soc = excluded.minimum_soc,
                   priority = excluded.priority,
                   should_be_managed = excluded.should_be_managed"#,
        )
        .bind(seed.id)
        .bind(seed.vin.as_deref())
        .bind(seed.name.as_deref())
        .bind(seed.minimum_soc)
        .bind(seed.priority)
        .bind(seed.should_be_managed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_fleet_api_state(
        &self,
        car_id: i64,
        state: FleetApiState,
    ) -> Result<(), FleetError> {
        sqlx::query("UPDATE cars SET fleet_api_state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(car_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_minimum_soc(&self, car_id: i64, minimum_soc: i64) -> Result<(), FleetError> {
        sqlx::query("UPDATE cars SET minimum_soc = ? WHERE id = ?")
            .bind(minimum_soc)
            .bind(car_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_car(&self, car_id: i64) -> Result<Option<DbCar>, FleetError> {
        let row = sqlx::query(
            r#"SELECT id, vin, name, fleet_api_state, minimum_soc, priority, should_be_managed
               FROM cars WHERE id = ?"#,
        )
        .bind(car_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_car).transpose()
    }

    fn row_to_token(row: SqliteRow) -> Result<DbToken, FleetError> {
        let id: i64 = row.try_get("id")?;
        let access_token: String = row.try_get("access_token")?;
        let refresh_token: String = row.try_get("refresh_token")?;
        let id_token: Option<String> = row.try_get("id_token")?;
        let expires_str: String = row.try_get("expires_at")?;
        let region: String = row.try_get("region")?;
        let unauthorized_counter: i64 = row.try_get("unauthorized_counter")?;

        let expires_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&expires_str)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
            .with_timezone(&Utc);

        Ok(DbToken {
            id,
            access_token,
            refresh_token,
            id_token,
            expires_at,
            region,
            unauthorized_counter,
        })
    }

    fn row_to_car(row: SqliteRow) -> Result<DbCar, FleetError> {
        let id: i64 = row.try_get("id")?;
        let vin: Option<String> = row.try_get("vin")?;
        let name: Option<String> = row.try_get("name")?;
        let state_str: String = row.try_get("fleet_api_state")?;
        let minimum_soc: i64 = row.try_get("minimum_soc")?;
        let priority: i64 = row.try_get("priority")?;
        let managed_i: i64 = row.try_get("should_be_managed")?;

        Ok(DbCar {
            id,
            vin,
            name,
            fleet_api_state: FleetApiState::from_db(&state_str),
            minimum_soc,
            priority,
            should_be_managed: managed_i != 0,
        })
    }
}
