//! SQLite persistence for planner state.
//!
//! Each record is stored as its JSON form next to the columns used for
//! lookups and cascades:
//! - Accounts and their balance changes
//! - Setups (including soft-deleted ones)
//! - Positions with their steps and chase steps
//! - Key/value configs

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Account, AccountChange, ConfigEntry, Position, Setup};

/// Full planner state, also the JSON export format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub accounts: Vec<Account>,
    pub account_changes: Vec<AccountChange>,
    pub setups: Vec<Setup>,
    pub positions: Vec<Position>,
    pub configs: Vec<ConfigEntry>,
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database gets its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_changes (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS setups (
                id TEXT PRIMARY KEY,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                setup_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS configs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_account ON positions(account_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_setup ON positions(setup_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_account_changes_account ON account_changes(account_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Accounts ====================

    /// Save or update an account.
    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, data) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = datetime('now')
            "#,
        )
        .bind(&account.id)
        .bind(serde_json::to_string(account)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all accounts in creation order.
    pub async fn get_accounts(&self) -> Result<Vec<Account>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM accounts ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch accounts")?;

        decode_rows(rows)
    }

    /// Delete an account with its balance changes and positions.
    pub async fn delete_account(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM positions WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM account_changes WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("Failed to delete account")
    }

    // ==================== Account Changes ====================

    /// Record a deposit or withdrawal.
    pub async fn save_account_change(&self, change: &AccountChange) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_changes (id, account_id, created_at, data) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(&change.id)
        .bind(&change.account_id)
        .bind(change.created_at.timestamp_millis())
        .bind(serde_json::to_string(change)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get every balance change, oldest first.
    pub async fn get_account_changes(&self) -> Result<Vec<AccountChange>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM account_changes ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch account changes")?;

        decode_rows(rows)
    }

    // ==================== Setups ====================

    /// Save or update a setup.
    pub async fn save_setup(&self, setup: &Setup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO setups (id, is_deleted, data) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                is_deleted = excluded.is_deleted,
                data = excluded.data,
                updated_at = datetime('now')
            "#,
        )
        .bind(&setup.id)
        .bind(setup.is_deleted)
        .bind(serde_json::to_string(setup)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all setups, soft-deleted ones included.
    pub async fn get_setups(&self) -> Result<Vec<Setup>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM setups ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch setups")?;

        decode_rows(rows)
    }

    /// Remove a setup row.
    pub async fn delete_setup(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM setups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Positions ====================

    /// Save or update a position.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (id, account_id, setup_id, status, created_at, data)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                setup_id = excluded.setup_id,
                status = excluded.status,
                data = excluded.data,
                updated_at = datetime('now')
            "#,
        )
        .bind(&position.id)
        .bind(&position.account_id)
        .bind(&position.setup_id)
        .bind(position.status.as_str())
        .bind(position.created_at.timestamp_millis())
        .bind(serde_json::to_string(position)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all positions, oldest first.
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM positions ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch positions")?;

        decode_rows(rows)
    }

    /// Number of positions referencing a setup.
    pub async fn count_positions_for_setup(&self, setup_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM positions WHERE setup_id = ?")
            .bind(setup_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn delete_position(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Configs ====================

    /// Save or update a config value.
    pub async fn save_config(&self, entry: &ConfigEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO configs (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&entry.key)
        .bind(serde_json::to_string(&entry.value)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_configs(&self) -> Result<Vec<ConfigEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM configs ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch configs")?;

        rows.into_iter()
            .map(|(key, value)| {
                let value = serde_json::from_str(&value)
                    .with_context(|| format!("Invalid stored value for config {key}"))?;
                Ok(ConfigEntry::new(key, value))
            })
            .collect()
    }

    // ==================== Snapshot ====================

    /// Load everything.
    pub async fn load_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            accounts: self.get_accounts().await?,
            account_changes: self.get_account_changes().await?,
            setups: self.get_setups().await?,
            positions: self.get_positions().await?,
            configs: self.get_configs().await?,
        })
    }

    /// Replace all stored state with `snapshot` in one transaction.
    pub async fn replace_all(&self, snapshot: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["positions", "account_changes", "setups", "accounts", "configs"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        for account in &snapshot.accounts {
            sqlx::query("INSERT INTO accounts (id, data) VALUES (?, ?)")
                .bind(&account.id)
                .bind(serde_json::to_string(account)?)
                .execute(&mut *tx)
                .await?;
        }
        for change in &snapshot.account_changes {
            sqlx::query("INSERT INTO account_changes (id, account_id, created_at, data) VALUES (?, ?, ?, ?)")
                .bind(&change.id)
                .bind(&change.account_id)
                .bind(change.created_at.timestamp_millis())
                .bind(serde_json::to_string(change)?)
                .execute(&mut *tx)
                .await?;
        }
        for setup in &snapshot.setups {
            sqlx::query("INSERT INTO setups (id, is_deleted, data) VALUES (?, ?, ?)")
                .bind(&setup.id)
                .bind(setup.is_deleted)
                .bind(serde_json::to_string(setup)?)
                .execute(&mut *tx)
                .await?;
        }
        for position in &snapshot.positions {
            sqlx::query(
                "INSERT INTO positions (id, account_id, setup_id, status, created_at, data) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&position.id)
            .bind(&position.account_id)
            .bind(&position.setup_id)
            .bind(position.status.as_str())
            .bind(position.created_at.timestamp_millis())
            .bind(serde_json::to_string(position)?)
            .execute(&mut *tx)
            .await?;
        }
        for entry in &snapshot.configs {
            sqlx::query("INSERT INTO configs (key, value) VALUES (?, ?)")
                .bind(&entry.key)
                .bind(serde_json::to_string(&entry.value)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("Failed to replace planner state")
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<(String,)>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|(data,)| serde_json::from_str(&data).context("Invalid stored record"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountChangeType, Side};
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_position_round_trip() {
        let db = memory_db().await;
        let setup = Setup::uniform("Two", 2);
        let mut pos = Position::new("acc", "BTCUSDT", Side::Short);
        pos.apply_setup(&setup);
        pos.steps[0].price = dec!(100);
        pos.stop_loss_price = dec!(130);
        pos.recalculate(&setup, dec!(10000), None);

        db.save_position(&pos).await.unwrap();
        pos.risk_amount = dec!(250);
        db.save_position(&pos).await.unwrap();

        let stored = db.get_positions().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].risk_amount, dec!(250));
        assert_eq!(stored[0].steps, pos.steps);
        assert_eq!(db.count_positions_for_setup(&setup.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_account_cascades() {
        let db = memory_db().await;
        let keep = Account::new("Keep", dec!(500));
        let gone = Account::new("Gone", dec!(500));
        db.save_account(&keep).await.unwrap();
        db.save_account(&gone).await.unwrap();
        db.save_position(&Position::new(keep.id.clone(), "ETH", Side::Long)).await.unwrap();
        db.save_position(&Position::new(gone.id.clone(), "SOL", Side::Long)).await.unwrap();
        db.save_account_change(&AccountChange::new(gone.id.clone(), dec!(5), AccountChangeType::Deposit))
            .await
            .unwrap();

        db.delete_account(&gone.id).await.unwrap();

        let accounts = db.get_accounts().await.unwrap();
        assert_eq!(accounts, vec![keep.clone()]);
        let positions = db.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].account_id, keep.id);
        assert!(db.get_account_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_and_configs() {
        let db = memory_db().await;
        db.save_setup(&Setup::uniform("Old", 1)).await.unwrap();
        db.save_config(&ConfigEntry::new("theme", json!("dark"))).await.unwrap();

        let snapshot = Snapshot {
            accounts: vec![Account::default()],
            setups: vec![Setup::uniform("New", 3)],
            configs: vec![ConfigEntry::new("overview.history.perPage", json!(25))],
            ..Snapshot::default()
        };
        db.replace_all(&snapshot).await.unwrap();

        let loaded = db.load_snapshot().await.unwrap();
        assert_eq!(loaded, snapshot);
    }
}
