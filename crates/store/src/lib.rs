//! SQLite persistence for closed-position records.
//!
//! Prices and net profit are stored as the exchange's decimal strings, never
//! as floats, so nothing is lost between the exchange report and the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use common::{DatabaseService, Error, OrderSide, Position, Result};

/// Closed-position store backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        info!(database_url, "position store ready");
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseService for SqliteStore {
    /// Insert a terminal record. Re-inserting the same id is a no-op, so a
    /// retried persist after a partial failure cannot duplicate the row.
    async fn insert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, symbol, open_price, close_price, hold_side,
                 open_date, close_date, net_profit, strategy_params)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&position.id)
        .bind(&position.symbol)
        .bind(&position.open_price)
        .bind(&position.close_price)
        .bind(position.hold_side.to_string())
        .bind(position.open_date.to_rfc3339())
        .bind(position.close_date.to_rfc3339())
        .bind(&position.net_profit)
        .bind(&position.strategy_params)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_all_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, open_price, close_price, hold_side,
                   open_date, close_date, net_profit, strategy_params
            FROM positions
            ORDER BY close_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_position).collect()
    }
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let hold_side = match row.get::<String, _>("hold_side").as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        other => {
            return Err(Error::Other(format!(
                "corrupt hold_side '{other}' in positions table"
            )))
        }
    };
    Ok(Position {
        id: row.get("id"),
        symbol: row.get("symbol"),
        open_price: row.get("open_price"),
        close_price: row.get("close_price"),
        hold_side,
        open_date: parse_date(&row.get::<String, _>("open_date"))?,
        close_date: parse_date(&row.get::<String, _>("close_date"))?,
        net_profit: row.get("net_profit"),
        strategy_params: row.get("strategy_params"),
    })
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("corrupt date '{value}' in positions table: {e}")))
}
