use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, CashFlowEntry, CashFlowKind, ExpenseBreakdown, ItemType, NewCashFlowEntry, NewSale, NewStockItem,
    SaleRecord, StockItem,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_system_setting(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM system_settings WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn put_system_setting(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO system_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_system_setting(&self, key: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM system_settings WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    pub fn insert_stock_item(&self, item: &NewStockItem) -> AppResult<StockItem> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let total_value = item.quantity * item.unit_cost;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stock_items (id, item_type, name, quantity, unit_cost, total_value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                item.item_type.as_str(),
                item.name,
                item.quantity,
                item.unit_cost,
                total_value,
                now.to_rfc3339(),
            ],
        )?;

        Ok(StockItem {
            id,
            item_type: item.item_type,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_cost: item.unit_cost,
            total_value,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_stock_quantity(&self, id: &str, quantity: f64) -> AppResult<Option<StockItem>> {
        {
            let conn = self.lock()?;
            let changed = conn.execute(
                "UPDATE stock_items
                 SET quantity = ?1, total_value = ?1 * unit_cost, updated_at = ?2
                 WHERE id = ?3",
                params![quantity, Utc::now().to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get_stock_item(id)
    }

    pub fn get_stock_item(&self, id: &str) -> AppResult<Option<StockItem>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, item_type, name, quantity, unit_cost, total_value, created_at, updated_at
             FROM stock_items WHERE id = ?1",
            [id],
            parse_stock_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_stock_items(&self, item_type: Option<ItemType>) -> AppResult<Vec<StockItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, item_type, name, quantity, unit_cost, total_value, created_at, updated_at
             FROM stock_items
             WHERE (?1 IS NULL OR item_type = ?1)
             ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([item_type.map(ItemType::as_str)], parse_stock_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn stock_value(&self, item_type: ItemType) -> AppResult<f64> {
        let conn = self.lock()?;
        let value: f64 = conn.query_row(
            "SELECT COALESCE(SUM(total_value), 0) FROM stock_items WHERE item_type = ?1",
            [item_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub fn stock_quantity(&self, item_type: ItemType) -> AppResult<f64> {
        let conn = self.lock()?;
        let value: f64 = conn.query_row(
            "SELECT COALESCE(SUM(quantity), 0) FROM stock_items WHERE item_type = ?1",
            [item_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub fn average_unit_cost(&self, item_type: ItemType) -> AppResult<Option<f64>> {
        let conn = self.lock()?;
        let (value, quantity): (f64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(total_value), 0), COALESCE(SUM(quantity), 0)
             FROM stock_items WHERE item_type = ?1",
            [item_type.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if quantity <= 0.0 {
            return Ok(None);
        }
        Ok(Some(value / quantity))
    }

    pub fn insert_sale(&self, sale: &NewSale) -> AppResult<SaleRecord> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sales (id, item_type, product_name, quantity, unit_price, unit_cost, sold_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                sale.item_type.as_str(),
                sale.product_name,
                sale.quantity,
                sale.unit_price,
                sale.unit_cost,
                now.to_rfc3339(),
            ],
        )?;

        Ok(SaleRecord {
            id,
            item_type: sale.item_type,
            product_name: sale.product_name.clone(),
            quantity: sale.quantity,
            unit_price: sale.unit_price,
            unit_cost: sale.unit_cost,
            sold_at: now,
        })
    }

    pub fn list_sales(&self, item_type: Option<ItemType>) -> AppResult<Vec<SaleRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, item_type, product_name, quantity, unit_price, unit_cost, sold_at
             FROM sales
             WHERE (?1 IS NULL OR item_type = ?1)
             ORDER BY sold_at DESC",
        )?;
        let sales = stmt
            .query_map([item_type.map(ItemType::as_str)], |row| {
                Ok(SaleRecord {
                    id: row.get(0)?,
                    item_type: parse_item_type(&row.get::<_, String>(1)?)?,
                    product_name: row.get(2)?,
                    quantity: row.get(3)?,
                    unit_price: row.get(4)?,
                    unit_cost: row.get(5)?,
                    sold_at: parse_time(&row.get::<_, String>(6)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sales)
    }

    pub fn average_unit_profit(&self, item_type: ItemType) -> AppResult<Option<f64>> {
        let conn = self.lock()?;
        let (profit, quantity): (f64, f64) = conn.query_row(
            "SELECT COALESCE(SUM((unit_price - unit_cost) * quantity), 0), COALESCE(SUM(quantity), 0)
             FROM sales WHERE item_type = ?1",
            [item_type.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if quantity <= 0.0 {
            return Ok(None);
        }
        Ok(Some(profit / quantity))
    }

    pub fn insert_cash_flow(&self, entry: &NewCashFlowEntry) -> AppResult<CashFlowEntry> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cash_flow_entries (id, kind, category, amount, description, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                entry.kind.as_str(),
                entry.category,
                entry.amount,
                entry.description,
                now.to_rfc3339(),
            ],
        )?;

        Ok(CashFlowEntry {
            id,
            kind: entry.kind,
            category: entry.category.clone(),
            amount: entry.amount,
            description: entry.description.clone(),
            occurred_at: now,
        })
    }

    pub fn list_cash_flow(&self) -> AppResult<Vec<CashFlowEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, category, amount, description, occurred_at
             FROM cash_flow_entries ORDER BY occurred_at DESC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CashFlowEntry {
                    id: row.get(0)?,
                    kind: parse_cash_flow_kind(&row.get::<_, String>(1)?)?,
                    category: row.get(2)?,
                    amount: row.get(3)?,
                    description: row.get(4)?,
                    occurred_at: parse_time(&row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn cash_flow_total(&self, kind: CashFlowKind) -> AppResult<f64> {
        let conn = self.lock()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM cash_flow_entries WHERE kind = ?1",
            [kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn expense_breakdown(&self) -> AppResult<ExpenseBreakdown> {
        let conn = self.lock()?;
        let breakdown = conn.query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN category = 'labor' THEN amount ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN category = 'production_loss' THEN amount ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN category NOT IN ('labor', 'production_loss') THEN amount ELSE 0 END), 0)
             FROM cash_flow_entries WHERE kind = 'expense'",
            [],
            |row| {
                Ok(ExpenseBreakdown {
                    labor: row.get(0)?,
                    production_losses: row.get(1)?,
                    other: row.get(2)?,
                })
            },
        )?;
        Ok(breakdown)
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

fn parse_stock_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockItem> {
    Ok(StockItem {
        id: row.get(0)?,
        item_type: parse_item_type(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        quantity: row.get(3)?,
        unit_cost: row.get(4)?,
        total_value: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_item_type(raw: &str) -> rusqlite::Result<ItemType> {
    ItemType::parse(raw).ok_or_else(|| invalid_column(format!("Unknown item type '{}'", raw)))
}

fn parse_cash_flow_kind(raw: &str) -> rusqlite::Result<CashFlowKind> {
    CashFlowKind::parse(raw).ok_or_else(|| invalid_column(format!("Unknown cash flow kind '{}'", raw)))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(error.to_string()))
}

fn invalid_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::models::{CashFlowKind, ItemType, NewCashFlowEntry, NewSale, NewStockItem};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn settings_are_seeded_and_merged() {
        let (_dir, db) = open();
        let settings = db.get_settings().expect("settings");
        assert_eq!(settings.checkpoint.auto_interval_secs, 300);
        assert_eq!(settings.checkpoint.debounce_ms, 2000);

        let updated = db
            .update_settings(serde_json::json!({ "checkpoint": { "debounceMs": 500 } }))
            .expect("update settings");
        assert_eq!(updated.checkpoint.debounce_ms, 500);
        assert_eq!(updated.checkpoint.auto_interval_secs, 300);
        assert_eq!(db.get_settings().expect("reload").checkpoint.debounce_ms, 500);
    }

    #[test]
    fn system_settings_upsert_and_delete() {
        let (_dir, db) = open();
        assert_eq!(db.get_system_setting("average_tire_cost").expect("get"), None);

        db.put_system_setting("average_tire_cost", "10.5").expect("put");
        db.put_system_setting("average_tire_cost", "12.25").expect("overwrite");
        assert_eq!(
            db.get_system_setting("average_tire_cost").expect("get").as_deref(),
            Some("12.25")
        );

        assert!(db.delete_system_setting("average_tire_cost").expect("delete"));
        assert!(!db.delete_system_setting("average_tire_cost").expect("delete again"));
    }

    #[test]
    fn stock_aggregates_are_quantity_weighted() {
        let (_dir, db) = open();
        assert_eq!(db.average_unit_cost(ItemType::Product).expect("empty avg"), None);

        db.insert_stock_item(&NewStockItem {
            item_type: ItemType::Product,
            name: "195/60 R15".to_string(),
            quantity: 10.0,
            unit_cost: 80.0,
        })
        .expect("insert");
        let second = db
            .insert_stock_item(&NewStockItem {
                item_type: ItemType::Product,
                name: "205/55 R16".to_string(),
                quantity: 30.0,
                unit_cost: 100.0,
            })
            .expect("insert");
        db.insert_stock_item(&NewStockItem {
            item_type: ItemType::Material,
            name: "tread rubber".to_string(),
            quantity: 5.0,
            unit_cost: 20.0,
        })
        .expect("insert");

        assert_eq!(db.stock_value(ItemType::Product).expect("value"), 3800.0);
        assert_eq!(db.stock_value(ItemType::Material).expect("value"), 100.0);
        assert_eq!(db.average_unit_cost(ItemType::Product).expect("avg"), Some(95.0));

        let updated = db
            .update_stock_quantity(&second.id, 10.0)
            .expect("update")
            .expect("item exists");
        assert_eq!(updated.total_value, 1000.0);
        assert_eq!(db.stock_quantity(ItemType::Product).expect("qty"), 20.0);
        assert!(db.update_stock_quantity("missing", 1.0).expect("update").is_none());
        assert_eq!(db.list_stock_items(Some(ItemType::Product)).expect("list").len(), 2);
        assert_eq!(db.list_stock_items(None).expect("list").len(), 3);
    }

    #[test]
    fn sales_profit_and_cash_flow_breakdown() {
        let (_dir, db) = open();
        db.insert_sale(&NewSale {
            item_type: ItemType::Product,
            product_name: "195/60 R15".to_string(),
            quantity: 2.0,
            unit_price: 150.0,
            unit_cost: 100.0,
        })
        .expect("sale");
        db.insert_sale(&NewSale {
            item_type: ItemType::Product,
            product_name: "205/55 R16".to_string(),
            quantity: 2.0,
            unit_price: 130.0,
            unit_cost: 100.0,
        })
        .expect("sale");
        assert_eq!(db.average_unit_profit(ItemType::Product).expect("profit"), Some(40.0));
        assert_eq!(db.average_unit_profit(ItemType::Resale).expect("profit"), None);
        assert_eq!(db.list_sales(Some(ItemType::Product)).expect("sales").len(), 2);

        for (kind, category, amount) in [
            (CashFlowKind::Income, "sales", 1000.0),
            (CashFlowKind::Expense, "labor", 200.0),
            (CashFlowKind::Expense, "production_loss", 50.0),
            (CashFlowKind::Expense, "energy", 75.0),
        ] {
            db.insert_cash_flow(&NewCashFlowEntry {
                kind,
                category: category.to_string(),
                amount,
                description: None,
            })
            .expect("cash flow");
        }

        assert_eq!(db.cash_flow_total(CashFlowKind::Income).expect("income"), 1000.0);
        assert_eq!(db.cash_flow_total(CashFlowKind::Expense).expect("expense"), 325.0);
        let breakdown = db.expense_breakdown().expect("breakdown");
        assert_eq!(breakdown.labor, 200.0);
        assert_eq!(breakdown.production_losses, 50.0);
        assert_eq!(breakdown.other, 75.0);
        assert_eq!(db.list_cash_flow().expect("list").len(), 4);
    }
}
