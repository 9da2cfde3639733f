//! SKU orders and their line items (`sku_order`, `sku_order_items`).

use rusqlite::{Connection, OptionalExtension, Row};
use tally_types::sku::{SkuOrder, SkuOrderItem, SkuOrderStatus};

use crate::migrations::Migration;
use crate::{enum_column, require, text_column, timestamp_column, DbError, Result};

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    version: 19,
    table: "sku_order",
    sql: "DROP TABLE IF EXISTS sku_order;
          CREATE TABLE sku_order (order_id TEXT NOT NULL,
            total_amount DOUBLE,
            merchant_id TEXT,
            location TEXT,
            status INTEGER NOT NULL DEFAULT 0,
            contribution_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (order_id)
          );
          DROP TABLE IF EXISTS sku_order_items;
          CREATE TABLE sku_order_items (order_item_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            sku TEXT,
            quantity INTEGER,
            price DOUBLE,
            name TEXT,
            description TEXT,
            type INTEGER,
            expires_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT sku_order_items_unique
              UNIQUE (order_item_id,order_id)
          );
          CREATE INDEX sku_order_items_order_id_index
            ON sku_order_items (order_id);
          CREATE INDEX sku_order_items_order_item_id_index
            ON sku_order_items (order_item_id);",
}];

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sku_order (order_id TEXT NOT NULL,
            total_amount DOUBLE,
            merchant_id TEXT,
            location TEXT,
            status INTEGER NOT NULL DEFAULT 0,
            contribution_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (order_id)
        );
        CREATE TABLE IF NOT EXISTS sku_order_items (order_item_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            sku TEXT,
            quantity INTEGER,
            price DOUBLE,
            name TEXT,
            description TEXT,
            type INTEGER,
            expires_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT sku_order_items_unique
              UNIQUE (order_item_id,order_id)
        );
        CREATE INDEX IF NOT EXISTS sku_order_items_order_id_index
          ON sku_order_items (order_id);
        CREATE INDEX IF NOT EXISTS sku_order_items_order_item_id_index
          ON sku_order_items (order_item_id);",
    )?;
    Ok(())
}

const SELECT_ORDER: &str = "SELECT order_id, total_amount, merchant_id, location, status,
        contribution_id, created_at
     FROM sku_order";

fn order_row(row: &Row<'_>) -> rusqlite::Result<SkuOrder> {
    Ok(SkuOrder {
        order_id: row.get(0)?,
        total_amount: row.get::<_, Option<f64>>(1)?.unwrap_or_default(),
        merchant_id: text_column(row, 2)?,
        location: text_column(row, 3)?,
        status: enum_column(row, 4)?,
        contribution_id: text_column(row, 5)?,
        created_at: timestamp_column(row, 6)?,
        items: Vec::new(),
    })
}

fn item_row(row: &Row<'_>) -> rusqlite::Result<SkuOrderItem> {
    Ok(SkuOrderItem {
        order_item_id: row.get(0)?,
        order_id: row.get(1)?,
        sku: text_column(row, 2)?,
        quantity: row.get::<_, Option<u32>>(3)?.unwrap_or_default(),
        price: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
        name: text_column(row, 5)?,
        description: text_column(row, 6)?,
        item_type: match row.get::<_, Option<i32>>(7)? {
            Some(_) => enum_column(row, 7)?,
            None => Default::default(),
        },
        expires_at: timestamp_column(row, 8)?,
    })
}

/// Insert or replace an order together with its items.
pub fn save_sku_order(conn: &Connection, order: &SkuOrder) -> Result<()> {
    require(&order.order_id, "order id")?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO sku_order (order_id, total_amount, merchant_id, location,
           status, contribution_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            order.order_id,
            order.total_amount,
            order.merchant_id,
            order.location,
            order.status.as_i32(),
            order.contribution_id,
            order.created_at as i64,
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO sku_order_items (order_item_id, order_id, sku, quantity,
               price, name, description, type, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for item in &order.items {
            require(&item.order_item_id, "order item id")?;
            stmt.execute(rusqlite::params![
                item.order_item_id,
                order.order_id,
                item.sku,
                item.quantity,
                item.price,
                item.name,
                item.description,
                item.item_type.as_i32(),
                item.expires_at as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn with_items(conn: &Connection, order: Option<SkuOrder>) -> Result<Option<SkuOrder>> {
    let Some(mut order) = order else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT order_item_id, order_id, sku, quantity, price, name, description, type,
           expires_at
         FROM sku_order_items WHERE order_id = ?1 ORDER BY order_item_id",
    )?;
    order.items = stmt
        .query_map([&order.order_id], item_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(order))
}

pub fn get_sku_order(conn: &Connection, order_id: &str) -> Result<Option<SkuOrder>> {
    let order = conn
        .query_row(
            &format!("{SELECT_ORDER} WHERE order_id = ?1"),
            [order_id],
            order_row,
        )
        .optional()?;
    with_items(conn, order)
}

pub fn get_sku_order_by_contribution_id(
    conn: &Connection,
    contribution_id: &str,
) -> Result<Option<SkuOrder>> {
    require(contribution_id, "contribution id")?;
    let order = conn
        .query_row(
            &format!("{SELECT_ORDER} WHERE contribution_id = ?1 ORDER BY created_at DESC LIMIT 1"),
            [contribution_id],
            order_row,
        )
        .optional()?;
    with_items(conn, order)
}

pub fn update_sku_order_status(conn: &Connection, order_id: &str, status: SkuOrderStatus) -> Result<()> {
    let updated = conn.execute(
        "UPDATE sku_order SET status = ?1 WHERE order_id = ?2",
        rusqlite::params![status.as_i32(), order_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("sku order {order_id}")));
    }
    Ok(())
}

/// Link an order to the contribution that pays for it.
pub fn save_contribution_id_for_sku_order(
    conn: &Connection,
    order_id: &str,
    contribution_id: &str,
) -> Result<()> {
    require(contribution_id, "contribution id")?;
    let updated = conn.execute(
        "UPDATE sku_order SET contribution_id = ?1 WHERE order_id = ?2",
        rusqlite::params![contribution_id, order_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("sku order {order_id}")));
    }
    Ok(())
}
