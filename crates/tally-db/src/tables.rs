//! Per-entity table modules.
//!
//! Each module owns its tables: the current `CREATE TABLE` statements, the
//! migration steps that produced them, and synchronous query functions over
//! a borrowed [`rusqlite::Connection`].

pub mod activity_info;
pub mod balance_report;
pub mod contribution_info;
pub mod contribution_queue;
pub mod creds_batch;
pub mod event_log;
pub mod external_transaction;
pub mod promotion;
pub mod publisher_info;
pub mod recurring_tip;
pub mod server_publisher_info;
pub mod sku_order;
pub mod sku_transaction;
pub mod unblinded_token;

use rusqlite::Connection;

use crate::migrations::Migration;
use crate::Result;

/// Migration steps of every table, in registry order.
///
/// Within one version, steps run in this order. `creds_batch` reads
/// `promotion_creds` before `promotion` drops it, and `unblinded_tokens`
/// reads both afterwards.
pub(crate) const MIGRATIONS: &[&[Migration]] = &[
    publisher_info::MIGRATIONS,
    activity_info::MIGRATIONS,
    server_publisher_info::MIGRATIONS,
    recurring_tip::MIGRATIONS,
    contribution_info::MIGRATIONS,
    contribution_queue::MIGRATIONS,
    creds_batch::MIGRATIONS,
    promotion::MIGRATIONS,
    unblinded_token::MIGRATIONS,
    sku_order::MIGRATIONS,
    sku_transaction::MIGRATIONS,
    balance_report::MIGRATIONS,
    event_log::MIGRATIONS,
    external_transaction::MIGRATIONS,
];

/// Current-schema constructors, in registry order.
pub(crate) const CREATE_TABLES: &[fn(&Connection) -> Result<()>] = &[
    publisher_info::create_table,
    activity_info::create_table,
    server_publisher_info::create_table,
    recurring_tip::create_table,
    contribution_info::create_table,
    contribution_queue::create_table,
    creds_batch::create_table,
    promotion::create_table,
    unblinded_token::create_table,
    sku_order::create_table,
    sku_transaction::create_table,
    balance_report::create_table,
    event_log::create_table,
    external_transaction::create_table,
];
