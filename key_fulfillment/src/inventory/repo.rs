//! Statements against `digital_keys`.
//!
//! Every status change is a conditioned `UPDATE ... WHERE status = ?`; callers
//! read the affected-row count to learn whether they won the race.

use diesel::prelude::*;
use diesel::{SqliteConnection, insert_into, update};

use crate::models::key::{DigitalKeyRow, NewDigitalKey};
use crate::schema::digital_keys::dsl as dk;

/// Identifies one unit of one order line.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'a> {
    pub order_id: &'a str,
    pub customer_id: &'a str,
    pub line_item_id: &'a str,
    pub unit: i32,
}

/// Live keys already bound to `slot`. More than one row means the slot index
/// was bypassed.
pub fn find_slot(conn: &mut SqliteConnection, slot: &Slot<'_>) -> QueryResult<Vec<DigitalKeyRow>> {
    dk::digital_keys
        .filter(dk::order_id.eq(slot.order_id))
        .filter(dk::line_item_id.eq(slot.line_item_id))
        .filter(dk::unit_index.eq(slot.unit))
        .filter(dk::deleted_at.is_null())
        .select(DigitalKeyRow::as_select())
        .load(conn)
}

/// Lowest-id available live key of the product, if any.
pub fn next_candidate(
    conn: &mut SqliteConnection,
    product: &str,
) -> QueryResult<Option<DigitalKeyRow>> {
    dk::digital_keys
        .filter(dk::product_id.eq(product))
        .filter(dk::status.eq("available"))
        .filter(dk::deleted_at.is_null())
        .order(dk::id.asc())
        .select(DigitalKeyRow::as_select())
        .first(conn)
        .optional()
}

/// available -> assigned. Returns 1 for the winner, 0 for a lost race.
pub fn cas_assign(
    conn: &mut SqliteConnection,
    key_id: i32,
    slot: &Slot<'_>,
    now: &str,
) -> QueryResult<usize> {
    update(dk::digital_keys)
        .filter(dk::id.eq(key_id))
        .filter(dk::status.eq("available"))
        .filter(dk::deleted_at.is_null())
        .set((
            dk::status.eq("assigned"),
            dk::order_id.eq(slot.order_id),
            dk::customer_id.eq(slot.customer_id),
            dk::line_item_id.eq(slot.line_item_id),
            dk::unit_index.eq(slot.unit),
            dk::assigned_at.eq(now),
            dk::updated_at.eq(now),
        ))
        .execute(conn)
}

/// assigned -> delivered.
pub fn cas_deliver(conn: &mut SqliteConnection, key_id: i32, now: &str) -> QueryResult<usize> {
    update(dk::digital_keys)
        .filter(dk::id.eq(key_id))
        .filter(dk::status.eq("assigned"))
        .filter(dk::deleted_at.is_null())
        .set((
            dk::status.eq("delivered"),
            dk::delivered_at.eq(now),
            dk::updated_at.eq(now),
        ))
        .execute(conn)
}

/// `observed` -> revoked, writing the merged metadata.
pub fn cas_revoke(
    conn: &mut SqliteConnection,
    key_id: i32,
    observed: &str,
    metadata: &str,
    now: &str,
) -> QueryResult<usize> {
    update(dk::digital_keys)
        .filter(dk::id.eq(key_id))
        .filter(dk::status.eq(observed))
        .filter(dk::deleted_at.is_null())
        .set((
            dk::status.eq("revoked"),
            dk::metadata.eq(metadata),
            dk::revoked_at.eq(now),
            dk::updated_at.eq(now),
        ))
        .execute(conn)
}

/// Inserts one key and returns the stored row.
pub fn insert_key(conn: &mut SqliteConnection, row: &NewDigitalKey<'_>) -> QueryResult<DigitalKeyRow> {
    insert_into(dk::digital_keys)
        .values(row)
        .returning(DigitalKeyRow::as_returning())
        .get_result(conn)
}

/// Inserts one key unless its code is already on file; returns rows written.
pub fn insert_key_if_new(conn: &mut SqliteConnection, row: &NewDigitalKey<'_>) -> QueryResult<usize> {
    insert_into(dk::digital_keys)
        .values(row)
        .on_conflict((dk::provider, dk::key_code))
        .do_nothing()
        .execute(conn)
}

pub fn find_by_id(conn: &mut SqliteConnection, key_id: i32) -> QueryResult<Option<DigitalKeyRow>> {
    dk::digital_keys
        .filter(dk::id.eq(key_id))
        .filter(dk::deleted_at.is_null())
        .select(DigitalKeyRow::as_select())
        .first(conn)
        .optional()
}

pub fn for_order(conn: &mut SqliteConnection, order: &str) -> QueryResult<Vec<DigitalKeyRow>> {
    dk::digital_keys
        .filter(dk::order_id.eq(order))
        .filter(dk::deleted_at.is_null())
        .order((dk::line_item_id.asc(), dk::unit_index.asc()))
        .select(DigitalKeyRow::as_select())
        .load(conn)
}

pub fn count_available(conn: &mut SqliteConnection, product: &str) -> QueryResult<i64> {
    dk::digital_keys
        .filter(dk::product_id.eq(product))
        .filter(dk::status.eq("available"))
        .filter(dk::deleted_at.is_null())
        .count()
        .get_result(conn)
}

/// Hides a key from every live query. Rows are never physically removed.
pub fn soft_delete(conn: &mut SqliteConnection, key_id: i32, now: &str) -> QueryResult<usize> {
    update(dk::digital_keys)
        .filter(dk::id.eq(key_id))
        .filter(dk::deleted_at.is_null())
        .set((dk::deleted_at.eq(now), dk::updated_at.eq(now)))
        .execute(conn)
}
