//! Durable request store.
//!
//! Thin query layer over the `requests` table. Every helper is generic over
//! [`ConnectionTrait`] so the same operations compose into transactions where
//! a status transition must commit atomically with its side effects.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, QueryOrder, QuerySelect};

use crate::entities::request::{self, RequestStatus};

/// Current timestamp in whole seconds.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Insert a bare `New` row; asset id and amount stay unset until admission
/// completes. Returns the new primary key.
pub async fn insert_new<C: ConnectionTrait>(
    conn: &C,
    wallet_id: &str,
    recipient_id: &str,
    invoice: &str,
    asset_group: &str,
) -> Result<i64, DbErr> {
    let row = request::ActiveModel {
        idx: sea_orm::ActiveValue::NotSet,
        timestamp: Set(current_timestamp()),
        status: Set(RequestStatus::New),
        wallet_id: Set(wallet_id.to_string()),
        recipient_id: Set(recipient_id.to_string()),
        invoice: Set(invoice.to_string()),
        asset_group: Set(asset_group.to_string()),
        asset_id: Set(None),
        amount: Set(None),
    };
    let result = request::Entity::insert(row).exec(conn).await?;
    Ok(result.last_insert_id)
}

/// Every row a requester holds for a group, any status, used for the
/// post-insert uniqueness re-read. Invoice is deliberately not part of the
/// filter: two racing admits with different invoices still collide here.
pub async fn find_for_group<C: ConnectionTrait>(
    conn: &C,
    wallet_id: &str,
    asset_group: &str,
) -> Result<Vec<request::Model>, DbErr> {
    request::Entity::find()
        .filter(request::Column::WalletId.eq(wallet_id))
        .filter(request::Column::AssetGroup.eq(asset_group))
        .order_by_asc(request::Column::Idx)
        .all(conn)
        .await
}

/// Drop abandoned `New` rows for a requester that are older than the grace
/// window. Returns the number of rows removed.
pub async fn sweep_stale_new<C: ConnectionTrait>(
    conn: &C,
    wallet_id: &str,
    older_than: i64,
) -> Result<u64, DbErr> {
    let result = request::Entity::delete_many()
        .filter(request::Column::Status.eq(RequestStatus::New))
        .filter(request::Column::WalletId.eq(wallet_id))
        .filter(request::Column::Timestamp.lt(older_than))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Count every request (any status) a requester has placed for a group.
pub async fn count_for_wallet_and_group<C: ConnectionTrait>(
    conn: &C,
    wallet_id: &str,
    asset_group: &str,
) -> Result<u64, DbErr> {
    request::Entity::find()
        .filter(request::Column::WalletId.eq(wallet_id))
        .filter(request::Column::AssetGroup.eq(asset_group))
        .count(conn)
        .await
}

/// Resolve a `New` row to its final admission state with asset and amount.
pub async fn assign_asset<C: ConnectionTrait>(
    conn: &C,
    idx: i64,
    asset_id: &str,
    amount: i64,
    status: RequestStatus,
) -> Result<(), DbErr> {
    assert!(
        matches!(status, RequestStatus::Pending | RequestStatus::Waiting),
        "Admission can only resolve to pending or waiting"
    );
    request::Entity::update_many()
        .col_expr(request::Column::Status, Expr::value(status))
        .col_expr(request::Column::AssetId, Expr::value(Some(asset_id)))
        .col_expr(request::Column::Amount, Expr::value(Some(amount)))
        .filter(request::Column::Idx.eq(idx))
        .exec(conn)
        .await?;
    Ok(())
}

/// All rows in the given status, oldest first by insertion order.
pub async fn by_status_oldest_first<C: ConnectionTrait>(
    conn: &C,
    status: RequestStatus,
) -> Result<Vec<request::Model>, DbErr> {
    request::Entity::find()
        .filter(request::Column::Status.eq(status))
        .order_by_asc(request::Column::Idx)
        .all(conn)
        .await
}

/// Pending rows oldest first, optionally narrowed to one asset, capped at
/// `limit`.
pub async fn pending_batch<C: ConnectionTrait>(
    conn: &C,
    asset_id: Option<&str>,
    limit: u64,
) -> Result<Vec<request::Model>, DbErr> {
    assert!(limit > 0, "Batch limit must be positive");
    let mut select = request::Entity::find()
        .filter(request::Column::Status.eq(RequestStatus::Pending))
        .order_by_asc(request::Column::Idx)
        .limit(limit);
    if let Some(asset_id) = asset_id {
        select = select.filter(request::Column::AssetId.eq(asset_id));
    }
    select.all(conn).await
}

/// `Waiting` rows for one asset, insertion order.
pub async fn waiting_for_asset<C: ConnectionTrait>(
    conn: &C,
    asset_id: &str,
) -> Result<Vec<request::Model>, DbErr> {
    request::Entity::find()
        .filter(request::Column::Status.eq(RequestStatus::Waiting))
        .filter(request::Column::AssetId.eq(asset_id))
        .order_by_asc(request::Column::Idx)
        .all(conn)
        .await
}

/// Bulk status transition by primary key set. Returns affected row count.
pub async fn set_status<C: ConnectionTrait>(
    conn: &C,
    idxs: &[i64],
    status: RequestStatus,
) -> Result<u64, DbErr> {
    if idxs.is_empty() {
        return Ok(0);
    }
    let result = request::Entity::update_many()
        .col_expr(request::Column::Status, Expr::value(status))
        .filter(request::Column::Idx.is_in(idxs.iter().copied()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Recovery step at the start of every scheduler tick: anything left in
/// `Processing` by a crashed or failed send goes back to `Pending`.
pub async fn reset_processing<C: ConnectionTrait>(conn: &C) -> Result<u64, DbErr> {
    let result = request::Entity::update_many()
        .col_expr(
            request::Column::Status,
            Expr::value(RequestStatus::Pending),
        )
        .filter(request::Column::Status.eq(RequestStatus::Processing))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Served rows ordered by requester, for the boot-time migration scan.
pub async fn served_by_wallet<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<request::Model>, DbErr> {
    request::Entity::find()
        .filter(request::Column::Status.eq(RequestStatus::Served))
        .order_by_asc(request::Column::WalletId)
        .order_by_asc(request::Column::Idx)
        .all(conn)
        .await
}

/// Non-served rows still referencing one of the given asset ids.
pub async fn in_flight_with_assets<C: ConnectionTrait>(
    conn: &C,
    asset_ids: &[String],
) -> Result<Vec<request::Model>, DbErr> {
    if asset_ids.is_empty() {
        return Ok(Vec::new());
    }
    request::Entity::find()
        .filter(request::Column::Status.ne(RequestStatus::Served))
        .filter(request::Column::AssetId.is_in(asset_ids.iter().cloned()))
        .order_by_asc(request::Column::Idx)
        .all(conn)
        .await
}

/// Re-point one in-flight row at a migrated asset id.
pub async fn rewrite_asset_id<C: ConnectionTrait>(
    conn: &C,
    idx: i64,
    new_asset_id: &str,
) -> Result<(), DbErr> {
    request::Entity::update_many()
        .col_expr(request::Column::AssetId, Expr::value(Some(new_asset_id)))
        .filter(request::Column::Idx.eq(idx))
        .exec(conn)
        .await?;
    Ok(())
}
