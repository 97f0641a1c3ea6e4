//! Request entity: one row per asset distribution request.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub idx: i64,
    /// Creation timestamp, seconds since the Unix epoch
    pub timestamp: i64,
    pub status: RequestStatus,
    /// Requester identity: hex digest of the client's key material
    #[sea_orm(column_type = "String(StringLen::N(256))")]
    pub wallet_id: String,
    /// Wallet-layer invoice recipient reference
    #[sea_orm(column_type = "String(StringLen::N(256))")]
    pub recipient_id: String,
    /// Raw invoice string, kept for later lookups and re-issue
    #[sea_orm(column_type = "String(StringLen::N(512))")]
    pub invoice: String,
    #[sea_orm(column_type = "String(StringLen::N(256))")]
    pub asset_group: String,
    /// NULL only while the request is still in status `New`
    #[sea_orm(column_type = "String(StringLen::N(256))", nullable)]
    pub asset_id: Option<String>,
    /// NULL only while the request is still in status `New`
    pub amount: Option<i64>,
}

/// Request lifecycle. Values are persisted as-is, so they must never be
/// renumbered. `Processing` may revert to `Pending` after a failed or
/// interrupted send, but `Served` and `Unmet` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "i16", db_type = "SmallInteger")]
pub enum RequestStatus {
    #[sea_orm(num_value = 10)]
    New,
    #[sea_orm(num_value = 20)]
    Pending,
    #[sea_orm(num_value = 25)]
    Waiting,
    #[sea_orm(num_value = 30)]
    Processing,
    #[sea_orm(num_value = 40)]
    Served,
    #[sea_orm(num_value = 45)]
    Unmet,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Served | Self::Unmet)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Served => "served",
            Self::Unmet => "unmet",
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
