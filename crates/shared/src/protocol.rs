use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::domain::{AccountStatus, ItemId, ItemKind, TransitionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSummary {
    pub transition_id: TransitionId,
    pub name: String,
    pub owner_user_id: UserId,
}

/// One node of the pre-order item listing. `depth` is derived by the
/// traversal, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    pub item_id: ItemId,
    pub transition_id: TransitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    pub kind: ItemKind,
    pub sort_order: i64,
    pub depth: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItemRequest {
    pub title: String,
    #[serde(default)]
    pub kind: Option<ItemKind>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

/// Partial edit. An absent field leaves the attribute unchanged; for the
/// nullable attributes an explicit JSON `null` clears the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemEditsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable_edit",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable_edit",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<NaiveDate>>,
}

// Maps an explicit `null` to `Some(None)`; `#[serde(default)]` supplies the
// outer `None` when the field is absent entirely.
fn nullable_edit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatusChange {
    pub actor_user_id: UserId,
    pub status: AccountStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryPayload {
    pub entry_id: i64,
    pub correlation_id: Uuid,
    pub actor_user_id: UserId,
    pub action: String,
    pub subject: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
