//! Validation and ownership layer between the HTTP surface and the store.
//! Handlers stay thin; every operation here takes the acting user, resolves
//! the owning transition, and enforces access before touching the tree.

use shared::{
    domain::{AccountStatus, ItemId, ItemKind, TransitionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AuditEntryPayload, ItemEditsRequest, ItemPayload, NewItemRequest, TransitionSummary,
    },
};
use storage::{AuditEntry, ItemEdits, ItemNode, NewItem, Storage, StoreError, StoredItem};

/// Structural policy for the item tree. `max_depth = None` leaves nesting
/// unconstrained.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreePolicy {
    pub max_depth: Option<u32>,
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub tree: TreePolicy,
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<UserId, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "username cannot be empty",
        ));
    }
    ctx.storage.create_user(username).await.map_err(store)
}

pub async fn create_transition(
    ctx: &ApiContext,
    user_id: UserId,
    name: &str,
) -> Result<TransitionSummary, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "transition name cannot be empty",
        ));
    }
    ensure_active_account(ctx, user_id).await?;
    let transition_id = ctx
        .storage
        .create_transition(name, user_id)
        .await
        .map_err(store)?;
    Ok(TransitionSummary {
        transition_id,
        name: name.to_string(),
        owner_user_id: user_id,
    })
}

pub async fn list_transitions(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<TransitionSummary>, ApiError> {
    ensure_active_account(ctx, user_id).await?;
    let transitions = ctx
        .storage
        .list_transitions_for_owner(user_id)
        .await
        .map_err(store)?;
    Ok(transitions
        .into_iter()
        .map(|t| TransitionSummary {
            transition_id: t.transition_id,
            name: t.name,
            owner_user_id: t.owner_user_id,
        })
        .collect())
}

pub async fn add_root_item(
    ctx: &ApiContext,
    user_id: UserId,
    transition_id: TransitionId,
    req: NewItemRequest,
) -> Result<ItemPayload, ApiError> {
    ensure_transition_owner(ctx, transition_id, user_id).await?;
    let (kind, attrs) = split_new_item(req)?;
    let item = ctx
        .storage
        .add_root_item(transition_id, kind, attrs)
        .await
        .map_err(store)?;
    Ok(item_payload(item, 0))
}

pub async fn add_child_item(
    ctx: &ApiContext,
    user_id: UserId,
    parent_id: ItemId,
    req: NewItemRequest,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, parent_id, user_id).await?;
    let (kind, attrs) = split_new_item(req)?;
    let item = ctx
        .storage
        .add_child_item(parent_id, kind, attrs, ctx.tree.max_depth)
        .await
        .map_err(store)?;
    let depth = ctx.storage.item_depth(item.item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

pub async fn indent_item(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    let item = ctx
        .storage
        .indent_item(item_id, ctx.tree.max_depth)
        .await
        .map_err(store)?;
    let depth = ctx.storage.item_depth(item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

pub async fn outdent_item(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    let item = ctx.storage.outdent_item(item_id).await.map_err(store)?;
    let depth = ctx.storage.item_depth(item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

pub async fn move_item_up(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    let item = ctx.storage.move_item_up(item_id).await.map_err(store)?;
    let depth = ctx.storage.item_depth(item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

pub async fn move_item_down(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    let item = ctx.storage.move_item_down(item_id).await.map_err(store)?;
    let depth = ctx.storage.item_depth(item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

pub async fn update_item(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
    req: ItemEditsRequest,
) -> Result<ItemPayload, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "title cannot be empty",
            ));
        }
    }
    let item = ctx
        .storage
        .update_item(
            item_id,
            ItemEdits {
                title: req.title,
                description: req.description,
                due_date: req.due_date,
            },
        )
        .await
        .map_err(store)?;
    let depth = ctx.storage.item_depth(item_id).await.map_err(store)?;
    Ok(item_payload(item, depth))
}

/// Removes an item. Without `cascade`, direct children are promoted into
/// the deleted item's former position. Returns the number of rows removed.
pub async fn delete_item(
    ctx: &ApiContext,
    user_id: UserId,
    item_id: ItemId,
    cascade: bool,
) -> Result<u64, ApiError> {
    ensure_item_owner(ctx, item_id, user_id).await?;
    ctx.storage
        .delete_item(item_id, cascade)
        .await
        .map_err(store)
}

pub async fn list_items(
    ctx: &ApiContext,
    user_id: UserId,
    transition_id: TransitionId,
) -> Result<Vec<ItemPayload>, ApiError> {
    ensure_transition_owner(ctx, transition_id, user_id).await?;
    let nodes = ctx.storage.list_items(transition_id).await.map_err(store)?;
    Ok(nodes.into_iter().map(node_payload).collect())
}

pub async fn set_account_status(
    ctx: &ApiContext,
    actor: UserId,
    target: UserId,
    status: AccountStatus,
    reason: &str,
) -> Result<AuditEntryPayload, ApiError> {
    ensure_active_account(ctx, actor).await?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "a reason is required for account status changes",
        ));
    }
    let entry = ctx
        .storage
        .set_account_status(target, status, actor, reason)
        .await
        .map_err(store)?;
    Ok(audit_payload(entry))
}

pub async fn list_audit_entries(
    ctx: &ApiContext,
    actor: UserId,
    limit: u32,
) -> Result<Vec<AuditEntryPayload>, ApiError> {
    ensure_active_account(ctx, actor).await?;
    let entries = ctx
        .storage
        .list_audit_entries(limit)
        .await
        .map_err(store)?;
    Ok(entries.into_iter().map(audit_payload).collect())
}

async fn ensure_active_account(ctx: &ApiContext, user_id: UserId) -> Result<(), ApiError> {
    let user = ctx
        .storage
        .user_by_id(user_id)
        .await
        .map_err(store)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))?;
    if user.account_status != AccountStatus::Active {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "account is not active",
        ));
    }
    Ok(())
}

async fn ensure_transition_owner(
    ctx: &ApiContext,
    transition_id: TransitionId,
    user_id: UserId,
) -> Result<(), ApiError> {
    ensure_active_account(ctx, user_id).await?;
    let owner = ctx
        .storage
        .owner_for_transition(transition_id)
        .await
        .map_err(store)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "transition not found"))?;
    if owner != user_id {
        tracing::warn!(
            user = user_id.0,
            transition = transition_id.0,
            "denied access to transition owned by another user"
        );
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "transition belongs to another user",
        ));
    }
    Ok(())
}

async fn ensure_item_owner(
    ctx: &ApiContext,
    item_id: ItemId,
    user_id: UserId,
) -> Result<(), ApiError> {
    let transition_id = ctx
        .storage
        .transition_for_item(item_id)
        .await
        .map_err(store)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "item not found"))?;
    ensure_transition_owner(ctx, transition_id, user_id).await
}

fn split_new_item(req: NewItemRequest) -> Result<(ItemKind, NewItem), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "title cannot be empty",
        ));
    }
    Ok((
        req.kind.unwrap_or(ItemKind::Task),
        NewItem {
            title: req.title,
            description: req.description,
            due_date: req.due_date,
        },
    ))
}

fn item_payload(item: StoredItem, depth: u32) -> ItemPayload {
    ItemPayload {
        item_id: item.item_id,
        transition_id: item.transition_id,
        parent_id: item.parent_id,
        kind: item.kind,
        sort_order: item.sort_order,
        depth,
        title: item.title,
        description: item.description,
        due_date: item.due_date,
        created_at: item.created_at,
    }
}

fn node_payload(node: ItemNode) -> ItemPayload {
    let depth = node.depth;
    item_payload(node.item, depth)
}

fn audit_payload(entry: AuditEntry) -> AuditEntryPayload {
    AuditEntryPayload {
        entry_id: entry.entry_id,
        correlation_id: entry.correlation_id,
        actor_user_id: entry.actor_user_id,
        action: entry.action,
        subject: entry.subject,
        detail: entry.detail,
        created_at: entry.created_at,
    }
}

fn store(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(what) => {
            ApiError::new(ErrorCode::NotFound, format!("{what} not found"))
        }
        StoreError::NoPrecedingSibling
        | StoreError::NoParent
        | StoreError::AtBoundary
        | StoreError::InvalidDepth { .. } => ApiError::new(ErrorCode::Validation, err.to_string()),
        StoreError::Conflict => ApiError::new(ErrorCode::Conflict, err.to_string()),
        StoreError::Db(_) => ApiError::new(ErrorCode::Internal, err.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
