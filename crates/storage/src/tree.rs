//! Ordered hierarchical item list: an indentable forest of tasks and
//! milestones scoped to one transition.
//!
//! Sibling order is the pair `(sort_order, id)`. Structural mutations run in
//! a single transaction each; on any error the transaction rolls back and
//! the tree is exactly as it was before the call.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use shared::domain::{ItemId, ItemKind, TransitionId};

use crate::{Storage, StoreError};

#[derive(Debug, Clone)]
pub struct StoredItem {
    pub item_id: ItemId,
    pub transition_id: TransitionId,
    pub parent_id: Option<ItemId>,
    pub kind: ItemKind,
    pub sort_order: i64,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the pre-order listing; `depth` is derived by the traversal.
#[derive(Debug, Clone)]
pub struct ItemNode {
    pub item: StoredItem,
    pub depth: u32,
}

#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

/// Scalar edits. The outer `None` leaves the column unchanged; for the
/// nullable attributes an inner `None` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct ItemEdits {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
}

const ITEM_COLUMNS: &str =
    "id, transition_id, parent_id, kind, sort_order, title, description, due_date, created_at, updated_at";

fn item_from_row(r: &SqliteRow) -> StoredItem {
    StoredItem {
        item_id: ItemId(r.get::<i64, _>(0)),
        transition_id: TransitionId(r.get::<i64, _>(1)),
        parent_id: r.get::<Option<i64>, _>(2).map(ItemId),
        kind: ItemKind::parse(r.get::<String, _>(3).as_str()).unwrap_or(ItemKind::Task),
        sort_order: r.get::<i64, _>(4),
        title: r.get::<String, _>(5),
        description: r.get::<Option<String>, _>(6),
        due_date: r.get::<Option<NaiveDate>, _>(7),
        created_at: r.get::<DateTime<Utc>, _>(8),
        updated_at: r.get::<DateTime<Utc>, _>(9),
    }
}

async fn load_item(conn: &mut SqliteConnection, item_id: ItemId) -> Result<StoredItem, StoreError> {
    let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"))
        .bind(item_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref()
        .map(item_from_row)
        .ok_or(StoreError::NotFound("item"))
}

/// Distance from root for an existing item (0 for a root).
async fn depth_of(conn: &mut SqliteConnection, item_id: ItemId) -> Result<u32, StoreError> {
    let depth: Option<i64> = sqlx::query_scalar(
        "WITH RECURSIVE lineage(id, parent_id, depth) AS (
             SELECT id, parent_id, 0 FROM items WHERE id = ?
             UNION ALL
             SELECT i.id, i.parent_id, l.depth + 1
             FROM items i JOIN lineage l ON i.id = l.parent_id
         )
         SELECT MAX(depth) FROM lineage",
    )
    .bind(item_id.0)
    .fetch_one(&mut *conn)
    .await?;
    Ok(depth.unwrap_or(0) as u32)
}

/// Height of an item's subtree: 0 for a leaf, otherwise the deepest
/// descendant's distance below the item.
async fn subtree_height(
    conn: &mut SqliteConnection,
    item_id: ItemId,
) -> Result<u32, StoreError> {
    let height: Option<i64> = sqlx::query_scalar(
        "WITH RECURSIVE subtree(id, depth) AS (
             SELECT id, 0 FROM items WHERE id = ?
             UNION ALL
             SELECT i.id, s.depth + 1
             FROM items i JOIN subtree s ON i.parent_id = s.id
         )
         SELECT MAX(depth) FROM subtree",
    )
    .bind(item_id.0)
    .fetch_one(&mut *conn)
    .await?;
    Ok(height.unwrap_or(0) as u32)
}

async fn next_sibling_order(
    conn: &mut SqliteConnection,
    transition_id: TransitionId,
    parent_id: Option<ItemId>,
) -> Result<i64, StoreError> {
    let next: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sort_order), 0) + 1
         FROM items
         WHERE transition_id = ? AND parent_id IS ?",
    )
    .bind(transition_id.0)
    .bind(parent_id.map(|id| id.0))
    .fetch_one(&mut *conn)
    .await?;
    Ok(next)
}

impl Storage {
    pub async fn add_root_item(
        &self,
        transition_id: TransitionId,
        kind: ItemKind,
        attrs: NewItem,
    ) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM transitions WHERE id = ?")
            .bind(transition_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("transition"));
        }

        let sort_order = next_sibling_order(&mut tx, transition_id, None).await?;
        let row = sqlx::query(&format!(
            "INSERT INTO items (transition_id, parent_id, kind, sort_order, title, description, due_date)
             VALUES (?, NULL, ?, ?, ?, ?, ?)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(transition_id.0)
        .bind(kind.as_str())
        .bind(sort_order)
        .bind(&attrs.title)
        .bind(&attrs.description)
        .bind(attrs.due_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item_from_row(&row))
    }

    pub async fn add_child_item(
        &self,
        parent_id: ItemId,
        kind: ItemKind,
        attrs: NewItem,
        max_depth: Option<u32>,
    ) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let parent = match load_item(&mut tx, parent_id).await {
            Ok(parent) => parent,
            Err(StoreError::NotFound(_)) => return Err(StoreError::NotFound("parent item")),
            Err(err) => return Err(err),
        };

        if let Some(max) = max_depth {
            let parent_depth = depth_of(&mut tx, parent_id).await?;
            if parent_depth + 1 > max {
                return Err(StoreError::InvalidDepth { max });
            }
        }

        let sort_order =
            next_sibling_order(&mut tx, parent.transition_id, Some(parent_id)).await?;
        let row = sqlx::query(&format!(
            "INSERT INTO items (transition_id, parent_id, kind, sort_order, title, description, due_date)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(parent.transition_id.0)
        .bind(parent_id.0)
        .bind(kind.as_str())
        .bind(sort_order)
        .bind(&attrs.title)
        .bind(&attrs.description)
        .bind(attrs.due_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item_from_row(&row))
    }

    /// Re-parents the item as the last child of its immediately preceding
    /// sibling. The item keeps its whole subtree.
    pub async fn indent_item(
        &self,
        item_id: ItemId,
        max_depth: Option<u32>,
    ) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let item = load_item(&mut tx, item_id).await?;
        let prev = preceding_sibling(&mut tx, &item)
            .await?
            .ok_or(StoreError::NoPrecedingSibling)?;

        if let Some(max) = max_depth {
            let new_parent_depth = depth_of(&mut tx, prev.item_id).await?;
            let height = subtree_height(&mut tx, item_id).await?;
            if new_parent_depth + 1 + height > max {
                return Err(StoreError::InvalidDepth { max });
            }
        }

        let sort_order =
            next_sibling_order(&mut tx, item.transition_id, Some(prev.item_id)).await?;
        let row = sqlx::query(&format!(
            "UPDATE items
             SET parent_id = ?, sort_order = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(prev.item_id.0)
        .bind(sort_order)
        .bind(item_id.0)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item_from_row(&row))
    }

    /// Promotes the item one level: it becomes a sibling of its current
    /// parent, positioned immediately after it.
    pub async fn outdent_item(&self, item_id: ItemId) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let item = load_item(&mut tx, item_id).await?;
        let parent_id = item.parent_id.ok_or(StoreError::NoParent)?;
        let parent = load_item(&mut tx, parent_id).await?;

        // Make room right after the parent in its sibling group.
        sqlx::query(
            "UPDATE items
             SET sort_order = sort_order + 1
             WHERE transition_id = ? AND parent_id IS ? AND (sort_order > ? OR (sort_order = ? AND id > ?))",
        )
        .bind(item.transition_id.0)
        .bind(parent.parent_id.map(|id| id.0))
        .bind(parent.sort_order)
        .bind(parent.sort_order)
        .bind(parent_id.0)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "UPDATE items
             SET parent_id = ?, sort_order = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(parent.parent_id.map(|id| id.0))
        .bind(parent.sort_order + 1)
        .bind(item_id.0)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item_from_row(&row))
    }

    pub async fn move_item_up(&self, item_id: ItemId) -> Result<StoredItem, StoreError> {
        self.swap_with_adjacent(item_id, Direction::Up).await
    }

    pub async fn move_item_down(&self, item_id: ItemId) -> Result<StoredItem, StoreError> {
        self.swap_with_adjacent(item_id, Direction::Down).await
    }

    async fn swap_with_adjacent(
        &self,
        item_id: ItemId,
        direction: Direction,
    ) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let item = load_item(&mut tx, item_id).await?;
        let neighbor = match direction {
            Direction::Up => preceding_sibling(&mut tx, &item).await?,
            Direction::Down => following_sibling(&mut tx, &item).await?,
        }
        .ok_or(StoreError::AtBoundary)?;

        sqlx::query("UPDATE items SET sort_order = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(neighbor.sort_order)
            .bind(item_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE items SET sort_order = ? WHERE id = ?")
            .bind(item.sort_order)
            .bind(neighbor.item_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(StoredItem {
            sort_order: neighbor.sort_order,
            ..item
        })
    }

    /// Removes the item. With `cascade` the whole subtree goes; without it,
    /// direct children are promoted into the deleted item's former position
    /// among its siblings, keeping their relative order. Returns the number
    /// of rows removed.
    pub async fn delete_item(&self, item_id: ItemId, cascade: bool) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let item = load_item(&mut tx, item_id).await?;

        if cascade {
            let removed = sqlx::query(
                "WITH RECURSIVE subtree(id) AS (
                     SELECT id FROM items WHERE id = ?
                     UNION ALL
                     SELECT i.id FROM items i JOIN subtree s ON i.parent_id = s.id
                 )
                 DELETE FROM items WHERE id IN (SELECT id FROM subtree)",
            )
            .bind(item_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tx.commit().await?;
            return Ok(removed);
        }

        let siblings = sibling_group(&mut tx, &item).await?;
        let children = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE parent_id = ? ORDER BY sort_order, id"
        ))
        .bind(item_id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(item_from_row)
        .collect::<Vec<_>>();

        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(item_id.0)
            .execute(&mut *tx)
            .await?;

        // Splice the children into the gap the item left, then renumber the
        // whole group contiguously from 1.
        let mut merged: Vec<(ItemId, bool)> = Vec::with_capacity(siblings.len() + children.len());
        for sibling in &siblings {
            if (sibling.sort_order, sibling.item_id) < (item.sort_order, item.item_id) {
                merged.push((sibling.item_id, false));
            }
        }
        for child in &children {
            merged.push((child.item_id, true));
        }
        for sibling in &siblings {
            if (sibling.sort_order, sibling.item_id) > (item.sort_order, item.item_id) {
                merged.push((sibling.item_id, false));
            }
        }

        for (position, (id, promoted)) in merged.iter().enumerate() {
            let sort_order = position as i64 + 1;
            if *promoted {
                sqlx::query(
                    "UPDATE items
                     SET parent_id = ?, sort_order = ?, updated_at = CURRENT_TIMESTAMP
                     WHERE id = ?",
                )
                .bind(item.parent_id.map(|p| p.0))
                .bind(sort_order)
                .bind(id.0)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query("UPDATE items SET sort_order = ? WHERE id = ?")
                    .bind(sort_order)
                    .bind(id.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(1)
    }

    /// Depth-first pre-order listing: parent before children, siblings by
    /// ascending `(sort_order, id)`.
    pub async fn list_items(
        &self,
        transition_id: TransitionId,
    ) -> Result<Vec<ItemNode>, StoreError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM transitions WHERE id = ?")
            .bind(transition_id.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("transition"));
        }

        // Fixed-width path segments make lexicographic ORDER BY equal to the
        // numeric (sort_order, id) sibling order.
        let rows = sqlx::query(
            "WITH RECURSIVE tree AS (
                 SELECT i.*, 0 AS depth, printf('%020d.%020d', i.sort_order, i.id) AS path
                 FROM items i
                 WHERE i.transition_id = ? AND i.parent_id IS NULL
                 UNION ALL
                 SELECT c.*, t.depth + 1, t.path || '/' || printf('%020d.%020d', c.sort_order, c.id)
                 FROM items c JOIN tree t ON c.parent_id = t.id
             )
             SELECT id, transition_id, parent_id, kind, sort_order, title, description, due_date,
                    created_at, updated_at, depth
             FROM tree
             ORDER BY path",
        )
        .bind(transition_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let depth = r.get::<i64, _>(10) as u32;
                ItemNode {
                    item: item_from_row(&r),
                    depth,
                }
            })
            .collect())
    }

    pub async fn update_item(
        &self,
        item_id: ItemId,
        edits: ItemEdits,
    ) -> Result<StoredItem, StoreError> {
        let mut tx = self.pool.begin().await?;

        let item = load_item(&mut tx, item_id).await?;
        let title = edits.title.unwrap_or(item.title);
        let description = edits.description.unwrap_or(item.description);
        let due_date = edits.due_date.unwrap_or(item.due_date);

        let row = sqlx::query(&format!(
            "UPDATE items
             SET title = ?, description = ?, due_date = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(title)
        .bind(description)
        .bind(due_date)
        .bind(item_id.0)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item_from_row(&row))
    }

    /// Derived distance from root for an existing item.
    pub async fn item_depth(&self, item_id: ItemId) -> Result<u32, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_item(&mut conn, item_id).await?;
        depth_of(&mut conn, item_id).await
    }

    pub async fn transition_for_item(
        &self,
        item_id: ItemId,
    ) -> Result<Option<TransitionId>, StoreError> {
        let row = sqlx::query("SELECT transition_id FROM items WHERE id = ?")
            .bind(item_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| TransitionId(r.get::<i64, _>(0))))
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

async fn preceding_sibling(
    conn: &mut SqliteConnection,
    item: &StoredItem,
) -> Result<Option<StoredItem>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE transition_id = ? AND parent_id IS ? AND id != ?
           AND (sort_order < ? OR (sort_order = ? AND id < ?))
         ORDER BY sort_order DESC, id DESC
         LIMIT 1"
    ))
    .bind(item.transition_id.0)
    .bind(item.parent_id.map(|id| id.0))
    .bind(item.item_id.0)
    .bind(item.sort_order)
    .bind(item.sort_order)
    .bind(item.item_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(item_from_row))
}

async fn following_sibling(
    conn: &mut SqliteConnection,
    item: &StoredItem,
) -> Result<Option<StoredItem>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE transition_id = ? AND parent_id IS ? AND id != ?
           AND (sort_order > ? OR (sort_order = ? AND id > ?))
         ORDER BY sort_order ASC, id ASC
         LIMIT 1"
    ))
    .bind(item.transition_id.0)
    .bind(item.parent_id.map(|id| id.0))
    .bind(item.item_id.0)
    .bind(item.sort_order)
    .bind(item.sort_order)
    .bind(item.item_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(item_from_row))
}

/// All siblings of `item` (excluding it), in sibling order.
async fn sibling_group(
    conn: &mut SqliteConnection,
    item: &StoredItem,
) -> Result<Vec<StoredItem>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE transition_id = ? AND parent_id IS ? AND id != ?
         ORDER BY sort_order, id"
    ))
    .bind(item.transition_id.0)
    .bind(item.parent_id.map(|id| id.0))
    .bind(item.item_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(item_from_row).collect())
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
