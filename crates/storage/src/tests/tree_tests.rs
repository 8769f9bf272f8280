use super::*;

async fn seed() -> (Storage, TransitionId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("planner").await.expect("user");
    let transition = storage
        .create_transition("onboarding", owner)
        .await
        .expect("transition");
    (storage, transition)
}

fn attrs(title: &str) -> NewItem {
    NewItem {
        title: title.to_string(),
        ..Default::default()
    }
}

async fn outline(storage: &Storage, transition: TransitionId) -> Vec<(String, u32)> {
    storage
        .list_items(transition)
        .await
        .expect("list")
        .into_iter()
        .map(|node| (node.item.title, node.depth))
        .collect()
}

/// Parent strictly precedes every descendant, and sibling orders are unique
/// and strictly increasing within each group.
async fn assert_tree_invariants(storage: &Storage, transition: TransitionId) {
    let nodes = storage.list_items(transition).await.expect("list");
    let mut seen: Vec<ItemId> = Vec::new();
    for node in &nodes {
        if let Some(parent) = node.item.parent_id {
            assert!(
                seen.contains(&parent),
                "parent of {:?} must precede it in pre-order",
                node.item.item_id
            );
        }
        seen.push(node.item.item_id);
    }

    let mut last_per_group: std::collections::HashMap<Option<ItemId>, (i64, ItemId)> =
        std::collections::HashMap::new();
    for node in &nodes {
        let key = node.item.parent_id;
        let rank = (node.item.sort_order, node.item.item_id);
        if let Some(previous) = last_per_group.get(&key) {
            assert!(
                *previous < rank,
                "sibling order must be strictly increasing within a group"
            );
        }
        last_per_group.insert(key, rank);
    }
}

#[tokio::test]
async fn roots_append_in_creation_order() {
    let (storage, transition) = seed().await;
    for title in ["pack", "notify", "handover"] {
        storage
            .add_root_item(transition, ItemKind::Task, attrs(title))
            .await
            .expect("root");
    }

    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("pack".to_string(), 0),
            ("notify".to_string(), 0),
            ("handover".to_string(), 0)
        ]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn children_list_after_parent_in_insertion_order() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Milestone, attrs("A"))
        .await
        .expect("root");
    storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("X"), None)
        .await
        .expect("child x");
    storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("Y"), None)
        .await
        .expect("child y");

    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("X".to_string(), 1),
            ("Y".to_string(), 1)
        ]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn add_root_to_unknown_transition_fails() {
    let (storage, _) = seed().await;
    let err = storage
        .add_root_item(TransitionId(999), ItemKind::Task, attrs("ghost"))
        .await
        .expect_err("must fail");
    assert!(matches!(err, StoreError::NotFound("transition")));
}

#[tokio::test]
async fn add_child_to_unknown_parent_fails() {
    let (storage, _) = seed().await;
    let err = storage
        .add_child_item(ItemId(999), ItemKind::Task, attrs("orphan"), None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, StoreError::NotFound("parent item")));
}

#[tokio::test]
async fn add_child_enforces_configured_depth_limit() {
    let (storage, transition) = seed().await;
    let root = storage
        .add_root_item(transition, ItemKind::Task, attrs("root"))
        .await
        .expect("root");
    let child = storage
        .add_child_item(root.item_id, ItemKind::Task, attrs("child"), Some(1))
        .await
        .expect("depth 1 allowed");

    let err = storage
        .add_child_item(child.item_id, ItemKind::Task, attrs("grandchild"), Some(1))
        .await
        .expect_err("depth 2 rejected");
    assert!(matches!(err, StoreError::InvalidDepth { max: 1 }));

    // Unconstrained by default.
    storage
        .add_child_item(child.item_id, ItemKind::Task, attrs("grandchild"), None)
        .await
        .expect("no limit configured");
}

#[tokio::test]
async fn indenting_second_root_nests_it_under_first() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");

    let moved = storage.indent_item(b.item_id, None).await.expect("indent");
    assert_eq!(moved.parent_id, Some(a.item_id));

    assert_eq!(
        outline(&storage, transition).await,
        vec![("A".to_string(), 0), ("B".to_string(), 1)]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn indenting_first_sibling_fails_and_leaves_tree_unchanged() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");

    let before = outline(&storage, transition).await;
    let err = storage
        .indent_item(a.item_id, None)
        .await
        .expect_err("no indent target");
    assert!(matches!(err, StoreError::NoPrecedingSibling));
    assert_eq!(outline(&storage, transition).await, before);
}

#[tokio::test]
async fn indent_accounts_for_subtree_height_against_depth_limit() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");
    storage
        .add_child_item(b.item_id, ItemKind::Task, attrs("B.1"), None)
        .await
        .expect("b child");

    // B carries a child, so nesting B under A needs depth 2.
    let err = storage
        .indent_item(b.item_id, Some(1))
        .await
        .expect_err("subtree too deep");
    assert!(matches!(err, StoreError::InvalidDepth { max: 1 }));

    let moved = storage
        .indent_item(b.item_id, Some(2))
        .await
        .expect("fits under limit 2");
    assert_eq!(moved.parent_id, Some(a.item_id));
}

#[tokio::test]
async fn outdenting_sole_root_fails_with_no_parent() {
    let (storage, transition) = seed().await;
    let x = storage
        .add_root_item(transition, ItemKind::Task, attrs("X"))
        .await
        .expect("x");

    let before = outline(&storage, transition).await;
    let err = storage
        .outdent_item(x.item_id)
        .await
        .expect_err("root cannot outdent");
    assert!(matches!(err, StoreError::NoParent));
    assert_eq!(outline(&storage, transition).await, before);
}

#[tokio::test]
async fn indent_then_outdent_restores_original_shape() {
    let (storage, transition) = seed().await;
    for title in ["A", "B", "C"] {
        storage
            .add_root_item(transition, ItemKind::Task, attrs(title))
            .await
            .expect("root");
    }
    let nodes = storage.list_items(transition).await.expect("list");
    let b = nodes[1].item.clone();
    assert_eq!(b.title, "B");

    storage.indent_item(b.item_id, None).await.expect("indent");
    let restored = storage.outdent_item(b.item_id).await.expect("outdent");
    assert_eq!(restored.parent_id, None);

    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 0),
            ("C".to_string(), 0)
        ]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn outdent_places_item_immediately_after_its_old_parent() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    storage
        .add_root_item(transition, ItemKind::Task, attrs("Z"))
        .await
        .expect("z");
    storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("X"), None)
        .await
        .expect("x");
    let y = storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("Y"), None)
        .await
        .expect("y");

    storage.outdent_item(y.item_id).await.expect("outdent");

    // Y promotes to root level right after A, before Z.
    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("X".to_string(), 1),
            ("Y".to_string(), 0),
            ("Z".to_string(), 0)
        ]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn outdent_carries_the_whole_subtree() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("B"), None)
        .await
        .expect("b");
    storage
        .add_child_item(b.item_id, ItemKind::Task, attrs("B.1"), None)
        .await
        .expect("b.1");

    storage.outdent_item(b.item_id).await.expect("outdent");

    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 0),
            ("B.1".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn move_up_and_move_down_swap_adjacent_siblings() {
    let (storage, transition) = seed().await;
    for title in ["A", "B", "C"] {
        storage
            .add_root_item(transition, ItemKind::Task, attrs(title))
            .await
            .expect("root");
    }
    let nodes = storage.list_items(transition).await.expect("list");
    let b = nodes[1].item.item_id;

    storage.move_item_up(b).await.expect("move up");
    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("B".to_string(), 0),
            ("A".to_string(), 0),
            ("C".to_string(), 0)
        ]
    );

    // The inverse restores the original shape.
    storage.move_item_down(b).await.expect("move down");
    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 0),
            ("C".to_string(), 0)
        ]
    );
    assert_tree_invariants(&storage, transition).await;
}

#[tokio::test]
async fn moves_at_the_boundary_fail_without_mutating() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");

    let before = outline(&storage, transition).await;
    assert!(matches!(
        storage.move_item_up(a.item_id).await.expect_err("first"),
        StoreError::AtBoundary
    ));
    assert!(matches!(
        storage.move_item_down(b.item_id).await.expect_err("last"),
        StoreError::AtBoundary
    ));
    assert_eq!(outline(&storage, transition).await, before);
}

#[tokio::test]
async fn moves_stay_within_the_sibling_group() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let child = storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("A.1"), None)
        .await
        .expect("child");
    storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");

    // A.1 is the only child of A; roots are not its siblings.
    assert!(matches!(
        storage
            .move_item_down(child.item_id)
            .await
            .expect_err("sole child"),
        StoreError::AtBoundary
    ));
}

#[tokio::test]
async fn cascade_delete_removes_the_whole_subtree() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("B"), None)
        .await
        .expect("b");
    storage
        .add_child_item(b.item_id, ItemKind::Task, attrs("B.1"), None)
        .await
        .expect("b.1");
    storage
        .add_root_item(transition, ItemKind::Task, attrs("C"))
        .await
        .expect("c");

    let removed = storage.delete_item(a.item_id, true).await.expect("delete");
    assert_eq!(removed, 3);
    assert_eq!(
        outline(&storage, transition).await,
        vec![("C".to_string(), 0)]
    );
}

#[tokio::test]
async fn non_cascade_delete_promotes_children_into_the_gap() {
    let (storage, transition) = seed().await;
    storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let p = storage
        .add_root_item(transition, ItemKind::Task, attrs("P"))
        .await
        .expect("p");
    storage
        .add_root_item(transition, ItemKind::Task, attrs("B"))
        .await
        .expect("b");
    storage
        .add_child_item(p.item_id, ItemKind::Task, attrs("X"), None)
        .await
        .expect("x");
    storage
        .add_child_item(p.item_id, ItemKind::Task, attrs("Y"), None)
        .await
        .expect("y");

    let removed = storage.delete_item(p.item_id, false).await.expect("delete");
    assert_eq!(removed, 1);

    // X and Y take P's former root position, in their original order.
    assert_eq!(
        outline(&storage, transition).await,
        vec![
            ("A".to_string(), 0),
            ("X".to_string(), 0),
            ("Y".to_string(), 0),
            ("B".to_string(), 0)
        ]
    );
    assert_tree_invariants(&storage, transition).await;

    // The promoted group is renumbered contiguously.
    let orders: Vec<i64> = storage
        .list_items(transition)
        .await
        .expect("list")
        .into_iter()
        .map(|node| node.item.sort_order)
        .collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn non_cascade_delete_of_nested_item_promotes_grandchildren() {
    let (storage, transition) = seed().await;
    let a = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("a");
    let b = storage
        .add_child_item(a.item_id, ItemKind::Task, attrs("B"), None)
        .await
        .expect("b");
    storage
        .add_child_item(b.item_id, ItemKind::Task, attrs("B.1"), None)
        .await
        .expect("b.1");

    storage.delete_item(b.item_id, false).await.expect("delete");

    assert_eq!(
        outline(&storage, transition).await,
        vec![("A".to_string(), 0), ("B.1".to_string(), 1)]
    );
}

#[tokio::test]
async fn deleting_unknown_item_fails() {
    let (storage, _) = seed().await;
    let err = storage
        .delete_item(ItemId(404), true)
        .await
        .expect_err("missing");
    assert!(matches!(err, StoreError::NotFound("item")));
}

#[tokio::test]
async fn listing_unknown_transition_fails() {
    let (storage, _) = seed().await;
    let err = storage
        .list_items(TransitionId(404))
        .await
        .expect_err("missing");
    assert!(matches!(err, StoreError::NotFound("transition")));
}

#[tokio::test]
async fn trees_are_isolated_per_transition() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("planner").await.expect("user");
    let first = storage
        .create_transition("first", owner)
        .await
        .expect("first");
    let second = storage
        .create_transition("second", owner)
        .await
        .expect("second");

    storage
        .add_root_item(first, ItemKind::Task, attrs("only-in-first"))
        .await
        .expect("root");

    assert_eq!(outline(&storage, first).await.len(), 1);
    assert!(outline(&storage, second).await.is_empty());
}

#[tokio::test]
async fn update_item_edits_scalars_only() {
    let (storage, transition) = seed().await;
    let item = storage
        .add_root_item(transition, ItemKind::Task, attrs("draft"))
        .await
        .expect("root");

    let due = chrono::NaiveDate::from_ymd_opt(2026, 9, 1).expect("date");
    let updated = storage
        .update_item(
            item.item_id,
            ItemEdits {
                title: Some("final".to_string()),
                description: Some(Some("handover checklist".to_string())),
                due_date: Some(Some(due)),
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.title, "final");
    assert_eq!(updated.description.as_deref(), Some("handover checklist"));
    assert_eq!(updated.due_date, Some(due));
    assert_eq!(updated.parent_id, item.parent_id);
    assert_eq!(updated.sort_order, item.sort_order);

    let err = storage
        .update_item(ItemId(404), ItemEdits::default())
        .await
        .expect_err("missing");
    assert!(matches!(err, StoreError::NotFound("item")));
}

#[tokio::test]
async fn explicit_clear_edits_reset_optional_attributes() {
    let (storage, transition) = seed().await;
    let item = storage
        .add_root_item(transition, ItemKind::Task, attrs("movers"))
        .await
        .expect("root");

    let due = chrono::NaiveDate::from_ymd_opt(2026, 9, 1).expect("date");
    storage
        .update_item(
            item.item_id,
            ItemEdits {
                description: Some(Some("book the elevator".to_string())),
                due_date: Some(Some(due)),
                ..Default::default()
            },
        )
        .await
        .expect("set attributes");

    // Absent edits leave everything alone, set values included.
    let untouched = storage
        .update_item(item.item_id, ItemEdits::default())
        .await
        .expect("no-op update");
    assert_eq!(untouched.description.as_deref(), Some("book the elevator"));
    assert_eq!(untouched.due_date, Some(due));

    let cleared = storage
        .update_item(
            item.item_id,
            ItemEdits {
                due_date: Some(None),
                ..Default::default()
            },
        )
        .await
        .expect("clear due date");
    assert_eq!(cleared.due_date, None);
    assert_eq!(cleared.description.as_deref(), Some("book the elevator"));
    assert_eq!(cleared.title, "movers");

    let cleared = storage
        .update_item(
            item.item_id,
            ItemEdits {
                description: Some(None),
                ..Default::default()
            },
        )
        .await
        .expect("clear description");
    assert_eq!(cleared.description, None);
}

#[tokio::test]
async fn transition_for_item_resolves_the_owning_container() {
    let (storage, transition) = seed().await;
    let item = storage
        .add_root_item(transition, ItemKind::Task, attrs("A"))
        .await
        .expect("root");

    assert_eq!(
        storage
            .transition_for_item(item.item_id)
            .await
            .expect("lookup"),
        Some(transition)
    );
    assert_eq!(
        storage.transition_for_item(ItemId(404)).await.expect("lookup"),
        None
    );
}

#[tokio::test]
async fn milestone_kind_round_trips_through_the_store() {
    let (storage, transition) = seed().await;
    let item = storage
        .add_root_item(transition, ItemKind::Milestone, attrs("go-live"))
        .await
        .expect("root");
    assert_eq!(item.kind, ItemKind::Milestone);

    let listed = storage.list_items(transition).await.expect("list");
    assert_eq!(listed[0].item.kind, ItemKind::Milestone);
}
