use entity_collection::{
    CollectionEvent, EntityCollection, EntityId, EntityRecord, LocalId, RecordingSink, ServerId,
    SyncState,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn remote(id: u64) -> EntityId {
    EntityId::from(ServerId::from(id))
}

#[test]
fn optimistic_create_then_confirm_keeps_position() {
    let sink = Arc::new(RecordingSink::new());
    let mut collection: EntityCollection<Value> = EntityCollection::with_sink(sink.clone());
    collection
        .reset(vec![
            EntityRecord::confirmed(ServerId::from(1), json!({ "title": "A" })),
            EntityRecord::confirmed(ServerId::from(2), json!({ "title": "B" })),
        ])
        .unwrap();

    let local = LocalId::next();
    collection
        .insert_at_front(EntityRecord::pending_local(local, json!({ "title": "C" })))
        .unwrap();
    assert_eq!(
        collection.ids(),
        vec![EntityId::from(local), remote(1), remote(2)]
    );
    assert_eq!(collection.records()[0].sync_state, SyncState::Pending);

    collection
        .replace(
            &EntityId::from(local),
            EntityRecord::confirmed(ServerId::from(3), json!({ "id": 3, "title": "C" })),
        )
        .unwrap();

    assert_eq!(collection.ids(), vec![remote(3), remote(1), remote(2)]);
    assert_eq!(collection.records()[0].sync_state, SyncState::Confirmed);
    assert!(matches!(
        sink.events().last(),
        Some(CollectionEvent::Replaced { index: 0, .. })
    ));
}

#[test]
fn failed_create_rollback_restores_structure() {
    let mut collection: EntityCollection<Value> = EntityCollection::from_records(vec![
        EntityRecord::confirmed(ServerId::from(1), json!({ "title": "A" })),
        EntityRecord::confirmed(ServerId::from(2), json!({ "title": "B" })),
    ])
    .unwrap();
    let before = collection.snapshot();

    let local = LocalId::next();
    collection
        .insert_at_front(EntityRecord::pending_local(local, json!({ "title": "C" })))
        .unwrap();
    collection.remove(&EntityId::from(local)).unwrap();

    assert_eq!(collection.snapshot(), before);
}

#[test]
fn failed_delete_rollback_restores_index() {
    let mut collection: EntityCollection<Value> = EntityCollection::from_records(
        (5..=8)
            .map(|id| EntityRecord::confirmed(ServerId::from(id), json!({ "n": id })))
            .collect(),
    )
    .unwrap();
    let before = collection.snapshot();

    let (record, index) = collection.remove(&remote(7)).unwrap();
    assert_eq!(index, 2);
    collection
        .insert(record, entity_collection::InsertPosition::At(index))
        .unwrap();

    assert_eq!(collection.snapshot(), before);
}
