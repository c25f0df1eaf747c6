use crate::node::{NodeRecord, NULL_NODE};
use crate::store::{NodeStore, StoreError};

#[test]
fn index_zero_is_reserved() {
    let mut store = NodeStore::new(16, false);
    assert_eq!(store.len(), 0);
    let first = store
        .allocate_node(NodeRecord::new(NULL_NODE, None, 1.0, 0))
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn allocation_is_monotonic() {
    let mut store = NodeStore::new(16, false);
    let mut last = 0;
    for _ in 0..16 {
        let id = store
            .allocate_node(NodeRecord::new(NULL_NODE, None, 0.0, 0))
            .unwrap();
        assert!(id > last);
        last = id;
    }
}

#[test]
fn fixed_store_reports_exhaustion() {
    let mut store = NodeStore::new(2, false);
    store
        .allocate_node(NodeRecord::new(NULL_NODE, None, 0.0, 0))
        .unwrap();
    store
        .allocate_node(NodeRecord::new(NULL_NODE, None, 0.0, 0))
        .unwrap();
    match store.allocate_node(NodeRecord::new(NULL_NODE, None, 0.0, 0)) {
        Err(StoreError::Exhausted { capacity }) => assert_eq!(capacity, 2),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn expandable_store_grows_past_capacity() {
    let mut store = NodeStore::new(2, true);
    for _ in 0..64 {
        store
            .allocate_node(NodeRecord::new(NULL_NODE, None, 0.0, 0))
            .unwrap();
    }
    assert_eq!(store.len(), 64);
}

#[test]
fn child_blocks_are_contiguous_and_stable() {
    let mut store = NodeStore::new(16, false);
    let a = store.allocate_children(3).unwrap();
    let b = store.allocate_children(2).unwrap();
    assert_eq!(b, a + 3);

    store.edge_mut(a).p = 0.75;
    store.allocate_children(4).unwrap();
    assert_eq!(store.edge(a).p, 0.75);
    assert_eq!(store.edge(a).child, NULL_NODE);
}
