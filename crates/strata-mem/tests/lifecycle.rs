// Arena Lifecycle Integration Tests
//
// These tests cover root, in-place and child arenas: creation, teardown
// order, explicit destruction and detachment.

use std::cell::{Cell, RefCell};
use std::mem::MaybeUninit;

use strata_mem::{Arena, ArenaConfig, ArenaFactory, BlockAlloc, Error};

/// Test that every child is torn down exactly once together with its parent
#[test]
fn test_children_torn_down_once_with_parent() {
    let drops = Cell::new(0);
    {
        let mut parent = Arena::new().unwrap();
        for _ in 0..2 {
            let child = parent.create_child().unwrap();
            parent
                .child_mut(child)
                .defer(|| drops.set(drops.get() + 1))
                .unwrap();
        }
        assert_eq!(parent.stats().children, 2);
        assert_eq!(drops.get(), 0);
    }
    assert_eq!(drops.get(), 2);
}

/// Test that destroying a child runs its cleanups immediately and only once
#[test]
fn test_destroy_child_runs_cleanups_now() {
    let drops = Cell::new(0);
    let mut parent = Arena::new().unwrap();
    let child = parent.create_child().unwrap();
    parent
        .child_mut(child)
        .defer(|| drops.set(drops.get() + 1))
        .unwrap();

    parent.destroy_child(child);
    assert_eq!(drops.get(), 1);
    assert_eq!(parent.stats().children, 0);
    assert_eq!(parent.stats().big_blocks, 0);

    drop(parent);
    assert_eq!(drops.get(), 1);
}

/// Test that a child id cannot be used after the child is destroyed
#[test]
#[should_panic(expected = "is not active")]
fn test_stale_child_id_panics() {
    let mut parent = Arena::new().unwrap();
    let child = parent.create_child().unwrap();
    parent.destroy_child(child);
    let _ = parent.child(child);
}

/// Test that a detached child outlives its former parent
#[test]
fn test_detached_child_is_independent() {
    let log = RefCell::new(Vec::new());
    let mut parent = Arena::new().unwrap();
    let id = parent.create_child().unwrap();
    let child = parent.child_mut(id);
    let values = child.alloc_copy(&[1u32, 2, 3, 4]).unwrap();
    child.defer(|| log.borrow_mut().push("child")).unwrap();
    parent.defer(|| log.borrow_mut().push("parent")).unwrap();

    let mut child = parent.detach_child(id);
    assert_eq!(parent.stats().children, 0);
    drop(parent);
    assert_eq!(*log.borrow(), ["parent"]);

    unsafe {
        assert_eq!(std::slice::from_raw_parts(values.as_ptr(), 4), &[1, 2, 3, 4]);
    }
    // The detached arena keeps allocating normally.
    let more = child.alloc_zeroed(8, 100).unwrap();
    unsafe { child.free(more) };

    child.destroy();
    assert_eq!(*log.borrow(), ["parent", "child"]);
}

/// Test that nested arenas unwind in reverse creation order
#[test]
fn test_nested_teardown_order() {
    let log = RefCell::new(Vec::new());
    {
        let mut root = Arena::new().unwrap();
        root.defer(|| log.borrow_mut().push("a")).unwrap();

        let child = root.create_child().unwrap();
        let child_arena = root.child_mut(child);
        child_arena.defer(|| log.borrow_mut().push("c1")).unwrap();
        let grandchild = child_arena.create_child().unwrap();
        child_arena
            .child_mut(grandchild)
            .defer(|| log.borrow_mut().push("g"))
            .unwrap();

        root.defer(|| log.borrow_mut().push("b")).unwrap();
    }
    assert_eq!(*log.borrow(), ["b", "g", "c1", "a"]);
}

/// Test that a child built in caller storage never touches the heap
#[test]
fn test_child_in_caller_storage() {
    let mut storage = [MaybeUninit::<u8>::uninit(); 1024];
    let mut parent = Arena::new().unwrap();
    let child = parent.create_child_in(&mut storage).unwrap();

    let ptr = parent.child_mut(child).alloc_str("in place").unwrap();
    assert_eq!(parent.child(child).stats().pages_grown, 0);
    assert_eq!(parent.stats().big_blocks, 0);
    unsafe {
        let bytes = std::slice::from_raw_parts(ptr.as_ptr(), 9);
        assert_eq!(bytes, b"in place\0");
    }
    parent.destroy_child(child);
}

/// Test that in-place root arenas grow onto the heap when storage runs out
#[test]
fn test_in_place_root_grows() {
    let mut storage = [MaybeUninit::<u8>::uninit(); 128];
    let mut arena = Arena::in_place(&mut storage);
    for _ in 0..8 {
        arena.alloc_uninit(1, 100).unwrap();
    }
    assert!(arena.stats().pages_grown > 0);
}

/// Test that children inherit the configuration of their parent
#[test]
fn test_child_inherits_config() {
    let config = ArenaConfig::new()
        .with_first_page_size(1024)
        .with_max_page_size(8192);
    let factory = ArenaFactory::new(config).unwrap();
    let mut parent = factory.create_arena().unwrap();
    let child = parent.create_child().unwrap();
    assert_eq!(parent.child(child).config(), config);

    let grandchild = parent.child_mut(child).create_child().unwrap();
    assert_eq!(
        parent.child(child).child(grandchild).config().first_page_size,
        1024
    );
}

/// Test that invalid configurations are rejected up front
#[test]
fn test_invalid_config() {
    let config = ArenaConfig::new().with_first_page_size(64);
    assert!(matches!(
        Arena::with_config(config),
        Err(Error::InvalidConfig { .. })
    ));
}

/// Test that many short-lived children recycle their parent's slots
#[test]
fn test_child_churn() {
    let mut parent = Arena::new().unwrap();
    let mut previous = None;
    for round in 0..64 {
        let child = parent.create_child().unwrap();
        let arena = parent.child_mut(child);
        let ptr = arena.alloc_copy(&[round as u8; 300]).unwrap();
        unsafe { assert_eq!(*ptr.as_ptr().add(299), round as u8) };
        parent.destroy_child(child);
        if let Some(previous) = previous {
            assert_ne!(previous, child);
        }
        previous = Some(child);
    }
    let stats = parent.stats();
    assert_eq!(stats.children, 0);
    assert_eq!(stats.big_blocks, 0);
}

/// Test that a child swapped out of its parent stays usable after the parent is gone
#[test]
fn test_swapped_out_child_survives_parent() {
    let log = RefCell::new(Vec::new());
    let mut parent = Arena::new().unwrap();
    let id = parent.create_child().unwrap();
    let first = parent.child_mut(id).alloc_copy(&[9u8; 20]).unwrap();
    parent
        .child_mut(id)
        .defer(|| log.borrow_mut().push("child"))
        .unwrap();

    let mut stolen = std::mem::replace(parent.child_mut(id), Arena::new().unwrap());
    parent.destroy();
    assert!(log.borrow().is_empty());

    let mut blocks = Vec::new();
    for i in 0..8u8 {
        blocks.push((i, stolen.alloc_copy(&[i; 20]).unwrap()));
        // Fresh heap memory must never alias a live arena block.
        let noise = vec![0xaau8; 528];
        assert!(noise.iter().all(|&b| b == 0xaa));
    }
    unsafe {
        assert!(std::slice::from_raw_parts(first.as_ptr(), 20).iter().all(|&b| b == 9));
        for (i, ptr) in blocks {
            assert!(std::slice::from_raw_parts(ptr.as_ptr(), 20).iter().all(|&b| b == i));
        }
    }

    stolen.destroy();
    assert_eq!(*log.borrow(), ["child"]);
}

/// Test that an in-place arena refuses a configuration that does not validate
#[test]
fn test_in_place_with_invalid_config_is_an_error() {
    let mut storage = [MaybeUninit::<u8>::uninit(); 64];
    let config = ArenaConfig::new()
        .with_first_page_size(64)
        .with_max_page_size(64);
    assert!(matches!(
        Arena::in_place_with_config(&mut storage, config),
        Err(Error::InvalidConfig { .. })
    ));

    let mut arena = Arena::in_place_with_config(&mut storage, ArenaConfig::new()).unwrap();
    let id = arena.create_child().unwrap();
    let child = arena.detach_child(id);
    assert_eq!(child.stats().page_remaining, 512);
}
