//! Snapshot restore, snapshot/replay equivalence, and compaction.

mod support;

use std::sync::Arc;

use eventory::{
    EventSourcedRepository, EventStore, EveryNEvents, InMemoryListClient, ListSnapshotStore,
    Repository, SnapshotManager, SnapshotStore,
};
use support::{list_event_store, Guild};

fn snapshot_manager() -> Arc<SnapshotManager> {
    let store = ListSnapshotStore::new(Arc::new(InMemoryListClient::new()));
    // A threshold high enough that the background path stays quiet;
    // tests snapshot deterministically through snapshot_now.
    Arc::new(SnapshotManager::new(
        Arc::new(store),
        Arc::new(EveryNEvents::new(1000)),
    ))
}

/// Save a guild with 5 events and snapshot it at version 5.
fn seed_guild_with_snapshot(
    repo: &EventSourcedRepository<eventory::ListEventStore<InMemoryListClient>, Guild>,
    manager: &SnapshotManager,
) {
    let mut guild = Guild::found("guild-x", "Miners");
    guild.join("alice");
    guild.join("bob");
    guild.join("carol");
    guild.join("dave");
    repo.save(&mut guild).unwrap();
    assert_eq!(guild.root.current_version(), 5);

    manager.snapshot_now(&guild).unwrap();
}

#[test]
fn restore_replays_only_events_after_the_snapshot() {
    let store = list_event_store();
    let manager = snapshot_manager();
    let repo: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(Arc::clone(&store)).with_snapshots(Arc::clone(&manager));

    seed_guild_with_snapshot(&repo, &manager);

    // Events 6, 7, 8 land after the snapshot.
    let mut guild = repo.get_by_id("guild-x").unwrap();
    guild.deposit("iron", 10);
    guild.deposit("iron", 5);
    guild.deposit("silver", 2);
    repo.save(&mut guild).unwrap();

    let restored = repo.get_by_id("guild-x").unwrap();
    // The instrumentation counter proves the snapshot short-circuited
    // replay: 3 events applied, not 8.
    assert_eq!(restored.applied, 3);
    assert_eq!(restored.root.current_version(), 8);
    assert_eq!(restored.name, "Miners");
    assert_eq!(restored.members, vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(restored.stock["iron"], 15);
    assert_eq!(restored.stock["silver"], 2);
}

#[test]
fn snapshot_restore_equals_full_replay() {
    let store = list_event_store();
    let manager = snapshot_manager();
    let with_snapshots: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(Arc::clone(&store)).with_snapshots(Arc::clone(&manager));
    let replay_only: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(Arc::clone(&store));

    seed_guild_with_snapshot(&with_snapshots, &manager);
    let mut guild = with_snapshots.get_by_id("guild-x").unwrap();
    guild.deposit("gold", 1);
    with_snapshots.save(&mut guild).unwrap();

    let via_snapshot = with_snapshots.get_by_id("guild-x").unwrap();
    let via_replay = replay_only.get_by_id("guild-x").unwrap();

    assert_eq!(via_snapshot.name, via_replay.name);
    assert_eq!(via_snapshot.members, via_replay.members);
    assert_eq!(via_snapshot.stock, via_replay.stock);
    assert_eq!(
        via_snapshot.root.current_version(),
        via_replay.root.current_version()
    );
    // The copies differ only in how much history they touched.
    assert_eq!(via_snapshot.applied, 1);
    assert_eq!(via_replay.applied, 6);
}

#[test]
fn compaction_behind_a_snapshot_keeps_reads_working() {
    let store = list_event_store();
    let manager = snapshot_manager();
    let repo: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(Arc::clone(&store)).with_snapshots(Arc::clone(&manager));

    seed_guild_with_snapshot(&repo, &manager);

    // Snapshot at version 5 covers everything below it.
    let removed = store.compact("guild-x", "guild", 5).unwrap();
    assert_eq!(removed, 4);

    // Versions 1-4 are gone for good.
    let early = store.load("guild-x", "guild", 1, 4).unwrap();
    assert!(early.is_empty());
    // Version 5 survives.
    let kept = store.load("guild-x", "guild", 1, 0).unwrap();
    let versions: Vec<u64> = kept.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![5]);

    // Rehydration still works through the snapshot.
    let restored = repo.get_by_id("guild-x").unwrap();
    assert_eq!(restored.root.current_version(), 5);
    assert_eq!(restored.members, vec!["alice", "bob", "carol", "dave"]);
}

#[test]
fn aggregate_without_snapshot_replays_from_scratch() {
    let store = list_event_store();
    let manager = snapshot_manager();
    let repo: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(Arc::clone(&store)).with_snapshots(Arc::clone(&manager));

    let mut guild = Guild::found("guild-y", "Haulers");
    guild.join("erin");
    repo.save(&mut guild).unwrap();

    let restored = repo.get_by_id("guild-y").unwrap();
    assert_eq!(restored.applied, 2);
    assert_eq!(restored.name, "Haulers");
}

#[test]
fn background_snapshot_lands_after_policy_fires() {
    let snapshot_store: Arc<dyn SnapshotStore> = Arc::new(ListSnapshotStore::new(Arc::new(
        InMemoryListClient::new(),
    )));
    let manager = Arc::new(SnapshotManager::new(
        Arc::clone(&snapshot_store),
        Arc::new(EveryNEvents::new(3)),
    ));
    let repo: EventSourcedRepository<_, Guild> =
        EventSourcedRepository::new(list_event_store()).with_snapshots(Arc::clone(&manager));

    let mut guild = Guild::found("guild-z", "Scouts");
    guild.join("fay");
    guild.join("gus");
    repo.save(&mut guild).unwrap();

    // Three events crossed the threshold; the write is asynchronous, so
    // poll briefly instead of assuming it landed already.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        if snapshot_store.exists("guild-z", "guild").unwrap() {
            let record = snapshot_store.load_latest("guild-z", "guild").unwrap();
            assert_eq!(record.version, 3);
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "background snapshot never landed"
        );
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
