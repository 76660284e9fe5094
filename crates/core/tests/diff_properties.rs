//! Replay properties of the differencer over on-disk snapshots

use feed_core::{
    diff_snapshots, Change, ChangeKind, DiffEvent, HandleRegistry, IdOrdering, MonitorCheckpoint,
    SnapshotRecord, SnapshotStore,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tempfile::TempDir;

/// Generate a sorted, id-unique snapshot from a seeded RNG
fn random_snapshot(rng: &mut ChaCha8Rng, universe: u32) -> Vec<SnapshotRecord> {
    let mut items = BTreeMap::new();
    for id in 0..universe {
        if rng.gen_bool(0.6) {
            let fp = rng.gen_range(0..3u8);
            items.insert(format!("item-{:05}", id), format!("fp{}", fp));
        }
    }
    items
        .into_iter()
        .map(|(id, fp)| SnapshotRecord::new(id, fp.as_str()))
        .collect()
}

fn write(dir: &Path, name: &str, records: &[SnapshotRecord]) -> anyhow::Result<SnapshotStore> {
    let mut writer = SnapshotStore::create(&dir.join(name), false)?;
    for record in records {
        writer.write(record)?;
    }
    Ok(writer.finish()?)
}

/// Downstream index model: upsert is last-write-wins, delete of a missing id is a no-op
fn apply(index: &mut BTreeMap<String, String>, change: &Change) {
    match change.kind() {
        ChangeKind::Upsert => {
            let record = serde_record(change);
            index.insert(record.id, record.fingerprint.to_string());
        }
        ChangeKind::Delete => {
            index.remove(change.document_id());
        }
    }
}

fn serde_record(change: &Change) -> SnapshotRecord {
    let data = change.handle().encode_data().expect("record handle encodes");
    SnapshotRecord::decode(&data).expect("record handle decodes")
}

fn as_index(records: &[SnapshotRecord]) -> BTreeMap<String, String> {
    records
        .iter()
        .map(|r| (r.id.clone(), r.fingerprint.to_string()))
        .collect()
}

#[test]
fn test_replay_reproduces_current_snapshot() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let registry = HandleRegistry::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    for round in 0..25 {
        let previous = random_snapshot(&mut rng, 200);
        let current = random_snapshot(&mut rng, 200);

        let prev_store = write(temp_dir.path(), &format!("{}-prev.snap", round), &previous)?;
        let cur_store = write(temp_dir.path(), &format!("{}-cur.snap", round), &current)?;

        let mut changes = Vec::new();
        for (offset, event) in diff_snapshots(
            prev_store.read()?,
            cur_store.read()?,
            IdOrdering::Lexicographic,
        )
        .enumerate()
        {
            let checkpoint = MonitorCheckpoint::new("m", 2, offset as u64 + 1);
            let change = Change::from_event(event?, checkpoint);
            // Every change survives its own wire encoding
            changes.push(Change::decode(&change.encode(&registry)?, &registry)?);
        }

        let mut index = as_index(&previous);
        for change in &changes {
            apply(&mut index, change);
        }
        assert_eq!(index, as_index(&current), "round {} did not converge", round);

        // Delete ids = ids(P) - ids(C)
        let prev_ids: BTreeSet<_> = previous.iter().map(|r| r.id.clone()).collect();
        let cur_ids: BTreeSet<_> = current.iter().map(|r| r.id.clone()).collect();
        let deleted: BTreeSet<_> = changes
            .iter()
            .filter(|c| c.kind() == ChangeKind::Delete)
            .map(|c| c.document_id().to_string())
            .collect();
        assert_eq!(deleted, prev_ids.difference(&cur_ids).cloned().collect());

        // Upsert ids = new or fingerprint-changed ids
        let prev_index = as_index(&previous);
        let expected_upserts: BTreeSet<_> = current
            .iter()
            .filter(|r| prev_index.get(&r.id) != Some(&r.fingerprint.to_string()))
            .map(|r| r.id.clone())
            .collect();
        let upserted: BTreeSet<_> = changes
            .iter()
            .filter(|c| c.kind() == ChangeKind::Upsert)
            .map(|c| c.document_id().to_string())
            .collect();
        assert_eq!(upserted, expected_upserts);
    }

    Ok(())
}

#[test]
fn test_replaying_twice_is_harmless() -> anyhow::Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let previous = random_snapshot(&mut rng, 100);
    let current = random_snapshot(&mut rng, 100);

    let changes: Vec<Change> = diff_snapshots(
        previous.iter().cloned().map(Ok),
        current.iter().cloned().map(Ok),
        IdOrdering::Lexicographic,
    )
    .map(|event| event.map(|e| Change::from_event(e, MonitorCheckpoint::initial("m"))))
    .collect::<Result<_, _>>()?;

    let mut index = as_index(&previous);
    for change in changes.iter().chain(changes.iter()) {
        apply(&mut index, change);
    }
    assert_eq!(index, as_index(&current));

    Ok(())
}

#[test]
fn test_worked_example() {
    let previous = vec![
        SnapshotRecord::new("1", "a"),
        SnapshotRecord::new("2", "b"),
        SnapshotRecord::new("3", "c"),
    ];
    let current = vec![
        SnapshotRecord::new("2", "b"),
        SnapshotRecord::new("3", "x"),
        SnapshotRecord::new("4", "d"),
    ];

    let events: Vec<DiffEvent> = diff_snapshots(
        previous.into_iter().map(Ok),
        current.into_iter().map(Ok),
        IdOrdering::Numeric,
    )
    .collect::<Result<_, _>>()
    .unwrap();

    assert_eq!(
        events,
        vec![
            DiffEvent::Delete("1".into()),
            DiffEvent::Upsert(SnapshotRecord::new("3", "x")),
            DiffEvent::Upsert(SnapshotRecord::new("4", "d")),
        ]
    );
}
