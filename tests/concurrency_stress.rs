//! Concurrent writers/readers stress tests

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vfs_content_store::{ContentStore, ContentStoreBuilder, ProjectContext, PublishTag, ResourceId};

fn shared_store(temp_dir: &TempDir) -> Arc<ContentStore> {
    Arc::new(
        ContentStoreBuilder::new()
            .path(temp_dir.path().join("concurrent.db"))
            .busy_timeout(Duration::from_secs(30))
            .max_versions(-1)
            .build()
            .unwrap(),
    )
}

#[test]
fn test_concurrent_writers_on_different_resources() {
    let temp_dir = TempDir::new().unwrap();
    let store = shared_store(&temp_dir);

    let handles: Vec<_> = (0..8)
        .map(|thread_id| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut written = Vec::new();
                for i in 0..20 {
                    let id = ResourceId::new();
                    let len = rng.gen_range(0..32 * 1024);
                    let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                    store.create_offline_content(id, &payload).unwrap();
                    written.push((id, payload));
                    if i % 5 == 0 {
                        std::thread::yield_now();
                    }
                }
                (thread_id, written)
            })
        })
        .collect();

    for h in handles {
        let (_thread_id, written) = h.join().unwrap();
        for (id, payload) in written {
            assert_eq!(store.read_content(id, ProjectContext::Offline).unwrap(), payload);
        }
    }
}

#[test]
fn test_concurrent_publishes_on_same_resource() {
    let temp_dir = TempDir::new().unwrap();
    let store = shared_store(&temp_dir);
    let r = ResourceId::new();
    let next_tag = Arc::new(AtomicUsize::new(1));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let next_tag = next_tag.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let tag = next_tag.fetch_add(1, Ordering::SeqCst) as i64;
                    let payload = format!("tag {}", tag);
                    store
                        .publish(r, payload.as_bytes(), PublishTag::new(tag))
                        .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // Publishes are serialized: every one but the last left exactly one backup
    let backups = store.list_backups(r).unwrap();
    assert_eq!(backups.len(), 39);

    let versions: Vec<i64> = backups.iter().map(|b| b.version_id.value()).collect();
    assert_eq!(versions, (1..=39).collect::<Vec<_>>());

    for backup in &backups {
        let content = store.read_backup_content(backup.backup_id).unwrap();
        assert_eq!(content, format!("tag {}", backup.publish_tag.value()).into_bytes());
    }

    let online = store.read_content(r, ProjectContext::Online).unwrap();
    assert!(String::from_utf8(online).unwrap().starts_with("tag "));
}

#[test]
fn test_readers_during_writes() {
    let temp_dir = TempDir::new().unwrap();
    let store = shared_store(&temp_dir);

    let ids: Vec<ResourceId> = (0..10).map(|_| ResourceId::new()).collect();
    for id in &ids {
        store.write_offline_content(*id, &[0u8; 4096]).unwrap();
    }
    let ids = Arc::new(ids);

    let handles: Vec<_> = (0..6)
        .map(|thread_id| {
            let store = store.clone();
            let ids = ids.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for round in 0..50u8 {
                    let id = ids[rng.gen_range(0..ids.len())];
                    if thread_id < 2 {
                        store.write_offline_content(id, &[round; 4096]).unwrap();
                    } else {
                        // A row is always complete: every byte comes from one write
                        let content = store.read_content(id, ProjectContext::Offline).unwrap();
                        assert_eq!(content.len(), 4096);
                        assert!(content.iter().all(|b| *b == content[0]));
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
