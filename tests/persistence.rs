//! Restart behavior over memory and file backends.

use std::fs::OpenOptions;
use std::io::Write;

use tempfile::TempDir;
use versionbits::{
    BlockHeader, DeploymentParams, DeploymentStatus, FileBackend, FileBackendConfig, Hash,
    MemoryBackend, SnapshotIndex, SubscriptionConfig, SubscriptionFilter, VersionBits,
    VersionBitsConfig, VersionBitsError, VersionBitsEvent,
};

const SIGNAL_BIT0: u32 = 0x2000_0001;
const NO_SIGNAL: u32 = 0x2000_0000;

fn block_hash(height: u64) -> Hash {
    Hash::from_bytes(format!("main-{}", height).as_bytes())
}

fn header(height: u64, version: u32) -> BlockHeader {
    BlockHeader {
        version,
        timestamp: 10 + height as u32,
        hash: block_hash(height),
        prev_hash: block_hash(height - 1),
    }
}

fn foo_config() -> VersionBitsConfig {
    VersionBitsConfig::new(20, 15, vec![DeploymentParams::new("foo", 0, 5, 105)])
}

fn open_file(dir: &TempDir) -> VersionBits<FileBackend> {
    let backend = FileBackend::open(FileBackendConfig::at(dir.path())).unwrap();
    VersionBits::open(foo_config(), backend).unwrap()
}

#[test]
fn test_memory_restart_resumes_exactly() {
    let vb = VersionBits::open(foo_config(), MemoryBackend::new()).unwrap();
    for height in 1..=30 {
        vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    let state = vb.snapshot();
    let hash = vb.state_hash().unwrap();

    let backend = vb.into_backend();
    let vb = VersionBits::open(foo_config(), backend).unwrap();
    assert_eq!(vb.snapshot(), state);
    assert_eq!(vb.state_hash().unwrap(), hash);
    assert_eq!(vb.index(), Some(SnapshotIndex(30)));
    assert_eq!(vb.tip().unwrap().height, 30);

    // Resumes at the next height, not from scratch
    assert!(vb.add_block(1, header(1, SIGNAL_BIT0)).is_err());
}

#[test]
fn test_restart_matches_uninterrupted_replay() {
    let first = VersionBits::open(foo_config(), MemoryBackend::new()).unwrap();
    for height in 1..=45 {
        first.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    let restarted = VersionBits::open(foo_config(), first.into_backend()).unwrap();

    let fresh = VersionBits::open(foo_config(), MemoryBackend::new()).unwrap();
    for height in 1..=45 {
        fresh.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }

    assert_eq!(restarted.deployments(), fresh.deployments());
    assert_eq!(restarted.snapshot(), fresh.snapshot());
    assert_eq!(restarted.state_hash().unwrap(), fresh.state_hash().unwrap());
    assert_eq!(restarted.tip(), fresh.tip());
    assert_eq!(restarted.index(), fresh.index());

    // And they stay in step afterwards
    for height in 46..=60 {
        restarted.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        fresh.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    assert_eq!(restarted.state_hash().unwrap(), fresh.state_hash().unwrap());
}

#[test]
fn test_restart_continues_activation() {
    let vb = VersionBits::open(foo_config(), MemoryBackend::new()).unwrap();
    for height in 1..=30 {
        vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    let vb = VersionBits::open(foo_config(), vb.into_backend()).unwrap();
    for height in 31..=60 {
        vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::Activated);
    assert_eq!(vb.get("foo").unwrap().activation_height, Some(60));
}

#[test]
fn test_restored_state_wins_over_config() {
    let vb = VersionBits::open(foo_config(), MemoryBackend::new()).unwrap();
    for height in 1..=20 {
        vb.add_block(height, header(height, NO_SIGNAL)).unwrap();
    }

    let changed = VersionBitsConfig::new(20, 15, vec![DeploymentParams::new("bar", 3, 5, 105)]);
    let vb = VersionBits::open(changed, vb.into_backend()).unwrap();
    assert!(vb.get("bar").is_none());
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::Started);
}

#[test]
fn test_ready_is_announced_once_loaded() {
    let vb = VersionBits::new(foo_config(), MemoryBackend::new()).unwrap();
    let lifecycle = vb.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::lifecycle(),
        ..Default::default()
    });
    assert!(lifecycle.try_recv().is_err());

    vb.load().unwrap();
    vb.load().unwrap();
    assert_eq!(lifecycle.drain(), vec![VersionBitsEvent::Ready]);
}

#[test]
fn test_file_restart_resumes_exactly() {
    let dir = TempDir::new().unwrap();

    let (state, hash) = {
        let vb = open_file(&dir);
        for height in 1..=45 {
            vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        }
        (vb.snapshot(), vb.state_hash().unwrap())
    };

    let vb = open_file(&dir);
    assert_eq!(vb.snapshot(), state);
    assert_eq!(vb.state_hash().unwrap(), hash);
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::LockedIn);

    vb.add_block(46, header(46, SIGNAL_BIT0)).unwrap();
    assert_eq!(vb.tip().unwrap().height, 46);
}

#[test]
fn test_file_restart_after_disconnect() {
    let dir = TempDir::new().unwrap();

    {
        let vb = open_file(&dir);
        for height in 1..=25 {
            vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        }
        vb.remove_block(25, header(25, SIGNAL_BIT0)).unwrap();
        vb.remove_block(24, header(24, SIGNAL_BIT0)).unwrap();
    }

    let vb = open_file(&dir);
    assert_eq!(vb.tip().unwrap().height, 23);
    assert_eq!(vb.index(), Some(SnapshotIndex(23)));
    assert_eq!(vb.get("foo").unwrap().count, 4);
}

#[test]
fn test_second_tracker_on_same_directory_is_locked() {
    let dir = TempDir::new().unwrap();
    let _vb = open_file(&dir);

    let result = FileBackend::open(FileBackendConfig::at(dir.path()));
    assert!(matches!(result, Err(VersionBitsError::Locked)));
}

#[test]
fn test_torn_write_recovers_last_acknowledged_block() {
    let dir = TempDir::new().unwrap();

    let state = {
        let vb = open_file(&dir);
        for height in 1..=12 {
            vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        }
        vb.snapshot()
    };

    // A frame that claims more bytes than were written
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("state.log"))
        .unwrap();
    log.write_all(&500u32.to_le_bytes()).unwrap();
    log.write_all(&[7u8; 40]).unwrap();
    drop(log);

    let vb = open_file(&dir);
    assert_eq!(vb.snapshot(), state);
    vb.add_block(13, header(13, SIGNAL_BIT0)).unwrap();
    drop(vb);

    let vb = open_file(&dir);
    assert_eq!(vb.tip().unwrap().height, 13);
}

#[test]
fn test_compaction_preserves_state() {
    let dir = TempDir::new().unwrap();
    let config = FileBackendConfig {
        compact_after: 10,
        ..FileBackendConfig::at(dir.path())
    };

    let state = {
        let backend = FileBackend::open(config.clone()).unwrap();
        let vb = VersionBits::open(foo_config().with_reorg_window(5), backend).unwrap();
        for height in 1..=50 {
            vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        }
        let state = vb.snapshot();
        let backend = vb.into_backend();
        assert!(backend.batches_in_log() <= 10);
        state
    };

    let backend = FileBackend::open(config).unwrap();
    let vb = VersionBits::open(foo_config(), backend).unwrap();
    assert_eq!(vb.snapshot(), state);
}

#[test]
fn test_failed_compaction_does_not_fail_blocks() {
    let dir = TempDir::new().unwrap();
    let config = FileBackendConfig {
        compact_after: 3,
        ..FileBackendConfig::at(dir.path())
    };
    // Occupy the rewrite target so every compaction attempt fails
    let blocker = dir.path().join("state.log.compact");
    std::fs::create_dir(&blocker).unwrap();

    let state = {
        let backend = FileBackend::open(config.clone()).unwrap();
        let vb = VersionBits::open(foo_config(), backend).unwrap();
        for height in 1..=5 {
            vb.add_block(height, header(height, SIGNAL_BIT0)).unwrap();
        }
        assert_eq!(vb.halted(), None);
        vb.snapshot()
    };
    std::fs::remove_dir(&blocker).unwrap();

    let backend = FileBackend::open(config).unwrap();
    let vb = VersionBits::open(foo_config(), backend).unwrap();
    assert_eq!(vb.snapshot(), state);
    assert_eq!(vb.tip().unwrap().height, 5);
    assert_eq!(vb.index(), Some(SnapshotIndex(5)));
    vb.add_block(6, header(6, SIGNAL_BIT0)).unwrap();
}
