//! Disconnect handling: snapshot restore, notifications and depth limits.

use versionbits::{
    BlockHeader, DeploymentParams, DeploymentStatus, ErrorKind, Hash, MemoryBackend, SnapshotIndex,
    SubscriptionConfig, SubscriptionFilter, VersionBits, VersionBitsConfig, VersionBitsError,
    VersionBitsEvent,
};

const SIGNAL_BIT0: u32 = 0x2000_0001;
const NO_SIGNAL: u32 = 0x2000_0000;

fn block_hash(fork: &str, height: u64) -> Hash {
    Hash::from_bytes(format!("{}-{}", fork, height).as_bytes())
}

fn header_on(fork: &str, parent_fork: &str, height: u64, version: u32) -> BlockHeader {
    BlockHeader {
        version,
        timestamp: 10 + height as u32,
        hash: block_hash(fork, height),
        prev_hash: block_hash(parent_fork, height - 1),
    }
}

fn header(height: u64, version: u32) -> BlockHeader {
    header_on("main", "main", height, version)
}

fn tracker(config: VersionBitsConfig) -> VersionBits<MemoryBackend> {
    VersionBits::open(config, MemoryBackend::new()).unwrap()
}

fn foo_config() -> VersionBitsConfig {
    VersionBitsConfig::new(20, 15, vec![DeploymentParams::new("foo", 0, 5, 105)])
}

fn connect(vb: &VersionBits<MemoryBackend>, from: u64, to: u64, version: u32) {
    for height in from..=to {
        vb.add_block(height, header(height, version)).unwrap();
    }
}

#[test]
fn test_disconnect_restores_previous_snapshot() {
    let vb = tracker(foo_config());
    connect(&vb, 1, 24, SIGNAL_BIT0);
    let before = vb.snapshot();
    let hash_before = vb.state_hash().unwrap();

    vb.add_block(25, header(25, SIGNAL_BIT0)).unwrap();
    assert_ne!(vb.snapshot(), before);

    let outcome = vb.remove_block(25, header(25, SIGNAL_BIT0)).unwrap();
    assert_eq!(outcome, versionbits::Outcome::Committed(SnapshotIndex(24)));
    assert_eq!(vb.snapshot(), before);
    assert_eq!(vb.state_hash().unwrap(), hash_before);
    assert_eq!(vb.tip().unwrap().height, 24);
    assert_eq!(vb.index(), Some(SnapshotIndex(24)));
}

#[test]
fn test_deep_disconnect_across_boundaries_restores_exact_state() {
    let vb = tracker(foo_config());
    connect(&vb, 1, 15, NO_SIGNAL);
    let before = vb.snapshot();
    let hash_before = vb.state_hash().unwrap();

    // Crosses the boundaries at 20 and 40
    connect(&vb, 16, 45, SIGNAL_BIT0);
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::LockedIn);
    assert_ne!(vb.state_hash().unwrap(), hash_before);

    for height in (16..=45).rev() {
        vb.remove_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    assert_eq!(vb.snapshot(), before);
    assert_eq!(vb.state_hash().unwrap(), hash_before);
    assert_eq!(vb.index(), Some(SnapshotIndex(15)));
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::Defined);

    // The restored state connects exactly as it did the first time
    connect(&vb, 16, 45, SIGNAL_BIT0);
    assert_eq!(vb.get("foo").unwrap().lock_in_height, Some(40));
}

#[test]
fn test_reorg_onto_competing_branch() {
    let vb = tracker(foo_config());
    connect(&vb, 1, 30, SIGNAL_BIT0);

    for height in (26..=30).rev() {
        vb.remove_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    assert_eq!(vb.get("foo").unwrap().count, 6);

    vb.add_block(26, header_on("alt", "main", 26, NO_SIGNAL))
        .unwrap();
    for height in 27..=30 {
        vb.add_block(height, header_on("alt", "alt", height, NO_SIGNAL))
            .unwrap();
    }
    assert_eq!(vb.get("foo").unwrap().count, 6);
    assert_eq!(vb.tip().unwrap().hash, block_hash("alt", 30));
}

#[test]
fn test_disconnect_across_boundary_reverts_status() {
    let vb = tracker(foo_config());
    connect(&vb, 1, 19, NO_SIGNAL);
    vb.add_block(20, header(20, NO_SIGNAL)).unwrap();
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::Started);

    let handle = vb.subscribe(SubscriptionConfig::default());
    vb.remove_block(20, header(20, NO_SIGNAL)).unwrap();
    assert_eq!(vb.get("foo").unwrap().status, DeploymentStatus::Defined);
    assert_eq!(vb.get("foo").unwrap().start_height, None);

    let events = handle.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        VersionBitsEvent::Update { deployment }
            if deployment.id == "foo" && deployment.status == DeploymentStatus::Defined
    )));
    // Restores are not transitions
    assert!(!events.iter().any(|e| matches!(
        e,
        VersionBitsEvent::Status { .. } | VersionBitsEvent::Started { .. }
    )));
    assert!(matches!(events.last(), Some(VersionBitsEvent::Remove { block }) if block.height == 20));
}

#[test]
fn test_disconnect_discards_unknown_deployment() {
    let vb = tracker(foo_config());
    connect(&vb, 1, 10, NO_SIGNAL);
    vb.add_block(11, header(11, 0x2000_0010)).unwrap();
    assert!(vb.get("unknown-4-11").is_some());

    let handle = vb.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::deployments(),
        ..Default::default()
    });
    vb.remove_block(11, header(11, 0x2000_0010)).unwrap();

    assert!(vb.get("unknown-4-11").is_none());
    assert_eq!(vb.deployments().len(), 1);
    assert_eq!(
        handle.drain(),
        vec![VersionBitsEvent::Discarded {
            id: "unknown-4-11".to_string()
        }]
    );
}

#[test]
fn test_reorg_depth_exceeded_halts() {
    let vb = tracker(foo_config().with_reorg_window(5));
    connect(&vb, 1, 20, NO_SIGNAL);

    // Snapshots 15..=20 are retained
    for height in (16..=20).rev() {
        vb.remove_block(height, header(height, NO_SIGNAL)).unwrap();
    }
    let before = vb.snapshot();

    let lifecycle = vb.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::lifecycle(),
        ..Default::default()
    });
    let err = vb.remove_block(15, header(15, NO_SIGNAL)).unwrap_err();
    assert!(matches!(
        err,
        VersionBitsError::ReorgDepthExceeded {
            requested: SnapshotIndex(14),
            oldest: SnapshotIndex(15),
        }
    ));
    assert_eq!(vb.snapshot(), before);
    assert_eq!(vb.tip().unwrap().height, 15);
    assert_eq!(vb.halted(), Some(ErrorKind::ReorgDepthExceeded));

    let events = lifecycle.drain();
    assert!(matches!(
        events.as_slice(),
        [VersionBitsEvent::Error {
            kind: ErrorKind::ReorgDepthExceeded,
            ..
        }]
    ));

    let err = vb.add_block(16, header(16, NO_SIGNAL)).unwrap_err();
    assert!(matches!(err, VersionBitsError::Halted(ErrorKind::ReorgDepthExceeded)));
}

#[test]
fn test_pruning_keeps_reorg_window() {
    let vb = tracker(foo_config().with_reorg_window(10));
    connect(&vb, 1, 40, SIGNAL_BIT0);

    for height in (31..=40).rev() {
        vb.remove_block(height, header(height, SIGNAL_BIT0)).unwrap();
    }
    assert_eq!(vb.index(), Some(SnapshotIndex(30)));
    assert_eq!(vb.tip().unwrap().height, 30);
    assert!(matches!(
        vb.remove_block(30, header(30, SIGNAL_BIT0)),
        Err(VersionBitsError::ReorgDepthExceeded { .. })
    ));
}
