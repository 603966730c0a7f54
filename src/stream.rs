//! Block stream adapter tying the engine, snapshot store and subscribers together.

use crate::config::VersionBitsConfig;
use crate::deployments::Deployment;
use crate::engine::{BlockInput, TransitionEngine, WindowState};
use crate::error::{ErrorKind, Result, VersionBitsError};
use crate::store::{KvBackend, SnapshotStore};
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager, VersionBitsEvent,
};
use crate::types::{BlockEvent, BlockHeader, ChainTip, Hash, SnapshotIndex};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// What happened to a submitted block event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Processed; the store now holds this snapshot index.
    Committed(SnapshotIndex),
    /// Held until persisted state finishes loading.
    Queued,
}

struct Inner<B: KvBackend> {
    store: SnapshotStore<B>,
    /// The single live copy of the window state.
    state: WindowState,
    index: Option<SnapshotIndex>,
    ready: bool,
    /// Events that arrived before `load`, in arrival order.
    pending: VecDeque<BlockEvent>,
    /// Set by the first fatal error.
    halted: Option<ErrorKind>,
}

/// Soft-fork activation tracker fed by connect/disconnect block events.
///
/// Block processing is serialized: each event is fully committed (or
/// rolled back) before the next one is looked at. Queries return owned
/// copies of the state.
pub struct VersionBits<B: KvBackend> {
    config: VersionBitsConfig,
    engine: TransitionEngine,
    inner: Mutex<Inner<B>>,
    subscriptions: SubscriptionManager,
}

impl<B: KvBackend> VersionBits<B> {
    /// Validate the configuration and wrap `backend`, without loading state.
    ///
    /// Until [`load`](Self::load) runs, queries reflect the configured
    /// deployments and submitted blocks are queued.
    pub fn new(config: VersionBitsConfig, backend: B) -> Result<Self> {
        config.validate()?;
        let store = SnapshotStore::open(backend)?;
        let state = WindowState::initial(&config);

        Ok(Self {
            engine: TransitionEngine::new(&config),
            config,
            inner: Mutex::new(Inner {
                store,
                state,
                index: None,
                ready: false,
                pending: VecDeque::new(),
                halted: None,
            }),
            subscriptions: SubscriptionManager::new(),
        })
    }

    /// Construct and load in one step.
    pub fn open(config: VersionBitsConfig, backend: B) -> Result<Self> {
        let tracker = Self::new(config, backend)?;
        tracker.load()?;
        Ok(tracker)
    }

    /// Restore the latest snapshot (or commit the initial state on a first
    /// run), then process any queued events in order.
    ///
    /// If a queued event fails with a store error, it and every event behind
    /// it stay queued; calling `load` again resumes from that event.
    pub fn load(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.ready {
            return self.replay_pending(inner);
        }

        match inner.store.latest()? {
            Some((index, state)) => {
                tracing::info!(
                    index = index.0,
                    height = ?state.tip.map(|t| t.height),
                    deployments = state.deployments.len(),
                    "restored versionbits state"
                );
                inner.state = state;
                inner.index = Some(index);
            }
            None => {
                let index = inner.store.commit(&inner.state)?;
                tracing::info!(
                    deployments = inner.state.deployments.len(),
                    "initialized versionbits state"
                );
                inner.index = Some(index);
            }
        }
        inner.ready = true;
        self.subscriptions.broadcast(VersionBitsEvent::Ready);

        self.replay_pending(inner)
    }

    /// Submit one block event.
    ///
    /// Events are queued until [`load`](Self::load) has run and has drained
    /// everything queued before them.
    pub fn process(&self, event: BlockEvent) -> Result<Outcome> {
        let mut inner = self.inner.lock();
        if !inner.ready || !inner.pending.is_empty() {
            inner.pending.push_back(event);
            return Ok(Outcome::Queued);
        }
        self.apply(&mut inner, event).map(Outcome::Committed)
    }

    pub fn add_block(&self, height: u64, header: BlockHeader) -> Result<Outcome> {
        self.process(BlockEvent::add(height, header))
    }

    pub fn remove_block(&self, height: u64, header: BlockHeader) -> Result<Outcome> {
        self.process(BlockEvent::remove(height, header))
    }

    /// Process events from a channel until it closes or an event fails.
    ///
    /// Returns the number of events processed.
    pub fn run(&self, events: Receiver<BlockEvent>) -> Result<u64> {
        let mut processed = 0;
        for event in events.iter() {
            self.process(event)?;
            processed += 1;
        }
        Ok(processed)
    }

    // --- Queries ---

    /// Copy of a deployment by id.
    pub fn get(&self, id: &str) -> Option<Deployment> {
        self.inner.lock().state.deployments.get(id).cloned()
    }

    /// Copies of all deployments, in registration order.
    pub fn deployments(&self) -> Vec<Deployment> {
        self.inner.lock().state.deployments.to_vec()
    }

    /// Copy of the whole live state.
    pub fn snapshot(&self) -> WindowState {
        self.inner.lock().state.clone()
    }

    /// Hash of the latest committed snapshot.
    pub fn state_hash(&self) -> Result<Hash> {
        self.inner.lock().store.state_hash()
    }

    pub fn tip(&self) -> Option<ChainTip> {
        self.inner.lock().state.tip
    }

    /// Index of the latest committed snapshot (None before `load`).
    pub fn index(&self) -> Option<SnapshotIndex> {
        self.inner.lock().index
    }

    pub fn bip9_count(&self) -> u32 {
        self.inner.lock().state.bip9_count
    }

    /// Current median time past, once enough blocks are buffered.
    pub fn median_time_past(&self) -> Option<u32> {
        self.inner.lock().state.timestamps.median_time_past().ok()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Events waiting for `load` to process them.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// The kind of fatal error that stopped the stream, if any.
    pub fn halted(&self) -> Option<ErrorKind> {
        self.inner.lock().halted
    }

    pub fn config(&self) -> &VersionBitsConfig {
        &self.config
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id)
    }

    /// Release the backend, e.g. to reopen it in a new tracker.
    pub fn into_backend(self) -> B {
        self.inner.into_inner().store.into_inner()
    }

    // --- Processing ---

    fn replay_pending(&self, inner: &mut Inner<B>) -> Result<()> {
        while let Some(event) = inner.pending.front().copied() {
            if let Err(err) = self.apply(inner, event) {
                if inner.halted.is_some() {
                    tracing::warn!(dropped = inner.pending.len(), "discarding queued events after fatal error");
                    inner.pending.clear();
                }
                return Err(err);
            }
            inner.pending.pop_front();
        }
        Ok(())
    }

    fn apply(&self, inner: &mut Inner<B>, event: BlockEvent) -> Result<SnapshotIndex> {
        if let Some(kind) = inner.halted {
            return Err(VersionBitsError::Halted(kind));
        }

        let result = if event.add {
            self.connect(inner, &event)
        } else {
            self.disconnect(inner, &event)
        };

        result.map_err(|err| {
            if err.is_fatal() {
                tracing::error!(height = event.height, error = %err, "halting block stream");
                inner.halted = Some(err.kind());
            } else {
                tracing::warn!(height = event.height, error = %err, "block processing failed");
            }
            self.subscriptions.broadcast(VersionBitsEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
            });
            err
        })
    }

    fn connect(&self, inner: &mut Inner<B>, event: &BlockEvent) -> Result<SnapshotIndex> {
        check_connect(inner.state.tip, event)?;

        let interval = self.config.log_interval;
        if interval > 0 && event.height % interval == 0 {
            tracing::info!(
                height = event.height,
                version = %format!("{:#x}", event.header.version),
                "versionbits progress"
            );
        }

        // The live state is only replaced once the commit is acknowledged.
        let mut next = inner.state.clone();
        self.engine.connect(
            &mut next,
            BlockInput {
                height: event.height,
                version: event.header.version,
                timestamp: event.header.timestamp,
            },
        )?;
        next.tip = Some(ChainTip::of(event));
        let events = next.drain_events();

        let index = inner.store.commit(&next)?;
        inner.state = next;
        inner.index = Some(index);

        self.subscriptions.broadcast_all(events);
        self.subscriptions.broadcast_all([
            VersionBitsEvent::Block { block: *event },
            VersionBitsEvent::Add { block: *event },
        ]);

        // The block is committed either way; the next commit prunes again.
        let window = self.config.reorg_window;
        if index.0 > window {
            if let Err(err) = inner.store.prune(SnapshotIndex(index.0 - window)) {
                tracing::warn!(index = index.0, error = %err, "snapshot pruning failed");
            }
        }
        Ok(index)
    }

    fn disconnect(&self, inner: &mut Inner<B>, event: &BlockEvent) -> Result<SnapshotIndex> {
        check_disconnect(inner.state.tip, event)?;

        let target = inner
            .index
            .and_then(SnapshotIndex::prev)
            .ok_or_else(|| VersionBitsError::Sequencing {
                height: event.height,
                reason: "no committed block to disconnect".into(),
            })?;
        if let Some(oldest) = inner.store.oldest_index() {
            if target < oldest {
                return Err(VersionBitsError::ReorgDepthExceeded {
                    requested: target,
                    oldest,
                });
            }
        }

        tracing::warn!(height = event.height, hash = %event.header.hash, "disconnecting block");
        let restored = inner.store.rollback(target)?;
        let events = rollback_events(&inner.state, &restored);
        inner.state = restored;
        inner.index = Some(target);

        self.subscriptions.broadcast_all(events);
        self.subscriptions.broadcast_all([
            VersionBitsEvent::Block { block: *event },
            VersionBitsEvent::Remove { block: *event },
        ]);
        Ok(target)
    }
}

fn check_connect(tip: Option<ChainTip>, event: &BlockEvent) -> Result<()> {
    let tip = match tip {
        Some(tip) => tip,
        None => return Ok(()),
    };
    if event.height != tip.height + 1 {
        return Err(VersionBitsError::Sequencing {
            height: event.height,
            reason: format!("expected height {}", tip.height + 1),
        });
    }
    if event.header.prev_hash != tip.hash {
        return Err(VersionBitsError::Sequencing {
            height: event.height,
            reason: format!("prev hash {} does not match tip {}", event.header.prev_hash, tip.hash),
        });
    }
    Ok(())
}

fn check_disconnect(tip: Option<ChainTip>, event: &BlockEvent) -> Result<()> {
    let tip = tip.ok_or_else(|| VersionBitsError::Sequencing {
        height: event.height,
        reason: "no block to disconnect".into(),
    })?;
    if event.height != tip.height || event.header.hash != tip.hash {
        return Err(VersionBitsError::Sequencing {
            height: event.height,
            reason: format!("disconnect does not match tip {} at height {}", tip.hash, tip.height),
        });
    }
    Ok(())
}

/// Updates for deployments the rollback changed, discards for ones it removed.
fn rollback_events(before: &WindowState, after: &WindowState) -> Vec<VersionBitsEvent> {
    let mut events: Vec<VersionBitsEvent> = after
        .deployments
        .iter()
        .filter(|dep| before.deployments.get(&dep.id) != Some(*dep))
        .map(|dep| VersionBitsEvent::Update {
            deployment: dep.clone(),
        })
        .collect();
    events.extend(
        before
            .deployments
            .iter()
            .filter(|dep| after.deployments.get(&dep.id).is_none())
            .map(|dep| VersionBitsEvent::Discarded { id: dep.id.clone() }),
    );
    events
}
