//! Sync orchestration
//!
//! [`SyncManager`] ties the whole pipeline together: local sim samples go
//! through the diff engine and out onto the bus, inbound envelopes are
//! filtered (echo, duplicates, malformed) and applied through the command
//! applier or the animated reconciler, and converged state is persisted
//! periodically.
//!
//! The caller owns the cadence: it pumps `handle_local_sample` with fresh
//! sim reads and `handle_message` with inbound bus payloads from whatever
//! loop drives its transport. Animation writes arrive asynchronously on
//! an internal pump thread so a slow simulator write never stalls the
//! hot path.
//!
//! Echo suppression is layered. `originId` is authoritative: a message
//! stamped with our own instance id is ours coming back. The `serverTime`
//! match is kept as a fallback for relays that strip metadata, and a
//! per-origin sequence floor drops duplicated deliveries.

use crate::applier::CommandApplier;
use crate::config::{Role, SyncConfig};
use crate::diff::{flatten, DiffEngine, DiffPayload};
use crate::error::Result;
use crate::notify::{ChangeListener, ListenerSet};
use crate::reconciler::{AnimatedReconciler, WriteSink};
use crate::sim::SimAccess;
use skysync_core::{time, Catalog, DiffResult, Snapshot, StateStore, Value, ValueMap};
use skysync_netcode::{MessageKind, NetworkBus, WireEnvelope};
use skysync_store::SnapshotStore;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Diff baseline id for locally sampled state
const LOCAL_SOURCE: &str = "local";

/// Rolling window over which [`SyncManager::diff_rate`] is measured
const RATE_WINDOW: Duration = Duration::from_secs(10);

enum PumpMsg {
    Write(String, Value),
    Shutdown,
}

/// Routes animation writes onto the manager's pump thread
struct ChannelSink {
    // mpsc::Sender is !Sync; the reconciler calls from worker threads
    tx: Mutex<Sender<PumpMsg>>,
}

impl WriteSink for ChannelSink {
    fn write(&self, path: &str, value: Value) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        // A closed channel means the manager has shut down; the write is
        // intentionally dropped.
        let _ = tx.send(PumpMsg::Write(path.to_string(), value));
    }
}

#[derive(Default)]
struct PumpState {
    first_sample_at: Option<Instant>,
    last_persist: Option<Instant>,
    /// Last outbound serverTime stamp, for monotonicity and echo checks
    last_outbound_time: i64,
    out_sequence: u64,
    /// Highest applied sequence per origin
    seen: HashMap<String, u64>,
    /// Send instants inside the rate window
    sends: VecDeque<Instant>,
}

/// Orchestrates sampling, diffing, filtering, applying, and persistence
pub struct SyncManager {
    config: SyncConfig,
    instance_id: String,
    store: Arc<StateStore>,
    diff: Arc<DiffEngine>,
    applier: Arc<CommandApplier>,
    reconciler: Arc<AnimatedReconciler>,
    bus: Arc<dyn NetworkBus>,
    persistence: Option<SnapshotStore>,
    listeners: ListenerSet,
    state: Mutex<PumpState>,
    control: Mutex<Sender<PumpMsg>>,
    pump: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SyncManager {
    /// Build a manager and start its pump thread
    pub fn new(
        config: SyncConfig,
        catalog: Arc<Catalog>,
        sim: Arc<dyn SimAccess>,
        bus: Arc<dyn NetworkBus>,
    ) -> Arc<Self> {
        Self::with_persistence(config, catalog, sim, bus, None)
    }

    /// Build a manager that also persists converged state
    pub fn with_persistence(
        config: SyncConfig,
        catalog: Arc<Catalog>,
        sim: Arc<dyn SimAccess>,
        bus: Arc<dyn NetworkBus>,
        persistence: Option<SnapshotStore>,
    ) -> Arc<Self> {
        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(generate_instance_id);

        let store = Arc::new(StateStore::with_defaults(catalog.default_paths()));
        if let Some(persistence) = &persistence {
            match persistence.load() {
                Ok(values) if !values.is_empty() => {
                    debug!(entries = values.len(), "restored last-known state");
                    store.seed(&Snapshot::from_values(values));
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "could not restore persisted state"),
            }
        }
        let diff = Arc::new(DiffEngine::with_epsilon(
            Arc::clone(&catalog),
            config.epsilon,
        ));
        let applier = Arc::new(CommandApplier::new(catalog, sim, Arc::clone(&store)));

        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn WriteSink> = Arc::new(ChannelSink {
            tx: Mutex::new(tx.clone()),
        });
        let reconciler = Arc::new(AnimatedReconciler::new(
            &config.animations,
            Arc::clone(&store),
            sink,
        ));

        let manager = Arc::new(Self {
            config,
            instance_id,
            store,
            diff,
            applier,
            reconciler,
            bus,
            persistence,
            listeners: ListenerSet::new(),
            state: Mutex::new(PumpState::default()),
            control: Mutex::new(tx),
            pump: Mutex::new(None),
        });

        let pump_mgr = Arc::clone(&manager);
        let handle = thread::spawn(move || pump_mgr.pump_loop(rx));
        *lock(&manager.pump) = Some(handle);
        manager
    }

    /// This instance's anti-echo identity
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The converged state store
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The animated reconciler (exposed so callers can drain animations)
    pub fn reconciler(&self) -> &Arc<AnimatedReconciler> {
        &self.reconciler
    }

    /// Register an observer of applied remote changes
    pub fn register_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.register(listener);
    }

    /// Ingest one complete local sample of the simulator's variables
    ///
    /// The sample is folded into the store, diffed against the local
    /// baseline, and any change set is sent (client) or broadcast (host).
    /// Nothing is sent during the warm-up window after the first sample,
    /// so the first transmission is a settled full snapshot.
    ///
    /// Transport and persistence failures are logged, never raised; a
    /// change whose send failed stays uncommitted in the diff baseline and
    /// goes out again on the next sample.
    pub fn handle_local_sample(&self, values: &ValueMap) -> Result<()> {
        let flat = flatten(values);
        for (path, value) in flat.iter() {
            self.store.set(path, value.clone());
        }

        let warming = {
            let mut state = lock(&self.state);
            let first = *state.first_sample_at.get_or_insert_with(Instant::now);
            first.elapsed() < self.config.warmup()
        };
        if warming {
            trace!(keys = flat.len(), "sample absorbed during warm-up");
            return Ok(());
        }

        if let Some(payload) = self.diff.compute_diff(LOCAL_SOURCE, values, false) {
            let envelope = match &payload {
                DiffPayload::Full(map) => {
                    let stamp = self.next_stamp();
                    WireEnvelope::snapshot(map.clone(), stamp)
                }
                DiffPayload::Partial(diff) => {
                    for path in &diff.removed {
                        self.store.remove(path);
                    }
                    let stamp = self.next_stamp();
                    single_change(diff)
                        .map(|(path, value)| {
                            WireEnvelope::state_change(path.clone(), value.clone(), stamp)
                        })
                        .unwrap_or_else(|| WireEnvelope::state_diff(diff.to_wire_map(), stamp))
                }
            };
            if let Err(err) = self.transmit(envelope) {
                warn!(%err, "send failed, change resends on the next sample");
                self.uncommit(&payload);
            }
        }

        if let Err(err) = self.maybe_persist(false) {
            warn!(%err, "periodic persist failed");
        }
        Ok(())
    }

    /// Ingest one inbound wire payload
    ///
    /// Malformed payloads are logged and dropped, never fatal. Echoes of
    /// our own messages and stale duplicates are dropped silently.
    pub fn handle_message(&self, payload: &[u8]) -> Result<()> {
        let envelope = match WireEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, len = payload.len(), "dropping malformed message");
                return Ok(());
            }
        };

        if !self.admit(&envelope) {
            return Ok(());
        }

        match envelope.kind {
            MessageKind::Snapshot => self.apply_snapshot(&envelope)?,
            MessageKind::StateChange => self.apply_state_change(&envelope)?,
        }

        if self.config.role == Role::Host && self.config.relay {
            if let Err(err) = self.relay(envelope) {
                warn!(%err, "relay failed, other peers converge on the next diff");
            }
        }
        Ok(())
    }

    /// Send a forced full snapshot, used when a peer (re)connects
    pub fn handle_connected(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        if let Some(DiffPayload::Full(map)) =
            self.diff.compute_diff(LOCAL_SOURCE, &snapshot.values, true)
        {
            let stamp = self.next_stamp();
            if let Err(err) = self.transmit(WireEnvelope::snapshot(map, stamp)) {
                warn!(%err, "snapshot send failed, next sample goes out full");
                self.diff.reset(LOCAL_SOURCE);
            }
        }
        Ok(())
    }

    /// Outbound change sets per second over the last ten seconds
    pub fn diff_rate(&self) -> f64 {
        let mut state = lock(&self.state);
        prune_window(&mut state.sends);
        state.sends.len() as f64 / RATE_WINDOW.as_secs_f64()
    }

    /// Stop animations and the pump thread, persist, and close the bus
    pub fn shutdown(&self) {
        self.reconciler.cancel_all();

        let handle = {
            let tx = lock(&self.control);
            let _ = tx.send(PumpMsg::Shutdown);
            lock(&self.pump).take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        if let Err(err) = self.maybe_persist(true) {
            warn!(%err, "final persist failed");
        }
        self.bus.close();
    }

    // Inbound filtering: echo, fallback stamp match, duplicate sequence.
    fn admit(&self, envelope: &WireEnvelope) -> bool {
        if envelope.origin_id.as_deref() == Some(self.instance_id.as_str()) {
            trace!("dropping echo of own message");
            return false;
        }

        let mut state = lock(&self.state);
        if envelope.origin_id.is_none()
            && state.last_outbound_time != 0
            && envelope.server_time == state.last_outbound_time
        {
            trace!(stamp = envelope.server_time, "dropping suspected echo");
            return false;
        }

        if let (Some(origin), Some(sequence)) = (&envelope.origin_id, envelope.sequence) {
            match state.seen.get(origin) {
                Some(last) if *last >= sequence => {
                    trace!(origin, sequence, "dropping stale duplicate");
                    return false;
                }
                _ => {
                    state.seen.insert(origin.clone(), sequence);
                }
            }
        }
        true
    }

    fn apply_snapshot(&self, envelope: &WireEnvelope) -> Result<()> {
        let Some(payload) = &envelope.payload else {
            warn!("snapshot without payload dropped");
            return Ok(());
        };
        debug!(keys = payload.len(), "applying full snapshot");

        self.store.replace(&Snapshot::from_values(payload.clone()));
        for (path, value) in payload.iter() {
            self.applier.apply(path, value);
        }
        // The peer's full state is now our truth; measure the next local
        // diff against it rather than stale local history.
        self.diff.commit_external_state(LOCAL_SOURCE, payload);

        self.listeners.notify_snapshot(&self.store.snapshot());
        if let Err(err) = self.maybe_persist(true) {
            warn!(%err, "post-snapshot persist failed");
        }
        Ok(())
    }

    fn apply_state_change(&self, envelope: &WireEnvelope) -> Result<()> {
        let diff = match (&envelope.path, &envelope.value, &envelope.payload) {
            (Some(path), Some(value), _) => {
                let mut diff = DiffResult::new();
                diff.changed.insert(path.clone(), value.clone());
                diff
            }
            (_, _, Some(payload)) => DiffResult::from_wire_map(payload),
            _ => {
                warn!("state change without path or payload dropped");
                return Ok(());
            }
        };

        for (path, value) in diff.changed.iter() {
            self.apply_remote_value(path, value);
        }
        for path in &diff.removed {
            self.store.remove(path);
            self.diff.retract_value(LOCAL_SOURCE, path);
            self.listeners.notify_change(path, &Value::Null);
        }
        Ok(())
    }

    fn apply_remote_value(&self, path: &str, value: &Value) {
        if self.reconciler.handles(path) {
            if let Some(target) = value.as_f64_lossy() {
                if let Err(err) = self.reconciler.request_target(path, target) {
                    warn!(path, %err, "animation request failed");
                }
                return;
            }
            warn!(path, kind = value.type_name(), "animated key got non-numeric value");
        }

        self.applier.apply(path, value);
        self.diff.commit_value(LOCAL_SOURCE, path, value);
        self.listeners.notify_change(path, value);
    }

    // Undo the baseline commit of a change set whose send failed: the next
    // sample must re-detect every key so the peer still receives it. A full
    // payload drops the whole baseline; a partial one retracts its changed
    // keys and keeps removed keys present (as Null) so the removal is
    // re-emitted too.
    fn uncommit(&self, payload: &DiffPayload) {
        match payload {
            DiffPayload::Full(_) => self.diff.reset(LOCAL_SOURCE),
            DiffPayload::Partial(diff) => {
                for path in diff.changed.keys() {
                    self.diff.retract_value(LOCAL_SOURCE, path);
                }
                for path in &diff.removed {
                    self.diff.commit_value(LOCAL_SOURCE, path, &Value::Null);
                }
            }
        }
    }

    // Host-side fan-out of a client's change to the other peers. The
    // original origin survives so the author still drops its own echo;
    // only the stamp is ours.
    fn relay(&self, mut envelope: WireEnvelope) -> Result<()> {
        envelope.server_time = self.next_stamp();
        self.bus.broadcast(&envelope.encode()?)?;
        Ok(())
    }

    fn transmit(&self, envelope: WireEnvelope) -> Result<()> {
        let sequence = {
            let mut state = lock(&self.state);
            state.out_sequence += 1;
            state.out_sequence
        };
        let envelope = envelope.with_origin(self.instance_id.clone(), sequence);
        let bytes = envelope.encode()?;

        match self.config.role {
            Role::Host => self.bus.broadcast(&bytes)?,
            Role::Client => self.bus.send(&bytes)?,
        }

        // Only counted once actually on the wire.
        let mut state = lock(&self.state);
        prune_window(&mut state.sends);
        state.sends.push_back(Instant::now());
        Ok(())
    }

    // Unix-millisecond send stamp, forced monotonic per instance.
    fn next_stamp(&self) -> i64 {
        let mut state = lock(&self.state);
        let now = time::unix_millis();
        let stamp = if now <= state.last_outbound_time {
            state.last_outbound_time + 1
        } else {
            now
        };
        state.last_outbound_time = stamp;
        stamp
    }

    fn maybe_persist(&self, force: bool) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let due = force || {
            let state = lock(&self.state);
            state
                .last_persist
                .map(|t| t.elapsed() >= self.config.persist_every())
                .unwrap_or(true)
        };
        if !due {
            return Ok(());
        }

        let snapshot = self.store.snapshot();
        persistence.save_if_changed(&snapshot.values)?;
        lock(&self.state).last_persist = Some(Instant::now());
        Ok(())
    }

    // Pump thread: applies animation writes off the caller's threads.
    // Unlike direct remote applies, these are NOT folded into the local
    // baseline: each intermediate is an ordinary change the next local
    // sample diffs and propagates.
    fn pump_loop(&self, rx: Receiver<PumpMsg>) {
        for msg in rx {
            match msg {
                PumpMsg::Write(path, value) => {
                    self.applier.apply(&path, &value);
                    self.listeners.notify_change(&path, &value);
                }
                PumpMsg::Shutdown => break,
            }
        }
    }
}

fn single_change(diff: &DiffResult) -> Option<(&String, &Value)> {
    if diff.changed.len() == 1 && diff.removed.is_empty() {
        diff.changed.iter().next()
    } else {
        None
    }
}

fn prune_window(sends: &mut VecDeque<Instant>) {
    while let Some(front) = sends.front() {
        if front.elapsed() > RATE_WINDOW {
            sends.pop_front();
        } else {
            break;
        }
    }
}

fn generate_instance_id() -> String {
    format!("peer-{:x}-{:x}", std::process::id(), time::unix_millis())
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnimationSettings;
    use crate::sim::MockSim;
    use skysync_netcode::MemoryBus;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Wraps a [`MemoryBus`] and fails the next outbound send on demand.
    struct FlakyBus {
        inner: MemoryBus,
        fail: AtomicBool,
    }

    impl FlakyBus {
        fn new(inner: MemoryBus) -> Self {
            Self {
                inner,
                fail: AtomicBool::new(false),
            }
        }

        fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        fn outbound(&self) -> skysync_netcode::Result<()> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(skysync_netcode::Error::Disconnected);
            }
            Ok(())
        }
    }

    impl NetworkBus for FlakyBus {
        fn send(&self, payload: &[u8]) -> skysync_netcode::Result<()> {
            self.outbound()?;
            self.inner.send(payload)
        }

        fn broadcast(&self, payload: &[u8]) -> skysync_netcode::Result<()> {
            self.outbound()?;
            self.inner.broadcast(payload)
        }

        fn try_recv(&self) -> skysync_netcode::Result<Option<Vec<u8>>> {
            self.inner.try_recv()
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    fn test_config(role: Role, id: &str) -> SyncConfig {
        let mut config = SyncConfig::for_role(role);
        config.instance_id = Some(id.to_string());
        config.warmup_ms = 0;
        for settings in config.animations.values_mut() {
            settings.step_ms = 1;
        }
        config
    }

    fn manager_with_bus(config: SyncConfig) -> (Arc<SyncManager>, Arc<MockSim>, MemoryBus) {
        let (local, remote) = MemoryBus::pair();
        let sim = Arc::new(MockSim::new());
        let manager = SyncManager::new(
            config,
            Arc::new(Catalog::builtin()),
            sim.clone(),
            Arc::new(local),
        );
        (manager, sim, remote)
    }

    fn sample(entries: &[(&str, Value)]) -> ValueMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn decode_one(remote: &MemoryBus) -> WireEnvelope {
        let payloads = remote.drain();
        assert_eq!(payloads.len(), 1, "expected exactly one message");
        WireEnvelope::decode(&payloads[0]).unwrap()
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        check()
    }

    #[test]
    fn test_first_send_is_full_snapshot_then_compact_diffs() {
        let (manager, _sim, remote) = manager_with_bus(test_config(Role::Host, "host-a"));

        let initial = sample(&[
            ("Controls.Flaps", Value::Float(0.0)),
            ("Systems.LightsOn", Value::Bool(false)),
        ]);
        manager.handle_local_sample(&initial).unwrap();

        let env = decode_one(&remote);
        assert_eq!(env.kind, MessageKind::Snapshot);
        assert_eq!(env.origin_id.as_deref(), Some("host-a"));
        assert_eq!(env.payload.unwrap().len(), 2);

        // Identical sample: nothing to say.
        manager.handle_local_sample(&initial).unwrap();
        assert_eq!(remote.pending(), 0);

        // One flipped bool travels in the compact single-path form.
        let changed = sample(&[
            ("Controls.Flaps", Value::Float(0.0)),
            ("Systems.LightsOn", Value::Bool(true)),
        ]);
        manager.handle_local_sample(&changed).unwrap();

        let env = decode_one(&remote);
        assert_eq!(env.kind, MessageKind::StateChange);
        assert_eq!(env.path.as_deref(), Some("Systems.LightsOn"));
        assert_eq!(env.value, Some(Value::Bool(true)));
        assert!(manager.diff_rate() > 0.0);

        manager.shutdown();
    }

    #[test]
    fn test_warmup_absorbs_samples_without_sending() {
        let mut config = test_config(Role::Host, "host-a");
        config.warmup_ms = 60_000;
        let (manager, _sim, remote) = manager_with_bus(config);

        let values = sample(&[("Controls.Flaps", Value::Float(5.0))]);
        manager.handle_local_sample(&values).unwrap();

        assert_eq!(remote.pending(), 0);
        assert_eq!(manager.store().get_f64("Controls.Flaps"), Some(5.0));

        manager.shutdown();
    }

    #[test]
    fn test_snapshot_then_animated_change() {
        let (manager, sim, remote) = manager_with_bus(test_config(Role::Client, "client-a"));

        // Bootstrap snapshot from the host.
        let mut payload = ValueMap::new();
        payload.insert("Controls.Flaps".to_string(), Value::Float(0.0));
        let snapshot = WireEnvelope::snapshot(payload, 1000).with_origin("host-a", 1);
        manager.handle_message(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(manager.store().get_f64("Controls.Flaps"), Some(0.0));
        // Applying the snapshot already wrote the bootstrap value.
        let base = sim.writes().len();

        // Remote flaps target: animated at step 0.5, twenty writes, the
        // last one exactly on target.
        let change = WireEnvelope::state_change("Controls.Flaps", Value::Float(10.0), 1001)
            .with_origin("host-a", 2);
        manager.handle_message(&change.encode().unwrap()).unwrap();

        manager.reconciler().wait_for("Controls.Flaps");
        assert!(wait_until(2_000, || sim.writes().len() >= base + 20));

        let flap_writes: Vec<f64> = sim.writes()[base..]
            .iter()
            .map(|(_, v)| v.as_f64_lossy().unwrap())
            .collect();
        assert_eq!(flap_writes.len(), 20);
        assert_eq!(*flap_writes.last().unwrap(), 10.0);
        assert_eq!(manager.store().get_f64("Controls.Flaps"), Some(10.0));

        // Animated writes are ordinary changes: the next local sample
        // picks the settled value up and propagates it.
        manager
            .handle_local_sample(&sample(&[("Controls.Flaps", Value::Float(10.0))]))
            .unwrap();
        let env = decode_one(&remote);
        assert_eq!(env.path.as_deref(), Some("Controls.Flaps"));
        assert_eq!(env.value, Some(Value::Float(10.0)));

        manager.shutdown();
    }

    #[test]
    fn test_non_animated_change_applies_immediately() {
        let (manager, sim, _remote) = manager_with_bus(test_config(Role::Client, "client-a"));

        let change = WireEnvelope::state_change("Systems.LightsOn", Value::Bool(true), 500)
            .with_origin("host-a", 1);
        manager.handle_message(&change.encode().unwrap()).unwrap();

        assert_eq!(manager.store().get_bool("Systems.LightsOn"), Some(true));
        assert_eq!(sim.events(), vec![("LANDING_LIGHTS_SET".to_string(), Value::Bool(true))]);

        manager.shutdown();
    }

    #[test]
    fn test_own_origin_is_dropped() {
        let (manager, sim, _remote) = manager_with_bus(test_config(Role::Client, "client-a"));

        let echo = WireEnvelope::state_change("Systems.LightsOn", Value::Bool(true), 500)
            .with_origin("client-a", 1);
        manager.handle_message(&echo.encode().unwrap()).unwrap();

        assert_eq!(manager.store().get_bool("Systems.LightsOn"), None);
        assert!(sim.writes().is_empty());

        manager.shutdown();
    }

    #[test]
    fn test_matching_server_time_without_origin_is_dropped() {
        let (manager, _sim, remote) = manager_with_bus(test_config(Role::Host, "host-a"));

        manager
            .handle_local_sample(&sample(&[("Controls.Flaps", Value::Float(1.0))]))
            .unwrap();
        let stamp = decode_one(&remote).server_time;

        // A transport that loops our send back without metadata.
        let mut echo = WireEnvelope::state_change("Controls.Flaps", Value::Float(9.0), stamp);
        echo.origin_id = None;
        manager.handle_message(&echo.encode().unwrap()).unwrap();

        assert_eq!(manager.store().get_f64("Controls.Flaps"), Some(1.0));

        manager.shutdown();
    }

    #[test]
    fn test_duplicate_sequence_is_dropped() {
        let (manager, sim, _remote) = manager_with_bus(test_config(Role::Client, "client-a"));

        let change = WireEnvelope::state_change("Systems.BeaconLight", Value::Bool(true), 500)
            .with_origin("host-a", 7);
        let bytes = change.encode().unwrap();
        manager.handle_message(&bytes).unwrap();
        manager.handle_message(&bytes).unwrap();

        assert_eq!(sim.events().len(), 1);

        manager.shutdown();
    }

    #[test]
    fn test_malformed_messages_are_dropped_not_fatal() {
        let (manager, sim, _remote) = manager_with_bus(test_config(Role::Client, "client-a"));

        manager.handle_message(b"not json at all").unwrap();
        manager.handle_message(b"{\"type\":").unwrap();

        assert!(sim.writes().is_empty());
        assert_eq!(manager.store().get_bool("Systems.LightsOn"), None);

        manager.shutdown();
    }

    #[test]
    fn test_host_relays_client_changes_with_fresh_stamp() {
        let mut config = test_config(Role::Host, "host-a");
        config.relay = true;
        let (manager, _sim, remote) = manager_with_bus(config);

        let change = WireEnvelope::state_change("Systems.LightsOn", Value::Bool(true), 42)
            .with_origin("client-b", 1);
        manager.handle_message(&change.encode().unwrap()).unwrap();

        let relayed = decode_one(&remote);
        assert_eq!(relayed.origin_id.as_deref(), Some("client-b"));
        assert_ne!(relayed.server_time, 42);
        assert_eq!(relayed.path.as_deref(), Some("Systems.LightsOn"));

        manager.shutdown();
    }

    #[test]
    fn test_applied_remote_change_is_not_echoed_back() {
        let (manager, _sim, remote) = manager_with_bus(test_config(Role::Host, "host-a"));

        // Settle a baseline.
        manager
            .handle_local_sample(&sample(&[("Systems.LightsOn", Value::Bool(false))]))
            .unwrap();
        remote.drain();

        let change = WireEnvelope::state_change("Systems.LightsOn", Value::Bool(true), 500)
            .with_origin("client-b", 1);
        manager.handle_message(&change.encode().unwrap()).unwrap();

        // The next local sample sees the applied value; nothing goes out.
        manager
            .handle_local_sample(&sample(&[("Systems.LightsOn", Value::Bool(true))]))
            .unwrap();
        assert_eq!(remote.pending(), 0);

        manager.shutdown();
    }

    #[test]
    fn test_handle_connected_sends_forced_snapshot() {
        let (manager, _sim, remote) = manager_with_bus(test_config(Role::Host, "host-a"));

        manager
            .handle_local_sample(&sample(&[("Controls.Flaps", Value::Float(3.0))]))
            .unwrap();
        remote.drain();

        manager.handle_connected().unwrap();
        let env = decode_one(&remote);
        assert_eq!(env.kind, MessageKind::Snapshot);
        assert_eq!(
            env.payload.unwrap().get("Controls.Flaps"),
            Some(&Value::Float(3.0))
        );

        manager.shutdown();
    }

    #[test]
    fn test_failed_send_is_retried_on_next_sample() {
        let (local, remote) = MemoryBus::pair();
        let bus = Arc::new(FlakyBus::new(local));
        let manager = SyncManager::new(
            test_config(Role::Host, "host-a"),
            Arc::new(Catalog::builtin()),
            Arc::new(MockSim::new()),
            bus.clone(),
        );

        // Settle a baseline with a delivered snapshot.
        manager
            .handle_local_sample(&sample(&[
                ("Controls.Flaps", Value::Float(0.0)),
                ("Systems.LightsOn", Value::Bool(false)),
            ]))
            .unwrap();
        remote.drain();

        // The send fails; the error stays inside the manager and the
        // change is not committed as sent.
        bus.fail_next();
        let changed = sample(&[
            ("Controls.Flaps", Value::Float(0.0)),
            ("Systems.LightsOn", Value::Bool(true)),
        ]);
        manager.handle_local_sample(&changed).unwrap();
        assert_eq!(remote.pending(), 0);

        // The bus recovered; the identical next sample resends the lost
        // change.
        manager.handle_local_sample(&changed).unwrap();
        let env = decode_one(&remote);
        assert_eq!(env.path.as_deref(), Some("Systems.LightsOn"));
        assert_eq!(env.value, Some(Value::Bool(true)));

        manager.shutdown();
    }

    #[test]
    fn test_failed_snapshot_send_resends_full() {
        let (local, remote) = MemoryBus::pair();
        let bus = Arc::new(FlakyBus::new(local));
        let manager = SyncManager::new(
            test_config(Role::Host, "host-a"),
            Arc::new(Catalog::builtin()),
            Arc::new(MockSim::new()),
            bus.clone(),
        );

        bus.fail_next();
        let values = sample(&[("Controls.Flaps", Value::Float(3.0))]);
        manager.handle_local_sample(&values).unwrap();
        assert_eq!(remote.pending(), 0);

        // The bootstrap was never delivered, so the next sample is a full
        // snapshot again rather than an empty diff.
        manager.handle_local_sample(&values).unwrap();
        let env = decode_one(&remote);
        assert_eq!(env.kind, MessageKind::Snapshot);
        assert_eq!(
            env.payload.unwrap().get("Controls.Flaps"),
            Some(&Value::Float(3.0))
        );

        manager.shutdown();
    }

    #[test]
    fn test_persistence_round_trip() {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let file = std::env::temp_dir().join(format!(
            "skysync-manager-{}-{}.json",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let (local, _remote) = MemoryBus::pair();
        let manager = SyncManager::with_persistence(
            test_config(Role::Host, "host-a"),
            Arc::new(Catalog::builtin()),
            Arc::new(MockSim::new()),
            Arc::new(local),
            Some(SnapshotStore::with_min_interval(&file, Duration::ZERO)),
        );

        manager
            .handle_local_sample(&sample(&[("Controls.Flaps", Value::Float(7.5))]))
            .unwrap();
        manager.shutdown();

        let restored = SnapshotStore::new(&file).load().unwrap();
        assert_eq!(restored.get("Controls.Flaps"), Some(&Value::Float(7.5)));

        // A restarted peer resumes from the persisted state.
        let (local, _remote) = MemoryBus::pair();
        let reborn = SyncManager::with_persistence(
            test_config(Role::Host, "host-a"),
            Arc::new(Catalog::builtin()),
            Arc::new(MockSim::new()),
            Arc::new(local),
            Some(SnapshotStore::new(&file)),
        );
        assert_eq!(reborn.store().get_f64("Controls.Flaps"), Some(7.5));
        reborn.shutdown();
        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn test_host_and_client_converge_end_to_end() {
        let (host_bus, client_bus) = MemoryBus::pair();
        let host_bus = Arc::new(host_bus);
        let client_bus = Arc::new(client_bus);

        let host_sim = Arc::new(MockSim::new());
        let client_sim = Arc::new(MockSim::new());
        let host = SyncManager::new(
            test_config(Role::Host, "host-a"),
            Arc::new(Catalog::builtin()),
            host_sim,
            host_bus.clone(),
        );
        let client = SyncManager::new(
            test_config(Role::Client, "client-a"),
            Arc::new(Catalog::builtin()),
            client_sim,
            client_bus.clone(),
        );

        // Host samples; client receives the bootstrap snapshot.
        host.handle_local_sample(&sample(&[
            ("Controls.Flaps", Value::Float(0.0)),
            ("Systems.LightsOn", Value::Bool(false)),
        ]))
        .unwrap();
        while let Ok(Some(bytes)) = client_bus.try_recv() {
            client.handle_message(&bytes).unwrap();
        }
        assert_eq!(client.store().get_f64("Controls.Flaps"), Some(0.0));

        // Client flips a switch locally; the host applies it.
        client
            .handle_local_sample(&sample(&[("Systems.LightsOn", Value::Bool(true))]))
            .unwrap();
        while let Ok(Some(bytes)) = host_bus.try_recv() {
            host.handle_message(&bytes).unwrap();
        }
        assert_eq!(host.store().get_bool("Systems.LightsOn"), Some(true));

        host.shutdown();
        client.shutdown();
    }
}
