//! The connection runtime (spec §4.6, §5): COMMAND/REFRESH workers, the
//! INPUT/OUTPUT pumps, and the `start`/`send`/`sync`/`async`/`shutdown`
//! surface built on top of `MonitorData`'s ingest/assembly operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vg_core::{HostValue, VarEnv};
use vg_error::VgError;
use vg_protocol::{Block, BlockType, DeleteSelector, Evaluator, OrderedBlocks};
use vg_transport::Transport;
use vg_worker::{Worker, WorkerHandle};

use crate::accounting::RunningTaskRegistry;
use crate::config::ConnectionConfig;
use crate::monitor::{assemble_outgoing, ingest_monitor_block, monitor_has_changes, MonitorData};

/// Which serialized queue a `sync`/`async_submit` callable runs on (spec
/// §4.6's `chan` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Command,
    Refresh,
}

#[derive(Default)]
struct ConnectionStats {
    blocks_ingested: AtomicU64,
    blocks_failed: AtomicU64,
    outgoing_ticks: AtomicU64,
    sends_failed: AtomicU64,
}

/// State touched by block ingest (COMMAND) and by refresh/publish
/// (REFRESH). Held behind one lock for simplicity; the two
/// [`WorkerHandle`]s still serialize *access paths* into distinct
/// submissions per spec §5, so causal ordering matches the spec even
/// though the storage itself isn't split across two locks (see DESIGN.md).
struct RuntimeState {
    env: VarEnv,
    monitors: BTreeMap<String, MonitorData>,
    data_blocks: OrderedBlocks<Value>,
    incoming_blocks: OrderedBlocks<Value>,
    outgoing: OrderedBlocks<Value>,
}

/// A running connection: an env, a monitor table, and the workers driving
/// them against a [`Transport`].
pub struct Connection {
    name: String,
    transport: Arc<dyn Transport>,
    evaluator: Option<Arc<dyn Evaluator>>,
    config: ConnectionConfig,
    state: Arc<Mutex<RuntimeState>>,
    command: WorkerHandle,
    refresh: WorkerHandle,
    accounting: Arc<RunningTaskRegistry>,
    stats: Arc<ConnectionStats>,
    shut_down: Arc<AtomicBool>,
    indicated_start: Arc<AtomicBool>,
    workers: Mutex<Vec<Worker>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Initializes the env with `roots`, calls the transport's `init` hook,
    /// and launches the COMMAND/REFRESH workers plus the INPUT/OUTPUT pumps.
    pub async fn start(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        evaluator: Option<Arc<dyn Evaluator>>,
        roots: Vec<(String, HostValue)>,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection>, VgError> {
        let name = name.into();
        transport.init(&name).await?;

        let mut env = VarEnv::new();
        for (root_name, value) in roots {
            env.set_root(root_name, value);
        }

        let state = Arc::new(Mutex::new(RuntimeState {
            env,
            monitors: BTreeMap::new(),
            data_blocks: OrderedBlocks::new(),
            incoming_blocks: OrderedBlocks::new(),
            outgoing: OrderedBlocks::new(),
        }));

        let (command_worker, command) = Worker::spawn("COMMAND");
        let (refresh_worker, refresh) = Worker::spawn("REFRESH");

        let con = Arc::new(Connection {
            name,
            transport,
            evaluator,
            config,
            state,
            command,
            refresh,
            accounting: Arc::new(RunningTaskRegistry::new()),
            stats: Arc::new(ConnectionStats::default()),
            shut_down: Arc::new(AtomicBool::new(false)),
            indicated_start: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(vec![command_worker, refresh_worker]),
            pumps: Mutex::new(Vec::new()),
        });

        con.spawn_input_pump();
        con.spawn_output_pump();

        Ok(con)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn spawn_input_pump(self: &Arc<Self>) {
        let con = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while !con.shut_down.load(Relaxed) {
                let wait = con.config.incoming_update_period;
                match con.transport.get_updates(wait).await {
                    Ok(Some(batch)) => {
                        let state = Arc::clone(&con.state);
                        let entries: Vec<(String, Value)> = batch.into_iter().collect();
                        let submitted = con.command.cast(move || {
                            let mut state = state.lock().expect("connection state lock poisoned");
                            for (name, block) in entries {
                                state.incoming_blocks.upsert(name, block);
                            }
                            Ok(())
                        });
                        if submitted.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(target: "vg.runtime", connection = %con.name, error = %err, "INPUT pump failed to poll transport");
                    }
                }
            }
        });
        self.pumps.lock().expect("pump list lock poisoned").push(handle);
    }

    fn spawn_output_pump(self: &Arc<Self>) {
        let con = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while !con.shut_down.load(Relaxed) {
                let pace = con.next_pace();
                tokio::time::sleep(pace).await;
                if let Err(err) = con.tick_once().await {
                    warn!(target: "vg.runtime", connection = %con.name, error = %err, "OUTPUT pump tick failed");
                }
                for (label, elapsed) in con.accounting.sweep_overdue(con.config.long_task_warn_after, Instant::now()) {
                    warn!(
                        target: "vg.runtime",
                        connection = %con.name,
                        task = %label,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "submitted callable has been running past the long-task warn threshold"
                    );
                }
            }
        });
        self.pumps.lock().expect("pump list lock poisoned").push(handle);
    }

    /// Spec §5 cadence: sleep for `min(monitor periods, default_update)/10`
    /// between ticks.
    fn next_pace(&self) -> Duration {
        let state = self.state.lock().expect("connection state lock poisoned");
        let shortest = state
            .monitors
            .values()
            .filter(|m| !m.disabled)
            .map(|m| m.update)
            .min()
            .unwrap_or(self.config.default_update);
        (shortest.min(self.config.default_update) / 10).max(Duration::from_millis(1))
    }

    /// Runs one full cycle: drain+dispatch incoming blocks (COMMAND), then
    /// refresh due monitors and assemble outgoing (REFRESH), then publish
    /// through the transport if anything is pending. Exposed directly so
    /// tests can drive cycles deterministically instead of racing the
    /// background pumps.
    pub async fn tick_once(&self) -> Result<(), VgError> {
        let state = Arc::clone(&self.state);
        let evaluator = self.evaluator.clone();
        let stats = Arc::clone(&self.stats);
        let task = self.accounting.start(format!("{}: COMMAND dispatch_incoming", self.name));
        let result = self
            .command
            .call(move || {
                let mut state = state.lock().expect("connection state lock poisoned");
                dispatch_incoming(&mut state, evaluator.as_deref(), &stats);
            })
            .await;
        self.accounting.finish(task);
        result?;

        let state = Arc::clone(&self.state);
        let default_update = self.config.default_update;
        let task = self.accounting.start(format!("{}: REFRESH run_refresh_cycle", self.name));
        let result = self
            .refresh
            .call(move || {
                let mut state = state.lock().expect("connection state lock poisoned");
                run_refresh_cycle(&mut state, default_update);
            })
            .await;
        self.accounting.finish(task);
        result?;

        self.publish_pending().await
    }

    async fn publish_pending(&self) -> Result<(), VgError> {
        let pending = {
            let mut state = self.state.lock().expect("connection state lock poisoned");
            state.outgoing.drain()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let mut batch = OrderedBlocks::new();
        for (name, value) in pending {
            batch.upsert(name, value);
        }
        if !self.transport.has_updates(&batch) {
            return Ok(());
        }
        match self.transport.send_updates(batch).await {
            Ok(()) => {
                self.stats.outgoing_ticks.fetch_add(1, Relaxed);
                if self.config.indicate_start && !self.indicated_start.swap(true, Relaxed) {
                    println!("READY");
                }
                Ok(())
            }
            Err(err) => {
                self.stats.sends_failed.fetch_add(1, Relaxed);
                Err(err)
            }
        }
    }

    /// Enqueues an outgoing publish by name (spec §4.6 `send`): last write
    /// wins within the current refresh cycle.
    pub async fn send(&self, name: impl Into<String>, value: Value) -> Result<(), VgError> {
        if self.shut_down.load(Relaxed) {
            warn!(target: "vg.runtime", connection = %self.name, "send to a shut-down connection was discarded");
            return Ok(());
        }
        let name = name.into();
        let state = Arc::clone(&self.state);
        self.refresh
            .call(move || {
                let mut state = state.lock().expect("connection state lock poisoned");
                state.outgoing.upsert(name, value);
            })
            .await
    }

    /// Submits `f` to the chosen worker and blocks until it returns, inlining
    /// when already running on that worker (spec §4.6 `sync`).
    pub async fn sync<F, T>(&self, chan: WorkerKind, f: F) -> Result<T, VgError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match chan {
            WorkerKind::Command => self.command.call(f).await,
            WorkerKind::Refresh => self.refresh.call(f).await,
        }
    }

    /// Fire-and-forget submission to the chosen worker (spec §4.6 `async`,
    /// renamed to avoid the keyword, matching `vg-worker::WorkerHandle::cast`).
    pub fn async_submit<F>(&self, chan: WorkerKind, f: F) -> Result<(), VgError>
    where
        F: FnOnce() -> Result<(), VgError> + Send + 'static,
    {
        match chan {
            WorkerKind::Command => self.command.cast(f),
            WorkerKind::Refresh => self.refresh.cast(f),
        }
    }

    /// Closes the command queues; every subsequent `send`/`sync`/`async`
    /// becomes a logged no-op. Cooperative: workers exit once their
    /// in-flight callable finishes and every handle clone is dropped.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Relaxed);
        for handle in self.pumps.lock().expect("pump list lock poisoned").drain(..) {
            handle.abort();
        }
        self.command.clone().shutdown();
        self.refresh.clone().shutdown();
        let workers: Vec<Worker> = self.workers.lock().expect("worker list lock poisoned").drain(..).collect();
        for worker in workers {
            worker.join().await;
        }
    }
}

fn dispatch_incoming(state: &mut RuntimeState, evaluator: Option<&dyn Evaluator>, stats: &ConnectionStats) {
    let mut batch = state.incoming_blocks.drain();
    batch.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (name, raw) in batch {
        let block = match Block::parse(raw) {
            Ok(b) => b,
            Err(err) => {
                warn!(target: "vg.protocol", block = %name, error = %err, "dropping malformed block");
                stats.blocks_failed.fetch_add(1, Relaxed);
                continue;
            }
        };
        match dispatch_one(state, evaluator, &name, block) {
            Ok(()) => {
                stats.blocks_ingested.fetch_add(1, Relaxed);
            }
            Err(err) => {
                warn!(target: "vg.protocol", block = %name, error = %err, "block dispatch failed");
                stats.blocks_failed.fetch_add(1, Relaxed);
            }
        }
    }
}

fn dispatch_one(
    state: &mut RuntimeState,
    evaluator: Option<&dyn Evaluator>,
    name: &str,
    block: Block,
) -> Result<(), VgError> {
    match block.block_type()? {
        BlockType::Monitor => {
            let raw = block.clone().into_value();
            if state.data_blocks.get(name) == Some(&raw) {
                debug!(target: "vg.protocol", block = %name, "identical monitor block, dedup no-op");
                return Ok(());
            }
            ingest_monitor_block(&mut state.env, &mut state.monitors, &block)?;
            state.data_blocks.upsert(name.to_string(), raw);
            Ok(())
        }
        BlockType::Code => {
            if let (Some(eval), Some(language), Some(Value::String(source))) =
                (evaluator, block.language(), block.value())
            {
                let result = eval.evaluate(language, source, block.origin())?;
                if block.code_returns() {
                    if let Some(value) = result {
                        let mut data_raw = Map::new();
                        data_raw.insert("type".into(), Value::String("data".into()));
                        data_raw.insert("name".into(), Value::String(name.to_string()));
                        if !block.topics().is_empty() {
                            data_raw.insert("topics".into(), Value::from(block.topics()));
                        }
                        data_raw.insert("value".into(), value);
                        let data_value = Value::Object(data_raw);
                        state.data_blocks.upsert(name.to_string(), data_value.clone());
                        state.outgoing.upsert(name.to_string(), data_value);
                    }
                }
            }
            Ok(())
        }
        BlockType::Data => {
            state.data_blocks.upsert(name.to_string(), block.into_value());
            Ok(())
        }
        BlockType::Delete => {
            if let Some(value) = block.value() {
                let selector = DeleteSelector::parse(value)?;
                apply_delete(state, &selector);
            }
            Ok(())
        }
    }
}

fn apply_delete(state: &mut RuntimeState, selector: &DeleteSelector) {
    match selector {
        DeleteSelector::Name(n) => remove_named_entry(state, n),
        DeleteSelector::Names(names) => {
            for n in names {
                remove_named_entry(state, n);
            }
        }
        DeleteSelector::Tagged(tags) => {
            let data_names: Vec<String> = state
                .data_blocks
                .iter()
                .filter(|(_, v)| value_has_any_tag(v, tags))
                .map(|(n, _)| n.to_string())
                .collect();
            let monitor_names: Vec<String> = state
                .monitors
                .values()
                .filter(|m| tags_from_map(&m.original).iter().any(|t| tags.contains(t)))
                .map(|m| m.name.clone())
                .collect();
            for n in data_names.iter().chain(monitor_names.iter()) {
                remove_named_entry(state, n);
            }
        }
    }
}

fn value_has_any_tag(value: &Value, tags: &[String]) -> bool {
    value
        .as_object()
        .map(|obj| tags_from_map(obj).iter().any(|t| tags.contains(t)))
        .unwrap_or(false)
}

fn tags_from_map(map: &Map<String, Value>) -> Vec<String> {
    match map.get("tags") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        _ => Vec::new(),
    }
}

fn remove_named_entry(state: &mut RuntimeState, name: &str) {
    state.data_blocks.remove(name);
    state.outgoing.remove(name);
    if let Some(mon) = state.monitors.remove(name) {
        for var_id in mon.vars.values() {
            state.env.remove(*var_id);
        }
    }
}

/// Ticks every due, non-disabled monitor: refreshes its vars (ancestors
/// first, via `VarEnv::refresh`), then assembles and enqueues its outgoing
/// block unless it's `quiet` or unchanged (spec invariant 6).
fn run_refresh_cycle(state: &mut RuntimeState, default_update: Duration) {
    let now = Instant::now();
    let due: Vec<String> = state
        .monitors
        .iter()
        .filter(|(_, m)| !m.disabled && (m.is_due(now) || m.update.is_zero()))
        .map(|(n, _)| n.clone())
        .collect();

    for name in &due {
        let var_ids: Vec<_> = state.monitors[name].vars.values().copied().collect();
        if let Err(err) = state.env.refresh(&var_ids, true, false) {
            warn!(target: "vg.runtime", monitor = %name, error = %err, "monitor refresh aborted");
        }
    }

    for name in &due {
        let has_changes = {
            let mon = state.monitors.get(name).expect("present");
            monitor_has_changes(&state.env, mon)
        };
        let quiet = state.monitors.get(name).expect("present").quiet;
        if has_changes && !quiet {
            let outgoing_json = assemble_outgoing(&state.env, state.monitors.get(name).expect("present"));
            if let Ok(json) = outgoing_json {
                state.outgoing.upsert(name.clone(), json);
            }
        }
        let mon = state.monitors.get_mut(name).expect("present");
        mon.last_check = Some(now);
        for var_id in mon.vars.values() {
            state.env.clear_changed(*var_id);
        }
        if mon.update.is_zero() {
            mon.update = default_update;
        }
    }
}
