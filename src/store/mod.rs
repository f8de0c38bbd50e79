//! The session runtime store: bounded LRU cache of per-key entries with
//! crash-recoverable file persistence and scheduled flushing.
//!
//! All map mutation happens synchronously under one mutex; timer tasks
//! (periodic sweep, per-key debounce) are the only deferred execution and
//! hold only a weak reference, so an abandoned store cannot keep the process
//! alive.

pub(crate) mod scheduler;

use crate::config::{
    CreateFn, EvictHook, FlushStrategy, RecoverHook, RunFactory, StoreOptions,
};
use crate::core::{
    Entry, Envelope, ListFieldAccess, Result, StatePayload, StoreError, append_bounded, now_ms,
};
use crate::persist::SessionFileStore;
use crate::service::PluginService;
use lru::LruCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Outcome of materializing a key into memory.
enum Materialize {
    /// Not in memory, not on disk, and creation was not requested.
    Absent,
    /// Already resident, or loaded back from disk.
    Resident,
    /// Freshly created from the default-payload factory.
    Created,
}

pub(crate) struct StoreInner<T, R> {
    /// Recency-ordered entry map. Kept unbounded; capacity is enforced
    /// explicitly so the eviction ordering (flush, notify, remove) stays
    /// under our control.
    cache: LruCache<String, Entry<T, R>>,
    /// `None` in ephemeral mode: no disk I/O at all.
    files: Option<SessionFileStore>,
    max_entries: usize,
    ttl_ms: u64,
    strict: bool,
    create: CreateFn<T>,
    initial_run: Option<RunFactory<R>>,
    on_evict: Option<EvictHook<T>>,
    bounded_lists: HashMap<String, usize>,
    debounce_delay_ms: Option<u64>,
    on_hook_names: Vec<String>,
    debounce_timers: HashMap<String, JoinHandle<()>>,
    periodic: Option<scheduler::PeriodicWorker>,
    runtime: Option<tokio::runtime::Handle>,
    closed: bool,
}

impl<T, R> StoreInner<T, R>
where
    T: StatePayload,
    R: StatePayload,
{
    /// Loads everything recoverable from disk, newest files first, up to
    /// capacity. Corrupt files are skipped; the scan never fails.
    fn recover(&mut self, on_recover: Option<&RecoverHook>) {
        let mut envelopes: Vec<Envelope<T, R>> = Vec::new();
        if let Some(files) = &self.files {
            for path in files.candidates() {
                if envelopes.len() >= self.max_entries {
                    break;
                }
                match files.read_file::<T, R>(&path) {
                    Ok(envelope) => envelopes.push(envelope),
                    Err(err) => {
                        tracing::warn!(file = %path.display(), error = %err, "skipping corrupt session file during recovery");
                    }
                }
            }
        }

        // Insert oldest-first so the most recently modified file ends up in
        // the most-recently-used position.
        for envelope in envelopes.into_iter().rev() {
            let key = envelope.key.clone();
            self.cache.put(key.clone(), Entry::from_envelope(envelope));
            if let Some(hook) = on_recover {
                hook(&key);
            }
        }
    }

    /// Brings `key` into memory, loading from disk or (when requested)
    /// creating a fresh default payload. Enforces capacity afterwards.
    fn ensure_resident(&mut self, key: &str, create_if_missing: bool) -> Materialize {
        if self.cache.contains(key) {
            return Materialize::Resident;
        }

        if let Some(files) = &self.files {
            match files.load::<T, R>(key) {
                Ok(Some(envelope)) => {
                    self.cache.put(key.to_string(), Entry::from_envelope(envelope));
                    self.enforce_capacity();
                    return Materialize::Resident;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key, error = %err, "failed to load session file; treating as absent");
                }
            }
        }

        if !create_if_missing {
            return Materialize::Absent;
        }

        let state = (self.create)();
        self.cache.put(key.to_string(), Entry::new(key, state));
        self.enforce_capacity();
        Materialize::Created
    }

    /// Writes the entry if and only if it is dirty; clears the dirty flag on
    /// success only. Write failures are logged and swallowed so the entry
    /// stays dirty for a future retry.
    fn flush_key(&mut self, key: &str) {
        let Some(files) = &self.files else {
            return;
        };
        let Some(entry) = self.cache.peek_mut(key) else {
            return;
        };
        if !entry.dirty {
            return;
        }
        match files.write(&entry.to_envelope()) {
            Ok(()) => entry.dirty = false,
            Err(err) => {
                tracing::warn!(key, error = %err, "session flush failed; entry stays dirty");
            }
        }
    }

    /// Flush (if dirty), notify `on_evict`, then remove. That ordering is
    /// the store's core correctness guarantee: dirty data is never silently
    /// dropped, and the callback observes the final state.
    fn evict_entry(&mut self, key: &str) {
        self.flush_key(key);
        if let Some(entry) = self.cache.peek(key) {
            if let Some(hook) = &self.on_evict {
                hook(&entry.key, &entry.state);
            }
        }
        self.cache.pop(key);
    }

    fn enforce_capacity(&mut self) {
        while self.cache.len() > self.max_entries {
            let Some((victim, _)) = self.cache.peek_lru() else {
                break;
            };
            let victim = victim.clone();
            self.evict_entry(&victim);
        }
    }

    /// One maintenance pass: TTL eviction first, then flush every remaining
    /// dirty entry. Runs on every periodic tick and once during close.
    fn sweep(&mut self) {
        if self.ttl_ms > 0 {
            let now = now_ms();
            let stale: Vec<String> = self
                .cache
                .iter()
                .filter(|(_, entry)| now - entry.updated_at_ms > self.ttl_ms as i64)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                self.evict_entry(&key);
            }
        }

        let dirty: Vec<String> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, _)| key.clone())
            .collect();
        for key in dirty {
            self.flush_key(&key);
        }
    }
}

/// Bounded, crash-recoverable per-key state container.
///
/// Generic over the session payload `T` and an optional per-run sub-state
/// `R`. Handles are cheap to clone and share one underlying store.
///
/// # Example
///
/// ```no_run
/// use sessionstore::{SessionRuntimeStore, StoreOptions};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Clone, Default)]
/// struct AgentState {
///     invocations: u64,
/// }
///
/// # fn main() -> sessionstore::Result<()> {
/// let store: SessionRuntimeStore<AgentState> = SessionRuntimeStore::open(
///     StoreOptions::new("/var/lib/agent", AgentState::default)
///         .max_entries(64)
///         .flush_interval_ms(0),
/// )?;
///
/// store.update("session-1", |state| state.invocations += 1);
/// store.flush("session-1");
/// # Ok(())
/// # }
/// ```
pub struct SessionRuntimeStore<T, R = ()> {
    inner: Arc<Mutex<StoreInner<T, R>>>,
}

impl<T, R> Clone for SessionRuntimeStore<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> SessionRuntimeStore<T, R>
where
    T: StatePayload,
    R: StatePayload,
{
    /// Opens the store: creates the state directory (unless ephemeral), runs
    /// the recovery scan, and starts the periodic flush worker if one is
    /// configured.
    ///
    /// # Errors
    ///
    /// `StoreError::Io` if the state directory cannot be created, or
    /// `StoreError::Config` if a periodic/debounce strategy is configured
    /// without an ambient tokio runtime.
    pub fn open(options: StoreOptions<T, R>) -> Result<Self> {
        let mut periodic_interval_ms = None;
        let mut debounce_delay_ms = None;
        let mut on_hook_names = Vec::new();
        for strategy in options.effective_strategies() {
            match strategy {
                FlushStrategy::Periodic { interval_ms } => {
                    periodic_interval_ms.get_or_insert(interval_ms);
                }
                FlushStrategy::Debounce { delay_ms } => {
                    debounce_delay_ms.get_or_insert(delay_ms);
                }
                FlushStrategy::OnHooks { hooks } => on_hook_names.extend(hooks),
                FlushStrategy::Manual => {}
            }
        }

        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() && (periodic_interval_ms.is_some() || debounce_delay_ms.is_some()) {
            return Err(StoreError::Config(
                "periodic and debounce flush strategies require a tokio runtime".to_string(),
            ));
        }

        let files = if options.ephemeral {
            None
        } else {
            Some(SessionFileStore::open(&options.state_dir)?)
        };

        let mut inner = StoreInner {
            cache: LruCache::unbounded(),
            files,
            max_entries: options.max_entries,
            ttl_ms: options.ttl_ms,
            strict: options.strict,
            create: options.create,
            initial_run: options.initial_run,
            on_evict: options.on_evict,
            bounded_lists: options
                .bounded_lists
                .into_iter()
                .map(|list| (list.field, list.max_items))
                .collect(),
            debounce_delay_ms,
            on_hook_names,
            debounce_timers: HashMap::new(),
            periodic: None,
            runtime: runtime.clone(),
            closed: false,
        };
        inner.recover(options.on_recover.as_ref());

        let inner = Arc::new(Mutex::new(inner));
        if let (Some(interval_ms), Some(handle)) = (periodic_interval_ms, runtime) {
            let worker = scheduler::spawn_periodic_worker(&inner, interval_ms, &handle);
            if let Ok(mut guard) = inner.lock() {
                guard.periodic = Some(worker);
            }
        }

        Ok(Self { inner })
    }

    /// Returns a clone of the payload if the key is resident or recoverable
    /// from disk, touching recency on any hit. Never creates state.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        match guard.ensure_resident(key, false) {
            Materialize::Absent => None,
            _ => guard.cache.get(key).map(|entry| entry.state.clone()),
        }
    }

    /// Returns a clone of the payload, materializing a fresh default via the
    /// injected factory if the key is absent everywhere. Never fails.
    pub fn get_or_create(&self, key: &str) -> T {
        let mut guard = self.inner.lock().unwrap();
        let created = matches!(guard.ensure_resident(key, true), Materialize::Created);
        if created {
            let seq = guard.cache.peek(key).map(|entry| entry.mutation_seq);
            if let Some(seq) = seq {
                scheduler::schedule_debounce(&self.inner, &mut guard, key, seq);
            }
        }
        let create = Arc::clone(&guard.create);
        match guard.cache.get(key) {
            Some(entry) => entry.state.clone(),
            // Unreachable after ensure_resident(create), but stay total.
            None => create(),
        }
    }

    /// Applies `mutator` to the payload (materializing it first if needed),
    /// marks the entry dirty, and resets the key's debounce timer.
    pub fn update(&self, key: &str, mutator: impl FnOnce(&mut T)) {
        let mut guard = self.inner.lock().unwrap();
        guard.ensure_resident(key, true);
        let seq = guard.cache.get_mut(key).map(|entry| {
            mutator(&mut entry.state);
            entry.touch_mutation();
            entry.mutation_seq
        });
        if let Some(seq) = seq {
            scheduler::schedule_debounce(&self.inner, &mut guard, key, seq);
        }
    }

    /// Checks memory and, non-ephemerally, disk existence without loading
    /// anything into memory.
    pub fn has(&self, key: &str) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.cache.contains(key) || guard.files.as_ref().is_some_and(|files| files.exists(key))
    }

    /// In-memory entry count. Never exceeds the configured capacity.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().cache.len()
    }

    /// Union of in-memory keys and keys discoverable in persisted files
    /// (best effort; corrupt files are ignored).
    pub fn keys(&self) -> Vec<String> {
        let guard = self.inner.lock().unwrap();
        let mut keys: Vec<String> = guard.cache.iter().map(|(key, _)| key.clone()).collect();
        if let Some(files) = &guard.files {
            for key in files.scan_keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Writes the entry if and only if it is dirty. A clean entry performs
    /// no disk write. Persistence failures are contained (the entry stays
    /// dirty); this never fails.
    pub fn flush(&self, key: &str) {
        self.inner.lock().unwrap().flush_key(key);
    }

    /// Flushes every dirty entry without stopping any timers.
    pub fn flush_all(&self) {
        let mut guard = self.inner.lock().unwrap();
        let dirty: Vec<String> = guard
            .cache
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, _)| key.clone())
            .collect();
        for key in dirty {
            guard.flush_key(&key);
        }
    }

    /// Removes memory and disk state unconditionally and idempotently, and
    /// cancels any pending debounce timer for the key.
    pub fn delete(&self, key: &str) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(timer) = guard.debounce_timers.remove(key) {
            timer.abort();
        }
        guard.cache.pop(key);
        if let Some(files) = &guard.files {
            if let Err(err) = files.remove(key) {
                tracing::warn!(key, error = %err, "failed to delete session file");
            }
        }
    }

    /// Shuts the store down: cancels the periodic worker and every
    /// outstanding debounce timer, runs one final TTL-eviction sweep, then
    /// flushes every remaining dirty entry. After this resolves no further
    /// write occurs. Idempotent.
    pub async fn close(&self) {
        let (periodic, timers) = {
            let mut guard = self.inner.lock().unwrap();
            if guard.closed {
                return;
            }
            guard.closed = true;
            (guard.periodic.take(), std::mem::take(&mut guard.debounce_timers))
        };

        if let Some(worker) = periodic {
            worker.stop().await;
        }
        for timer in timers.into_values() {
            timer.abort();
            let _ = timer.await;
        }

        self.inner.lock().unwrap().sweep();
    }

    /// Trigger names configured through [`FlushStrategy::OnHooks`]. The
    /// store does not know what a hook is; an external caller invokes
    /// [`flush`](Self::flush) when one of these fires.
    pub fn on_hook_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().on_hook_names.clone()
    }

    /// Adapter for hosts that manage component lifecycles generically.
    pub fn to_plugin_service(&self, id: impl Into<String>) -> PluginService<T, R> {
        PluginService::new(id.into(), self.clone())
    }

    // ------------------------------------------------------------------
    // Per-run sub-state
    // ------------------------------------------------------------------

    /// Returns a clone of one run's sub-state, if both the session and the
    /// run exist.
    pub fn get_run(&self, key: &str, run_id: &str) -> Option<R> {
        let mut guard = self.inner.lock().unwrap();
        match guard.ensure_resident(key, false) {
            Materialize::Absent => None,
            _ => guard
                .cache
                .get(key)
                .and_then(|entry| entry.runs.get(run_id).cloned()),
        }
    }

    /// Applies `mutator` to one run's sub-state, lazily creating the session
    /// entry and, via the `initial_run` factory, the run entry.
    ///
    /// Without a configured factory an absent run cannot be created: in
    /// default (permissive) mode the call is a no-op returning `Ok(())`;
    /// with `strict(true)` it returns [`StoreError::NoRunFactory`].
    pub fn update_run(&self, key: &str, run_id: &str, mutator: impl FnOnce(&mut R)) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();

        if guard.initial_run.is_none() {
            // An already-existing run (e.g. recovered from disk) can still
            // be mutated without a factory.
            guard.ensure_resident(key, false);
            let has_run = guard
                .cache
                .peek(key)
                .is_some_and(|entry| entry.runs.contains_key(run_id));
            if !has_run {
                if guard.strict {
                    return Err(StoreError::NoRunFactory(key.to_string()));
                }
                tracing::debug!(key, run_id, "update_run ignored: no initial_run factory configured");
                return Ok(());
            }
        } else {
            guard.ensure_resident(key, true);
        }

        let factory = guard.initial_run.clone();
        let seq = guard.cache.get_mut(key).map(|entry| {
            if !entry.runs.contains_key(run_id) {
                if let Some(factory) = &factory {
                    entry.runs.insert(run_id.to_string(), factory());
                }
            }
            if let Some(run) = entry.runs.get_mut(run_id) {
                mutator(run);
            }
            entry.touch_mutation();
            entry.mutation_seq
        });
        if let Some(seq) = seq {
            scheduler::schedule_debounce(&self.inner, &mut guard, key, seq);
        }
        Ok(())
    }

    /// Removes one run's sub-state. Missing session or run is not an error.
    pub fn delete_run(&self, key: &str, run_id: &str) {
        let mut guard = self.inner.lock().unwrap();
        if matches!(guard.ensure_resident(key, false), Materialize::Absent) {
            return;
        }
        let seq = guard.cache.get_mut(key).and_then(|entry| {
            entry.runs.remove(run_id)?;
            entry.touch_mutation();
            Some(entry.mutation_seq)
        });
        if let Some(seq) = seq {
            scheduler::schedule_debounce(&self.inner, &mut guard, key, seq);
        }
    }

    /// All runs for a session; empty when the session does not exist.
    pub fn all_runs(&self, key: &str) -> HashMap<String, R> {
        let mut guard = self.inner.lock().unwrap();
        match guard.ensure_resident(key, false) {
            Materialize::Absent => HashMap::new(),
            _ => guard
                .cache
                .get(key)
                .map(|entry| entry.runs.clone())
                .unwrap_or_default(),
        }
    }
}

impl<T, R> SessionRuntimeStore<T, R>
where
    T: StatePayload + ListFieldAccess,
    R: StatePayload,
{
    /// Appends to the named list field of the payload, trimming from the
    /// front per the `bounded_lists` configuration (fields without a
    /// configured cap grow without bound).
    ///
    /// A field the payload does not expose as a list is a no-op in default
    /// (permissive) mode and [`StoreError::NotAList`] with `strict(true)`.
    pub fn append_to_list(&self, key: &str, field: &str, item: T::Item) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.ensure_resident(key, true);
        let max_items = guard.bounded_lists.get(field).copied().unwrap_or(0);
        let strict = guard.strict;

        let mut not_a_list = false;
        let seq = guard.cache.get_mut(key).and_then(|entry| {
            match entry.state.list_field_mut(field) {
                Some(list) => {
                    append_bounded(list, item, max_items);
                    entry.touch_mutation();
                    Some(entry.mutation_seq)
                }
                None => {
                    not_a_list = true;
                    None
                }
            }
        });

        if not_a_list {
            if strict {
                return Err(StoreError::NotAList(field.to_string()));
            }
            tracing::debug!(key, field, "append_to_list ignored: field is not a list");
            return Ok(());
        }
        if let Some(seq) = seq {
            scheduler::schedule_debounce(&self.inner, &mut guard, key, seq);
        }
        Ok(())
    }
}
