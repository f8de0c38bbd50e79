//! Construction configuration: options builder, flush-strategy union, and
//! the injected callback types.

use std::path::PathBuf;
use std::sync::Arc;

/// Default in-memory capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 128;

/// Periodic flush interval used when no strategy is configured.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 30_000;

pub type CreateFn<T> = Arc<dyn Fn() -> T + Send + Sync>;
pub type RunFactory<R> = Arc<dyn Fn() -> R + Send + Sync>;
pub type EvictHook<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;
pub type RecoverHook = Arc<dyn Fn(&str) + Send + Sync>;

/// When a dirty entry gets written to disk. Any subset of strategies may be
/// active at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushStrategy {
    /// One repeating timer sweeps all entries: flushes every dirty entry and
    /// performs TTL eviction on each tick.
    Periodic { interval_ms: u64 },

    /// Per-key timer, reset on every mutation; when it fires uninterrupted,
    /// exactly that key is flushed. N mutations inside the quiet window
    /// collapse into one write.
    Debounce { delay_ms: u64 },

    /// The store only exposes the configured trigger names via
    /// [`on_hook_names`](crate::SessionRuntimeStore::on_hook_names); an
    /// external caller invokes `flush(key)` when a trigger fires.
    OnHooks { hooks: Vec<String> },

    /// No automatic flushing; only `flush`/`flush_all`/`close` persist.
    Manual,
}

/// Per-field cap for [`append_to_list`](crate::SessionRuntimeStore::append_to_list).
#[derive(Debug, Clone)]
pub struct BoundedList {
    pub field: String,
    pub max_items: usize,
}

impl BoundedList {
    pub fn new(field: impl Into<String>, max_items: usize) -> Self {
        Self {
            field: field.into(),
            max_items,
        }
    }
}

/// Options for [`SessionRuntimeStore::open`](crate::SessionRuntimeStore::open).
///
/// `state_dir` and the `create` factory are required up front; everything
/// else chains.
pub struct StoreOptions<T, R = ()> {
    pub(crate) state_dir: PathBuf,
    pub(crate) max_entries: usize,
    pub(crate) flush: Vec<FlushStrategy>,
    pub(crate) ttl_ms: u64,
    pub(crate) ephemeral: bool,
    pub(crate) strict: bool,
    pub(crate) create: CreateFn<T>,
    pub(crate) initial_run: Option<RunFactory<R>>,
    pub(crate) on_evict: Option<EvictHook<T>>,
    pub(crate) on_recover: Option<RecoverHook>,
    pub(crate) bounded_lists: Vec<BoundedList>,
}

impl<T, R> StoreOptions<T, R> {
    pub fn new(
        state_dir: impl Into<PathBuf>,
        create: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            state_dir: state_dir.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            flush: Vec::new(),
            ttl_ms: 0,
            ephemeral: false,
            strict: false,
            create: Arc::new(create),
            initial_run: None,
            on_evict: None,
            on_recover: None,
            bounded_lists: Vec::new(),
        }
    }

    /// In-memory capacity; the store never holds more entries than this
    /// after any public operation returns. Clamped to at least 1.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn flush_strategy(mut self, strategy: FlushStrategy) -> Self {
        self.flush.push(strategy);
        self
    }

    pub fn flush_strategies(
        mut self,
        strategies: impl IntoIterator<Item = FlushStrategy>,
    ) -> Self {
        self.flush.extend(strategies);
        self
    }

    /// Legacy single-number configuration, kept for compatibility:
    /// `interval_ms > 0` is equivalent to a periodic strategy, `0` disables
    /// automatic flushing entirely.
    pub fn flush_interval_ms(mut self, interval_ms: u64) -> Self {
        let strategy = if interval_ms == 0 {
            FlushStrategy::Manual
        } else {
            FlushStrategy::Periodic { interval_ms }
        };
        self.flush.push(strategy);
        self
    }

    /// Entries untouched for longer than this are evicted during periodic
    /// sweeps and on close. `0` disables TTL eviction.
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Disables all disk I/O; the store becomes a pure in-memory cache and
    /// `state_dir` is ignored.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Turns silently-ignored mutation preconditions (`update_run` without a
    /// run factory, `append_to_list` on a non-list field) into typed errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Enables per-run sub-state by providing the default-run factory.
    pub fn initial_run(mut self, factory: impl Fn() -> R + Send + Sync + 'static) -> Self {
        self.initial_run = Some(Arc::new(factory));
        self
    }

    /// Invoked after an entry has been flushed (if dirty) and immediately
    /// before it is removed from memory. Must not call back into the store.
    pub fn on_evict(mut self, hook: impl Fn(&str, &T) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Arc::new(hook));
        self
    }

    /// Invoked once per entry loaded from disk during the recovery scan.
    pub fn on_recover(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_recover = Some(Arc::new(hook));
        self
    }

    pub fn bounded_list(mut self, field: impl Into<String>, max_items: usize) -> Self {
        self.bounded_lists.push(BoundedList::new(field, max_items));
        self
    }

    pub fn bounded_lists(mut self, lists: impl IntoIterator<Item = BoundedList>) -> Self {
        self.bounded_lists.extend(lists);
        self
    }

    pub(crate) fn effective_strategies(&self) -> Vec<FlushStrategy> {
        if self.flush.is_empty() {
            vec![FlushStrategy::Periodic {
                interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            }]
        } else {
            self.flush.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_is_periodic() {
        let options: StoreOptions<i64> = StoreOptions::new("/tmp/x", || 0);
        assert_eq!(
            options.effective_strategies(),
            vec![FlushStrategy::Periodic {
                interval_ms: DEFAULT_FLUSH_INTERVAL_MS
            }]
        );
    }

    #[test]
    fn legacy_interval_zero_maps_to_manual() {
        let options: StoreOptions<i64> = StoreOptions::new("/tmp/x", || 0).flush_interval_ms(0);
        assert_eq!(options.effective_strategies(), vec![FlushStrategy::Manual]);
    }

    #[test]
    fn legacy_interval_maps_to_periodic() {
        let options: StoreOptions<i64> = StoreOptions::new("/tmp/x", || 0).flush_interval_ms(250);
        assert_eq!(
            options.effective_strategies(),
            vec![FlushStrategy::Periodic { interval_ms: 250 }]
        );
    }

    #[test]
    fn strategies_compose_in_order() {
        let options: StoreOptions<i64> = StoreOptions::new("/tmp/x", || 0).flush_strategies([
            FlushStrategy::Debounce { delay_ms: 50 },
            FlushStrategy::OnHooks {
                hooks: vec!["agent_end".to_string()],
            },
        ]);
        assert_eq!(options.effective_strategies().len(), 2);
    }

    #[test]
    fn max_entries_is_clamped() {
        let options: StoreOptions<i64> = StoreOptions::new("/tmp/x", || 0).max_entries(0);
        assert_eq!(options.max_entries, 1);
    }
}
