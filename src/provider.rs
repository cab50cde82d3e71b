//! Segment allocator facade.
//!
//! Every call follows the same pattern: validate the group name, take the
//! group's sign (`propel` only), check out a store connection, run one or two
//! store calls, then return the connection and release the sign. Guards do the
//! releasing, so every exit path gives both back.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::config::StorageConfig;
use crate::contracts::{
    validate_group_name, AdvanceFormula, AllocatorError, GroupInfo, IdRange, SegmentStore,
    StoreError,
};
use crate::metrics::AllocatorMetrics;
use crate::pool::{Pool, Pooled};
use crate::sign::SignRegistry;
use crate::storage::SqliteSegmentStore;

/// Allocator backed by the SQLite store.
pub type SqliteSegmentAllocator = SegmentAllocator<SqliteSegmentStore>;

/// Hands out non-overlapping ID segments per group.
///
/// # Invariants
/// - `propel` calls for the same group never interleave within this process
/// - Each successful `propel` increments the group's count by exactly one
/// - A group that exists is never modified by `build_info`
pub struct SegmentAllocator<S: SegmentStore> {
    name: String,
    store: S,
    pool: Pool<S::Conn>,
    signs: SignRegistry,
    pool_timeout: Duration,
    formula: AdvanceFormula,
    metrics: AllocatorMetrics,
}

impl SegmentAllocator<SqliteSegmentStore> {
    /// Opens the SQLite store named by `config` and fills the connection pool.
    pub fn open(config: &StorageConfig) -> Result<Self, AllocatorError> {
        config.validate()?;
        let store = SqliteSegmentStore::open(&config.db_path, config.busy_timeout).map_err(
            |source| AllocatorError::StoreFailure {
                context: format!(
                    "open storage provider (name={}, db_path={})",
                    config.name,
                    config.db_path.display()
                ),
                source,
            },
        )?;
        Self::with_store(config, store)
    }
}

impl<S: SegmentStore> SegmentAllocator<S> {
    /// Builds an allocator over an already opened store.
    ///
    /// `config.db_path` and `config.busy_timeout` are not used here; they
    /// belong to whoever opened `store`.
    pub fn with_store(config: &StorageConfig, store: S) -> Result<Self, AllocatorError> {
        config.validate()?;
        tracing::info!(
            name = %config.name,
            pool_size = config.pool_size,
            pool_timeout = ?config.pool_timeout,
            advance_formula = %config.advance_formula,
            "Initializing storage provider"
        );

        let pool = Pool::init(
            format!("{} connection pool", config.name),
            usize::from(config.pool_size),
            || store.connect(),
        )
        .map_err(|source| {
            tracing::error!(name = %config.name, error = %source, "Connection pool initialization failed");
            AllocatorError::StoreFailure {
                context: format!(
                    "initialize connection pool (name={}, pool_size={})",
                    config.name, config.pool_size
                ),
                source,
            }
        })?;

        Ok(Self {
            name: config.name.clone(),
            store,
            pool,
            signs: SignRegistry::new(),
            pool_timeout: config.pool_timeout,
            formula: config.advance_formula,
            metrics: AllocatorMetrics::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    pub fn advance_formula(&self) -> AdvanceFormula {
        self.formula
    }

    /// Number of groups this process has taken a sign for.
    pub fn sign_count(&self) -> usize {
        self.signs.len()
    }

    /// Connections currently idle in the pool.
    pub fn idle_connections(&self) -> usize {
        self.pool.available()
    }

    /// Creates the group with a zero-width segment at `start`.
    ///
    /// Returns `Ok(false)` without changing anything if the group exists.
    pub fn build_info(&self, group: &str, start: u64, step: u32) -> Result<bool, AllocatorError> {
        let context = format!(
            "build group info (group={}, start={}, step={})",
            group, start, step
        );
        self.check_group(group, &context)?;

        let mut conn = self.connection(&context)?;
        let existing = self
            .store
            .get(&mut *conn, group)
            .map_err(|e| self.store_failure(&context, e))?;
        if existing.is_some() {
            tracing::warn!(group, "The group already exists, ignoring group info building");
            self.metrics.record_build(false);
            return Ok(false);
        }

        let created = self
            .store
            .create(&mut *conn, group, start, step)
            .map_err(|e| self.store_failure(&context, e))?;
        if created {
            tracing::info!(group, start, step, "Built group info");
        } else {
            tracing::warn!(group, "The group was created concurrently, ignoring group info building");
        }
        self.metrics.record_build(created);
        Ok(created)
    }

    /// Reads the group's current state. `Ok(None)` if it does not exist.
    pub fn get(&self, group: &str) -> Result<Option<GroupInfo>, AllocatorError> {
        let context = format!("get group info (group={})", group);
        self.check_group(group, &context)?;

        let mut conn = self.connection(&context)?;
        let info = self
            .store
            .get(&mut *conn, group)
            .map_err(|e| self.store_failure(&context, e))?;
        self.metrics.record_get();
        Ok(info)
    }

    /// Retires the group's current segment and returns the next one.
    ///
    /// `Ok(None)` if the group does not exist. Blocks without a timeout while
    /// another caller in this process is propelling the same group.
    pub fn propel(&self, group: &str) -> Result<Option<IdRange>, AllocatorError> {
        let context = format!("propel (group={})", group);
        self.check_group(group, &context)?;

        let started = Instant::now();
        let sign = self.signs.acquire(group);
        let _held = sign.set();

        // Declared after the sign guard, so returned to the pool before the
        // sign is released.
        let mut conn = self.connection(&context)?;
        match self.store.advance(&mut *conn, group, self.formula) {
            Ok(Some(range)) => {
                if range.begin > range.end {
                    tracing::warn!(
                        group,
                        begin = range.begin,
                        end = range.end,
                        "Advanced to an inverted segment"
                    );
                }
                self.metrics.record_propel(started.elapsed());
                Ok(Some(range))
            }
            Ok(None) => {
                tracing::warn!(group, "The group does not exist, ignoring propel");
                self.metrics.record_propel_skipped();
                Ok(None)
            }
            Err(e) => Err(self.store_failure(&context, e)),
        }
    }

    fn check_group(&self, group: &str, context: &str) -> Result<(), AllocatorError> {
        validate_group_name(group).map_err(|e| {
            self.metrics.record_validation_error();
            tracing::error!(context, error = %e, "Rejected request");
            AllocatorError::InvalidArgument(format!("{}: {}", context, e))
        })
    }

    fn connection(&self, context: &str) -> Result<Pooled<'_, S::Conn>, AllocatorError> {
        self.pool.checkout(self.pool_timeout).map_err(|source| {
            self.metrics.record_pool_timeout();
            tracing::error!(context, error = %source, "Getting a store connection failed");
            AllocatorError::ResourceUnavailable {
                context: context.to_string(),
                source,
            }
        })
    }

    fn store_failure(&self, context: &str, source: StoreError) -> AllocatorError {
        self.metrics.record_store_error();
        tracing::error!(context, error = %source, "Store call failed");
        AllocatorError::StoreFailure {
            context: context.to_string(),
            source,
        }
    }
}

static GLOBAL: OnceLock<SqliteSegmentAllocator> = OnceLock::new();

/// Returns the process-wide allocator, opening it on first call.
///
/// Concurrent first callers block until the one initialization finishes.
/// Later calls return the same instance and ignore `config`.
///
/// # Panics
///
/// Panics if the first initialization fails: the process cannot serve IDs
/// without its store.
pub fn global(config: &StorageConfig) -> &'static SqliteSegmentAllocator {
    GLOBAL.get_or_init(|| match SegmentAllocator::open(config) {
        Ok(allocator) => allocator,
        Err(e) => {
            tracing::error!(name = %config.name, error = %e, "Storage provider initialization failed");
            panic!("failed to initialize storage provider '{}': {}", config.name, e);
        }
    })
}
