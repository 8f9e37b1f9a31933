//! Entity manager: the unit-of-work entry point.

use crate::cache::{MainCache, PersistenceCache};
use crate::client::{ClientFactory, ClientMap};
use crate::error::{ClientError, PersistenceError, Result};
use crate::event::{EntityListener, EventDispatcher, LifecycleEvent};
use crate::flush::{FlushExecutor, FlushPlan, FlushReport};
use crate::graph::{FlushAction, NodeId, NodeState, ObjectGraph, ObjectGraphBuilder, Operation};
use crate::metadata::MetadataRegistry;
use crate::reader::EntityReader;
use crate::value::{Record, Row, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use strata_config::{FlushMode, StrataConfig};
use tracing::{debug, info, warn};

// ============================================================================
// Factory
// ============================================================================

/// Creates entity managers that share one registry, cache, client factory
/// and listener set.
pub struct EntityManagerFactory {
    registry: Arc<MetadataRegistry>,
    cache: Arc<PersistenceCache>,
    client_factory: Arc<dyn ClientFactory>,
    listeners: EventDispatcher,
    flush_mode: FlushMode,
}

impl EntityManagerFactory {
    pub fn new(registry: MetadataRegistry, client_factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: Arc::new(PersistenceCache::new()),
            client_factory,
            listeners: EventDispatcher::new(),
            flush_mode: FlushMode::default(),
        }
    }

    /// Factory with cache capacity and session defaults taken from `config`.
    pub fn from_config(
        registry: MetadataRegistry,
        client_factory: Arc<dyn ClientFactory>,
        config: &StrataConfig,
    ) -> Self {
        Self::new(registry, client_factory)
            .with_cache(Arc::new(PersistenceCache::from_config(&config.cache)))
            .with_flush_mode(config.session.flush_mode)
    }

    /// Share an existing cache, e.g. with another factory.
    pub fn with_cache(mut self, cache: Arc<PersistenceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Listen to lifecycle events of every entity type.
    pub fn register_listener(&mut self, listener: Arc<dyn EntityListener>) {
        self.listeners.register(listener);
    }

    /// Listen to lifecycle events of one entity type.
    pub fn register_listener_for(&mut self, entity: impl Into<String>, listener: Arc<dyn EntityListener>) {
        self.listeners.register_for(entity, listener);
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<PersistenceCache> {
        &self.cache
    }

    pub fn create_entity_manager(&self) -> EntityManager {
        EntityManager {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            clients: ClientMap::new(Arc::clone(&self.client_factory)),
            listeners: self.listeners.clone(),
            session: Mutex::new(Session::new(self.flush_mode)),
        }
    }
}

// ============================================================================
// Entity manager
// ============================================================================

/// Graph and plan queued until the next commit.
struct PendingUnit {
    graph: ObjectGraph,
    plan: FlushPlan,
    operation: Operation,
}

struct Session {
    flush_mode: FlushMode,
    tx_active: bool,
    closed: bool,
    pending: Vec<PendingUnit>,
}

impl Session {
    fn new(flush_mode: FlushMode) -> Self {
        Self {
            flush_mode,
            tx_active: false,
            closed: false,
            pending: Vec::new(),
        }
    }
}

/// Unit of work over a shared cache and lazily resolved backend clients.
///
/// Writes (`persist`, `merge`, `remove`, `commit`) hold the cache's write
/// lock for graph build, plan execution and cache update. Reads hold the
/// read lock while deciding between the cache and the store.
///
/// In [`FlushMode::Auto`] every write operation flushes before returning.
/// In [`FlushMode::Manual`] plans are queued and flushed by
/// [`commit`](Self::commit); the shared cache sees them only then.
pub struct EntityManager {
    registry: Arc<MetadataRegistry>,
    cache: Arc<PersistenceCache>,
    clients: ClientMap,
    listeners: EventDispatcher,
    session: Mutex<Session>,
}

impl EntityManager {
    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Make `record` and everything reachable through persist-cascading
    /// relations persistent. Returns the record with store-generated keys
    /// filled in (once flushed).
    pub fn persist(&self, record: Record) -> Result<Record> {
        self.ensure_open()?;
        self.listeners.fire(LifecycleEvent::PrePersist, &record)?;
        let persisted = self.write(&record, Operation::Persist)?;
        self.listeners.fire(LifecycleEvent::PostPersist, &persisted)?;
        Ok(persisted)
    }

    /// Copy `record`'s state onto the stored entity, cascading along
    /// merge-cascading relations. Returns the merged data.
    pub fn merge(&self, record: Record) -> Result<Record> {
        self.ensure_open()?;
        self.listeners.fire(LifecycleEvent::PreUpdate, &record)?;
        let merged = self.write(&record, Operation::Merge)?;
        self.listeners.fire(LifecycleEvent::PostUpdate, &merged)?;
        Ok(merged)
    }

    /// Delete `record` and everything reachable through remove-cascading
    /// relations. Cached entries become Removed markers.
    pub fn remove(&self, record: &Record) -> Result<()> {
        self.ensure_open()?;
        self.listeners.fire(LifecycleEvent::PreRemove, record)?;
        let removed = self.write(record, Operation::Remove)?;
        self.listeners.fire(LifecycleEvent::PostRemove, &removed)?;
        Ok(())
    }

    fn write(&self, record: &Record, operation: Operation) -> Result<Record> {
        let mut cache = self.cache.write();
        let mut graph = self.build_graph(record, operation, &cache)?;
        graph.cascade(operation)?;
        let mut plan = FlushPlan::build(&graph, operation);
        let Some(head) = graph.head() else {
            return Ok(record.clone());
        };

        let mut session = self.session.lock();
        if session.flush_mode == FlushMode::Manual {
            let queued = graph.materialize(head).unwrap_or_else(|| record.clone());
            debug!("Queued {} of {} ({} nodes)", operation, record.entity(), plan.len());
            session.pending.push(PendingUnit {
                graph,
                plan,
                operation,
            });
            return Ok(queued);
        }
        drop(session);

        self.execute(&mut cache, &mut graph, &mut plan, operation)?;
        Ok(graph.materialize(head).unwrap_or_else(|| record.clone()))
    }

    fn build_graph(&self, record: &Record, operation: Operation, cache: &MainCache) -> Result<ObjectGraph> {
        let mut graph = ObjectGraphBuilder::new(&self.registry, operation.initial_state()).build(record)?;

        let cached_state = graph
            .head_node()
            .and_then(|head| cache.get(head.id()))
            .map(|cached| cached.state());
        match cached_state {
            Some(state @ (NodeState::Removed | NodeState::Detached)) => graph.seed_head_state(state),
            Some(NodeState::Managed) if operation == Operation::Persist => {
                // Stored head: rewrite its row so new children are referenced
                graph.seed_head_state(NodeState::Managed);
                graph.seed_head_action(FlushAction::Update);
            }
            _ => {}
        }
        Ok(graph)
    }

    fn execute(
        &self,
        cache: &mut MainCache,
        graph: &mut ObjectGraph,
        plan: &mut FlushPlan,
        operation: Operation,
    ) -> Result<FlushReport> {
        let report = FlushExecutor::new(&self.clients).execute(plan, graph)?;
        update_cache(cache, graph, &report, operation);
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Entity `entity` with identifier `key`.
    ///
    /// A clean Managed cache entry is returned without touching the store; a
    /// Removed marker yields `None`. A fetched entity is cached.
    pub fn find(&self, entity: &str, key: impl Into<Value>) -> Result<Option<Record>> {
        self.ensure_open()?;
        let key = key.into();
        let id = identity(entity, &key)?;
        self.registry.entity(entity)?;

        let (fetched, generation) = {
            let cache = self.cache.read();
            if let Some(cached) = cache.get(&id) {
                match cached.state() {
                    NodeState::Removed => return Ok(None),
                    NodeState::Managed if !cached.is_dirty() => {
                        return Ok(Some(cached.data().clone()));
                    }
                    _ => {}
                }
            }
            let generation = cache.generation();
            let fetched = EntityReader::new(&self.registry, &self.clients).find(entity, &key)?;
            (fetched, generation)
        };

        Ok(fetched.map(|node| {
            let data = node.data().clone();
            self.cache
                .write()
                .insert_found_since(node.to_cached(data.clone()), generation);
            data
        }))
    }

    /// Entities for distinct `keys`, in first-seen order; missing keys are
    /// left out.
    pub fn find_many<I, K>(&self, entity: &str, keys: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let mut seen = Vec::new();
        let mut found = Vec::new();
        for key in keys {
            let key = key.into();
            let id = identity(entity, &key)?;
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            if let Some(record) = self.find(entity, key)? {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// `entity` rows whose `join_column` holds `parent_key`.
    pub fn find_by_relation(
        &self,
        entity: &str,
        parent_key: impl Into<Value>,
        join_column: &str,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let _cache = self.cache.read();
        EntityReader::new(&self.registry, &self.clients).find_by_relation(
            entity,
            join_column,
            &parent_key.into(),
        )
    }

    /// `entity` rows matching every value in `columns`.
    pub fn find_by_columns(&self, entity: &str, columns: &Row) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let _cache = self.cache.read();
        EntityReader::new(&self.registry, &self.clients).find_by_columns(entity, columns)
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Flush queued plans. In manual mode this only happens on commit.
    pub fn flush(&self) -> Result<FlushReport> {
        self.ensure_open()?;
        if self.flush_mode() == FlushMode::Manual {
            debug!("Manual flush mode, deferring until commit");
            return Ok(FlushReport::default());
        }
        self.flush_pending()
    }

    fn flush_pending(&self) -> Result<FlushReport> {
        let pending = std::mem::take(&mut self.session.lock().pending);
        if pending.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut cache = self.cache.write();
        let mut total = FlushReport::default();
        for mut unit in pending {
            let report = self.execute(&mut cache, &mut unit.graph, &mut unit.plan, unit.operation)?;
            total.written.extend(report.written);
            total.skipped += report.skipped;
            total.patched += report.patched;
            total.join_rows += report.join_rows;
            total.join_failures += report.join_failures;
            total.join_tables.extend(report.join_tables);
        }
        info!("Flushed {} writes", total.written.len());
        Ok(total)
    }

    pub fn begin(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.closed {
            return Err(PersistenceError::SessionClosed);
        }
        session.tx_active = true;
        Ok(())
    }

    /// Flush everything queued, whatever the flush mode, and end the
    /// transaction.
    pub fn commit(&self) -> Result<FlushReport> {
        self.ensure_open()?;
        let outcome = self.flush_pending();
        let mut session = self.session.lock();
        session.tx_active = false;
        session.pending.clear();
        outcome
    }

    /// Discard queued plans and empty the shared cache. Writes already sent
    /// to the stores stay.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        {
            let mut session = self.session.lock();
            session.tx_active = false;
            session.pending.clear();
        }
        self.cache.write().clear();
        debug!("Rolled back session");
        Ok(())
    }

    /// Discard queued plans and empty the shared cache.
    pub fn clear(&self) {
        self.session.lock().pending.clear();
        self.cache.write().clear();
    }

    /// Mark a cached entity Detached. Returns whether it was cached.
    pub fn detach(&self, entity: &str, key: impl Into<Value>) -> Result<bool> {
        self.ensure_open()?;
        let id = identity(entity, &key.into())?;
        Ok(self.cache.write().detach(&id))
    }

    /// Evict Removed markers from the shared cache.
    pub fn purge_removed(&self) -> usize {
        self.cache.write().purge_removed()
    }

    /// Drop queued plans and close every resolved client. Later operations
    /// fail with [`PersistenceError::SessionClosed`].
    pub fn close(&self) -> Result<()> {
        {
            let mut session = self.session.lock();
            if session.closed {
                return Ok(());
            }
            if !session.pending.is_empty() {
                warn!("Closing with {} unflushed plans", session.pending.len());
            }
            session.closed = true;
            session.tx_active = false;
            session.pending.clear();
        }
        self.clients.close_all()
    }

    pub fn is_open(&self) -> bool {
        !self.session.lock().closed
    }

    /// Whether a transaction is in progress.
    pub fn is_active(&self) -> bool {
        let session = self.session.lock();
        session.tx_active && !session.closed
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.session.lock().flush_mode
    }

    pub fn set_flush_mode(&self, flush_mode: FlushMode) {
        self.session.lock().flush_mode = flush_mode;
    }

    /// Number of plans waiting for commit.
    pub fn pending_len(&self) -> usize {
        self.session.lock().pending.len()
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<PersistenceCache> {
        &self.cache
    }

    fn ensure_open(&self) -> Result<()> {
        if self.session.lock().closed {
            Err(PersistenceError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session.lock();
        f.debug_struct("EntityManager")
            .field("flush_mode", &session.flush_mode)
            .field("tx_active", &session.tx_active)
            .field("closed", &session.closed)
            .field("pending", &session.pending.len())
            .field("clients", &self.clients)
            .finish()
    }
}

fn identity(entity: &str, key: &Value) -> Result<NodeId> {
    NodeId::from_value(entity, key).ok_or_else(|| {
        PersistenceError::Client(ClientError::invalid_key(
            entity,
            format!("{} value cannot identify a row", key.type_name()),
        ))
    })
}

/// Reflect a completed plan in the shared cache.
///
/// The head is cached (or turned into a Removed marker) only if it was
/// written; other written identities already cached are marked dirty, or
/// Removed for deletes.
fn update_cache(cache: &mut MainCache, graph: &ObjectGraph, report: &FlushReport, operation: Operation) {
    let head = graph.head().and_then(|idx| graph.node(idx).map(|node| (idx, node)));

    if let Some((idx, node)) = head {
        match operation {
            Operation::Persist | Operation::Merge => {
                if node.state() == NodeState::Managed
                    && report.written.iter().any(|(id, _)| id == node.id())
                {
                    let data = graph.materialize(idx).unwrap_or_else(|| node.data().clone());
                    cache.add_head_node(node.to_cached(data));
                }
            }
            Operation::Remove => {
                if node.state() == NodeState::Removed && !cache.mark_removed(node.id()) {
                    cache.insert_removed_marker(node.to_cached(node.data().clone()));
                }
            }
        }
    }

    let head_id = head.map(|(_, node)| node.id());
    for (id, action) in &report.written {
        if Some(id) == head_id {
            continue;
        }
        match action {
            FlushAction::Delete => {
                cache.mark_removed(id);
            }
            FlushAction::Insert | FlushAction::Update => {
                cache.mark_dirty(id);
            }
        }
    }
}
