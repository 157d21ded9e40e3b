//! Incremental recheck engine.
//!
//! The engine owns the current schema as a copy-on-write snapshot and a table
//! of registered rules. Every completed check records the schema elements it
//! looked at; a schema edit is diffed against the previous snapshot and only
//! the rules depending on a changed element go back to
//! [`CheckState::Unchecked`]. Reading diagnostics always rechecks unchecked
//! rules first, so a caller never observes a result computed against a schema
//! it has already edited.
//!
//! With `workers > 0` invalidated rules are also queued for background
//! checks. A result whose rule text or dependencies changed while it was being
//! computed is discarded.

mod coverage;
mod dependency;
/// Background check workers.
mod runtime;
mod stream;

pub use coverage::{Coverage, COVERAGE_EXEMPT};
pub use dependency::{schema_changes, DependencyIndex};
pub use stream::{CheckEvent, DiagnosticStream, SubscriptionId};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checker::{AppliedFix, Checker, Diagnostic, EdgeUsage, QuickFix, RuleCheck};
use crate::config::EngineConfig;
use crate::error::{DmError, DmResult, EngineError, SchemaError};
use crate::parser::split_productions;
use crate::schema::{
    EdgeId, Multiplicity, NodeId, RemovedNode, SchemaEdge, SchemaGraph, SchemaRef, ValueKind,
};

use runtime::{Job, WorkerPool};
use stream::StreamHub;

/// Upper bound on fix-and-recheck rounds in [`CheckEngine::complete_rule`].
const MAX_COMPLETION_ROUNDS: usize = 16;

/// Check state of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Unchecked,
    Checking,
    Clean,
    HasDiagnostics,
    ParseFailed,
}

impl CheckState {
    /// Returns true once a current result is available.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Clean | Self::HasDiagnostics | Self::ParseFailed)
    }

    fn of(check: &RuleCheck) -> Self {
        if check.parse_failed {
            Self::ParseFailed
        } else if check.diagnostics.is_empty() {
            Self::Clean
        } else {
            Self::HasDiagnostics
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchecked => "unchecked",
            Self::Checking => "checking",
            Self::Clean => "clean",
            Self::HasDiagnostics => "has-diagnostics",
            Self::ParseFailed => "parse-failed",
        })
    }
}

/// Outcome of a schema edit: the mutation's own result plus the rules it
/// moved back to [`CheckState::Unchecked`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEdit<T> {
    pub value: T,
    pub invalidated: Vec<String>,
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Checks that ran the checker.
    pub checks_run: u64,
    /// Rechecks answered from the (source, schema) fingerprint cache.
    pub cache_hits: u64,
    /// Results discarded because the rule changed while they were computed.
    pub superseded: u64,
    /// Events not delivered to a lagging subscriber.
    pub dropped_events: u64,
    /// Live diagnostic streams.
    pub subscribers: usize,
}

#[derive(Debug, Clone)]
struct SchemaSnapshot {
    graph: Arc<SchemaGraph>,
    fingerprint: blake3::Hash,
}

impl SchemaSnapshot {
    fn new(graph: SchemaGraph) -> Self {
        let fingerprint = graph.fingerprint();
        Self {
            graph: Arc::new(graph),
            fingerprint,
        }
    }
}

/// Where a rule's text starts inside its source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Origin {
    offset: usize,
    lines: u32,
}

#[derive(Debug)]
struct CachedCheck {
    source_fp: blake3::Hash,
    schema_fp: blake3::Hash,
    check: RuleCheck,
}

#[derive(Debug)]
struct RuleEntry {
    source: Arc<str>,
    source_fp: blake3::Hash,
    file: Option<String>,
    origin: Origin,
    generation: u64,
    state: CheckState,
    /// Generation an in-flight check was started for.
    running: Option<u64>,
    /// Latest published result; stale while the rule is unchecked.
    last: Option<CachedCheck>,
}

impl RuleEntry {
    fn is_idle_unchecked(&self) -> bool {
        self.state == CheckState::Unchecked && self.running.is_none()
    }

    /// Published diagnostics in source-file coordinates.
    fn diagnostics(&self) -> Vec<Diagnostic> {
        let Some(last) = &self.last else {
            return Vec::new();
        };
        last.check
            .diagnostics
            .iter()
            .cloned()
            .map(|mut d| {
                d.span = d.span.shifted(self.origin.offset, self.origin.lines);
                d
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct RuleTable {
    rules: BTreeMap<String, RuleEntry>,
    index: DependencyIndex,
    next_generation: u64,
}

impl RuleTable {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Stores new rule text. Returns false if the text is unchanged.
    fn set_source(&mut self, rule: &str, source: &str, file: Option<String>, origin: Origin) -> bool {
        let source_fp = blake3::hash(source.as_bytes());
        if let Some(entry) = self.rules.get_mut(rule) {
            if entry.source_fp == source_fp {
                entry.file = file;
                entry.origin = origin;
                return false;
            }
        }
        let generation = self.bump();
        match self.rules.get_mut(rule) {
            Some(entry) => {
                entry.source = Arc::from(source);
                entry.source_fp = source_fp;
                entry.file = file;
                entry.origin = origin;
                entry.generation = generation;
                entry.state = CheckState::Unchecked;
            }
            None => {
                self.rules.insert(
                    rule.to_string(),
                    RuleEntry {
                        source: Arc::from(source),
                        source_fp,
                        file,
                        origin,
                        generation,
                        state: CheckState::Unchecked,
                        running: None,
                        last: None,
                    },
                );
            }
        }
        true
    }

    fn remove(&mut self, rule: &str) -> bool {
        self.index.remove(rule);
        self.rules.remove(rule).is_some()
    }

    /// Moves every rule depending on `changed` back to unchecked.
    ///
    /// In-flight checks may be reading the previous snapshot and have no
    /// recorded dependencies yet, so they are invalidated too.
    fn invalidate(&mut self, changed: &BTreeSet<SchemaRef>) -> Vec<String> {
        if changed.is_empty() {
            return Vec::new();
        }
        let mut hit = self.index.dependents(changed);
        hit.extend(
            self.rules
                .iter()
                .filter(|(_, e)| e.running.is_some())
                .map(|(id, _)| id.clone()),
        );
        let mut out = Vec::with_capacity(hit.len());
        for rule in hit {
            let generation = self.bump();
            if let Some(entry) = self.rules.get_mut(&rule) {
                entry.generation = generation;
                entry.state = CheckState::Unchecked;
                out.push(rule);
            }
        }
        out
    }

    fn pending(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(_, e)| e.is_idle_unchecked())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn all_settled(&self) -> bool {
        self.rules.values().all(|e| e.state.is_settled())
    }
}

/// A rule taken for checking.
struct Claim {
    rule: String,
    generation: u64,
    source: Arc<str>,
    schema: SchemaSnapshot,
    cached: Option<RuleCheck>,
}

/// State shared between the engine handle and its workers.
pub(crate) struct Shared {
    config: EngineConfig,
    schema: RwLock<SchemaSnapshot>,
    /// Serializes schema edits.
    writer: Mutex<()>,
    rules: Mutex<RuleTable>,
    settled: Condvar,
    streams: StreamHub,
    checks_run: AtomicU64,
    cache_hits: AtomicU64,
    superseded: AtomicU64,
}

impl Shared {
    pub(crate) fn new(schema: SchemaGraph, config: EngineConfig) -> Self {
        let streams = StreamHub::new(config.stream_capacity);
        Self {
            config,
            schema: RwLock::new(SchemaSnapshot::new(schema)),
            writer: Mutex::new(()),
            rules: Mutex::new(RuleTable::default()),
            settled: Condvar::new(),
            streams,
            checks_run: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    fn lock_rules(&self) -> DmResult<MutexGuard<'_, RuleTable>> {
        self.rules
            .lock()
            .map_err(|_| DmError::internal("rule table lock poisoned"))
    }

    fn wait<'a>(&self, table: MutexGuard<'a, RuleTable>) -> DmResult<MutexGuard<'a, RuleTable>> {
        self.settled
            .wait(table)
            .map_err(|_| DmError::internal("rule table lock poisoned"))
    }

    fn snapshot(&self) -> DmResult<SchemaSnapshot> {
        self.schema
            .read()
            .map(|s| s.clone())
            .map_err(|_| DmError::internal("schema lock poisoned"))
    }

    /// Takes `rule` for checking if it is unchecked and nobody else holds it.
    fn claim(&self, table: &mut RuleTable, rule: &str) -> DmResult<Option<Claim>> {
        let Some(entry) = table.rules.get_mut(rule) else {
            return Ok(None);
        };
        if !entry.is_idle_unchecked() {
            return Ok(None);
        }
        let schema = self.snapshot()?;
        let cached = entry
            .last
            .as_ref()
            .filter(|c| c.source_fp == entry.source_fp && c.schema_fp == schema.fingerprint)
            .map(|c| c.check.clone());
        entry.running = Some(entry.generation);
        entry.state = CheckState::Checking;
        Ok(Some(Claim {
            rule: rule.to_string(),
            generation: entry.generation,
            source: Arc::clone(&entry.source),
            schema,
            cached,
        }))
    }

    fn run(&self, claim: &mut Claim) -> RuleCheck {
        if let Some(check) = claim.cached.take() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(rule = %claim.rule, generation = claim.generation, "reusing cached check");
            return check;
        }
        self.checks_run.fetch_add(1, Ordering::Relaxed);
        Checker::new(&claim.schema.graph, &self.config.checker).check_source(&claim.rule, &claim.source)
    }

    /// Stores a finished check unless its rule moved on while it ran.
    /// Returns false if the result was discarded as superseded.
    fn publish(&self, claim: Claim, check: RuleCheck) -> DmResult<bool> {
        let mut table = self.lock_rules()?;
        let RuleTable { rules, index, .. } = &mut *table;
        let Some(entry) = rules.get_mut(&claim.rule) else {
            drop(table);
            self.settled.notify_all();
            debug!(rule = %claim.rule, "rule removed during check; result dropped");
            return Ok(true);
        };
        if entry.running == Some(claim.generation) {
            entry.running = None;
        }
        if entry.generation != claim.generation {
            self.superseded.fetch_add(1, Ordering::Relaxed);
            warn!(
                rule = %claim.rule,
                generation = claim.generation,
                current = entry.generation,
                "discarding superseded check result"
            );
            drop(table);
            self.settled.notify_all();
            return Ok(false);
        }

        let state = CheckState::of(&check);
        index.record(&claim.rule, &check.dependencies);
        entry.state = state;
        entry.last = Some(CachedCheck {
            source_fp: entry.source_fp,
            schema_fp: claim.schema.fingerprint,
            check,
        });
        let event = CheckEvent {
            rule: claim.rule,
            generation: claim.generation,
            state,
            diagnostics: entry.diagnostics(),
            schema_fingerprint: claim.schema.fingerprint.to_hex().to_string(),
            timestamp: Utc::now(),
        };
        debug!(
            rule = %event.rule,
            generation = event.generation,
            state = %event.state,
            diagnostics = event.diagnostics.len(),
            "check published"
        );
        // Under the table lock, so events for one rule reach streams in
        // generation order.
        self.streams.publish(&event);
        drop(table);
        self.settled.notify_all();
        Ok(true)
    }

    /// Checks `rule` on this thread if it is unchecked and idle, retrying
    /// while results get superseded. Returns true if a check ran.
    pub(crate) fn check_pending_rule(&self, rule: &str) -> DmResult<bool> {
        let mut ran = false;
        loop {
            let claim = {
                let mut table = self.lock_rules()?;
                self.claim(&mut table, rule)?
            };
            let Some(mut claim) = claim else {
                return Ok(ran);
            };
            ran = true;
            let check = self.run(&mut claim);
            if self.publish(claim, check)? {
                return Ok(true);
            }
        }
    }

    /// Blocks until `rule` has a current result and returns the locked table.
    fn settle(&self, rule: &str) -> DmResult<MutexGuard<'_, RuleTable>> {
        let mut table = self.lock_rules()?;
        loop {
            let entry = table
                .rules
                .get(rule)
                .ok_or_else(|| EngineError::RuleNotFound(rule.to_string()))?;
            if entry.state.is_settled() {
                return Ok(table);
            }
            if entry.running.is_some() {
                table = self.wait(table)?;
                continue;
            }
            drop(table);
            self.check_pending_rule(rule)?;
            table = self.lock_rules()?;
        }
    }

    /// Blocks until every rule has a current result, checking pending rules
    /// on this thread. Returns the number of checks run here and the locked
    /// table.
    fn settle_all(&self) -> DmResult<(usize, MutexGuard<'_, RuleTable>)> {
        let mut checked = 0;
        let mut table = self.lock_rules()?;
        loop {
            let pending = table.pending();
            if !pending.is_empty() {
                drop(table);
                for rule in &pending {
                    if self.check_pending_rule(rule)? {
                        checked += 1;
                    }
                }
                table = self.lock_rules()?;
                continue;
            }
            if table.all_settled() {
                return Ok((checked, table));
            }
            table = self.wait(table)?;
        }
    }
}

/// Incremental checker over a set of rules and one editable schema.
pub struct CheckEngine {
    shared: Arc<Shared>,
    pool: Option<WorkerPool>,
}

impl CheckEngine {
    /// Creates an engine; starts background workers when `config.workers > 0`.
    pub fn new(schema: SchemaGraph, config: EngineConfig) -> Self {
        let workers = config.workers;
        let queue_capacity = config.queue_capacity;
        let shared = Arc::new(Shared::new(schema, config));
        let pool = (workers > 0).then(|| WorkerPool::start(workers, queue_capacity, &shared));
        info!(workers, "check engine started");
        Self { shared, pool }
    }

    /// Synchronous engine with the default configuration.
    pub fn with_schema(schema: SchemaGraph) -> Self {
        Self::new(schema, EngineConfig::default())
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The current schema snapshot.
    pub fn schema(&self) -> DmResult<Arc<SchemaGraph>> {
        Ok(self.shared.snapshot()?.graph)
    }

    pub fn schema_fingerprint(&self) -> DmResult<blake3::Hash> {
        Ok(self.shared.snapshot()?.fingerprint)
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            checks_run: self.shared.checks_run.load(Ordering::Relaxed),
            cache_hits: self.shared.cache_hits.load(Ordering::Relaxed),
            superseded: self.shared.superseded.load(Ordering::Relaxed),
            dropped_events: self.shared.streams.dropped_events(),
            subscribers: self.shared.streams.subscriber_count(),
        }
    }

    fn schedule<'a>(&self, rules: impl IntoIterator<Item = &'a String>) {
        let Some(pool) = &self.pool else {
            return;
        };
        for rule in rules {
            if let Err(err) = pool.try_submit(Job::Check { rule: rule.clone() }) {
                warn!(rule = %rule, error = %err, "background check not queued; rule stays unchecked");
            }
        }
    }

    // ---- rules ----

    /// Registers or replaces `rule` and returns its diagnostics.
    pub fn check_rule(&self, rule: &str, source: &str) -> DmResult<Vec<Diagnostic>> {
        self.update_rule(rule, source)?;
        self.diagnostics(rule)
    }

    /// Registers or replaces `rule` without waiting for its check.
    /// Returns false if the text is unchanged.
    pub fn update_rule(&self, rule: &str, source: &str) -> DmResult<bool> {
        let changed = self
            .shared
            .lock_rules()?
            .set_source(rule, source, None, Origin::default());
        if changed {
            self.schedule([&rule.to_string()]);
        }
        Ok(changed)
    }

    pub fn remove_rule(&self, rule: &str) -> DmResult<()> {
        let removed = self.shared.lock_rules()?.remove(rule);
        self.shared.settled.notify_all();
        if removed {
            Ok(())
        } else {
            Err(EngineError::RuleNotFound(rule.to_string()).into())
        }
    }

    /// Registers one rule per production in `text`, named `file::production`.
    ///
    /// A chunk that does not start with a production name is named after its
    /// line; repeated names get a `#n` suffix. Rules previously loaded from
    /// `file` that no longer exist are removed. Returns the registered ids in
    /// source order.
    pub fn load_source_file(&self, file: &str, text: &str) -> DmResult<Vec<String>> {
        let chunks = split_productions(text);
        let mut ids = Vec::with_capacity(chunks.len());
        let mut seen = BTreeSet::new();
        let mut changed = Vec::new();

        let mut table = self.shared.lock_rules()?;
        for chunk in chunks {
            let base = match &chunk.name {
                Some(name) => format!("{file}::{name}"),
                None => format!("{file}::line{}", chunk.span.line),
            };
            let mut id = base.clone();
            let mut n = 2;
            while !seen.insert(id.clone()) {
                id = format!("{base}#{n}");
                n += 1;
            }
            let source = chunk.span.slice(text).unwrap_or_default();
            let origin = Origin {
                offset: chunk.span.start,
                lines: chunk.span.line.saturating_sub(1),
            };
            if table.set_source(&id, source, Some(file.to_string()), origin) {
                changed.push(id.clone());
            }
            ids.push(id);
        }
        let stale: Vec<String> = table
            .rules
            .iter()
            .filter(|(id, e)| e.file.as_deref() == Some(file) && !seen.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            table.remove(id);
        }
        drop(table);
        self.shared.settled.notify_all();

        info!(file, rules = ids.len(), changed = changed.len(), removed = stale.len(), "source file loaded");
        self.schedule(&changed);
        Ok(ids)
    }

    /// Registered rule ids in order.
    pub fn rule_ids(&self) -> DmResult<Vec<String>> {
        Ok(self.shared.lock_rules()?.rules.keys().cloned().collect())
    }

    /// Current state without triggering a check.
    pub fn rule_state(&self, rule: &str) -> DmResult<CheckState> {
        self.shared
            .lock_rules()?
            .rules
            .get(rule)
            .map(|e| e.state)
            .ok_or_else(|| EngineError::RuleNotFound(rule.to_string()).into())
    }

    /// Diagnostics of `rule`, checking it first if needed.
    pub fn diagnostics(&self, rule: &str) -> DmResult<Vec<Diagnostic>> {
        let table = self.shared.settle(rule)?;
        table
            .rules
            .get(rule)
            .map(RuleEntry::diagnostics)
            .ok_or_else(|| EngineError::RuleNotFound(rule.to_string()).into())
    }

    /// Diagnostics of every rule, checking unchecked rules first.
    pub fn all_diagnostics(&self) -> DmResult<BTreeMap<String, Vec<Diagnostic>>> {
        let (_, table) = self.shared.settle_all()?;
        Ok(table
            .rules
            .iter()
            .map(|(id, entry)| (id.clone(), entry.diagnostics()))
            .collect())
    }

    /// Checks every unchecked rule on the calling thread and waits for
    /// in-flight background checks. Returns the number of checks run here.
    pub fn recheck_pending(&self) -> DmResult<usize> {
        let (checked, _table) = self.shared.settle_all()?;
        Ok(checked)
    }

    /// Schema coverage of the whole rule set, checking unchecked rules
    /// first. Schema edits wait until it is computed.
    pub fn coverage(&self) -> DmResult<Coverage> {
        let _writer = self
            .shared
            .writer
            .lock()
            .map_err(|_| DmError::internal("schema writer lock poisoned"))?;
        let (_, table) = self.shared.settle_all()?;
        let mut usage = EdgeUsage::default();
        for entry in table.rules.values() {
            if let Some(last) = &entry.last {
                usage.extend(last.check.usage.clone());
            }
        }
        drop(table);

        let schema = self.shared.snapshot()?;
        let coverage = Coverage::compute(&schema.graph, &usage);
        info!(
            never_tested = coverage.never_tested.len(),
            never_created = coverage.never_created.len(),
            tested_not_created = coverage.tested_not_created.len(),
            created_not_tested = coverage.created_not_tested.len(),
            "schema coverage computed"
        );
        Ok(coverage)
    }

    /// Rules whose last check depended on `item`.
    pub fn dependents(&self, item: &SchemaRef) -> DmResult<Vec<String>> {
        Ok(self.shared.lock_rules()?.index.dependents([item]).into_iter().collect())
    }

    /// Dependency set recorded by the last check of `rule`.
    pub fn dependencies(&self, rule: &str) -> DmResult<BTreeSet<SchemaRef>> {
        let table = self.shared.lock_rules()?;
        if !table.rules.contains_key(rule) {
            return Err(EngineError::RuleNotFound(rule.to_string()).into());
        }
        Ok(table.index.dependencies_of(rule).cloned().unwrap_or_default())
    }

    /// Stream of completed checks.
    pub fn subscribe(&self) -> DmResult<DiagnosticStream> {
        self.shared.streams.subscribe()
    }

    // ---- schema ----

    /// Applies `edit` to a copy of the schema and swaps it in on success.
    ///
    /// A failed edit leaves the schema untouched. Dependent rules are
    /// invalidated once, after the whole edit.
    pub fn edit_batch<T>(
        &self,
        edit: impl FnOnce(&mut SchemaGraph) -> Result<T, SchemaError>,
    ) -> DmResult<SchemaEdit<T>> {
        let _writer = self
            .shared
            .writer
            .lock()
            .map_err(|_| DmError::internal("schema writer lock poisoned"))?;
        let current = self.shared.snapshot()?;
        let mut next = SchemaGraph::clone(&current.graph);
        let value = edit(&mut next)?;
        let changed = schema_changes(&current.graph, &next);

        let invalidated = {
            let mut table = self.shared.lock_rules()?;
            *self
                .shared
                .schema
                .write()
                .map_err(|_| DmError::internal("schema lock poisoned"))? = SchemaSnapshot::new(next);
            table.invalidate(&changed)
        };

        info!(
            changed = changed.len(),
            invalidated = invalidated.len(),
            "schema edit committed"
        );
        self.schedule(&invalidated);
        Ok(SchemaEdit { value, invalidated })
    }

    /// Replaces the whole schema, e.g. after importing a document.
    pub fn replace_schema(&self, schema: SchemaGraph) -> DmResult<SchemaEdit<()>> {
        self.edit_batch(move |current| {
            *current = schema;
            Ok(())
        })
    }

    pub fn add_node(&self, name: impl Into<String>) -> DmResult<SchemaEdit<NodeId>> {
        self.edit_batch(|schema| schema.add_node(name))
    }

    pub fn add_root(&self, name: impl Into<String>) -> DmResult<SchemaEdit<NodeId>> {
        self.edit_batch(|schema| schema.add_root(name))
    }

    pub fn set_root(&self, name: impl Into<String>, node: NodeId) -> DmResult<SchemaEdit<Option<NodeId>>> {
        self.edit_batch(|schema| schema.set_root(name, node))
    }

    pub fn add_edge(
        &self,
        from: NodeId,
        name: impl Into<String>,
        kind: ValueKind,
        multiplicity: Multiplicity,
    ) -> DmResult<SchemaEdit<EdgeId>> {
        self.edit_batch(|schema| schema.add_edge(from, name, kind, multiplicity))
    }

    pub fn add_child(&self, from: NodeId, attribute: impl Into<String>) -> DmResult<SchemaEdit<(EdgeId, NodeId)>> {
        self.edit_batch(|schema| schema.add_child(from, attribute))
    }

    pub fn remove_edge(&self, id: EdgeId) -> DmResult<SchemaEdit<SchemaEdge>> {
        self.edit_batch(|schema| schema.remove_edge(id))
    }

    pub fn remove_node(&self, id: NodeId) -> DmResult<SchemaEdit<RemovedNode>> {
        self.edit_batch(|schema| schema.remove_node(id))
    }

    pub fn remove_node_repointing(&self, id: NodeId, replacement: NodeId) -> DmResult<SchemaEdit<RemovedNode>> {
        self.edit_batch(|schema| schema.remove_node_repointing(id, replacement))
    }

    pub fn update_edge_kind(&self, id: EdgeId, kind: ValueKind) -> DmResult<SchemaEdit<SchemaEdge>> {
        self.edit_batch(|schema| schema.update_edge_kind(id, kind))
    }

    pub fn rename_node(&self, id: NodeId, name: impl Into<String>) -> DmResult<SchemaEdit<String>> {
        self.edit_batch(|schema| schema.rename_node(id, name))
    }

    // ---- quick fixes ----

    pub fn apply_quick_fix(&self, fix: &QuickFix) -> DmResult<SchemaEdit<AppliedFix>> {
        self.edit_batch(|schema| fix.apply(schema))
    }

    /// Applies the quick fixes of `rule` until it has none left.
    ///
    /// Each round applies every distinct fix the current diagnostics offer,
    /// then rechecks; new identifier nodes can expose deeper missing
    /// attributes in the next round. Fixes that conflict with the schema are
    /// skipped.
    pub fn complete_rule(&self, rule: &str) -> DmResult<SchemaEdit<Vec<AppliedFix>>> {
        let mut applied = Vec::new();
        let mut invalidated = BTreeSet::new();
        for _ in 0..MAX_COMPLETION_ROUNDS {
            let fixes = distinct_fixes(&self.diagnostics(rule)?);
            if fixes.is_empty() {
                break;
            }
            let edit = self.edit_batch(|schema| {
                let mut round = Vec::new();
                for fix in &fixes {
                    match fix.apply(schema) {
                        Ok(AppliedFix::Unchanged) => {}
                        Ok(done) => round.push(done),
                        Err(err) if err.is_conflict() => {
                            debug!(rule, fix = %fix, error = %err, "skipping conflicting fix");
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(round)
            })?;
            invalidated.extend(edit.invalidated);
            if edit.value.is_empty() {
                break;
            }
            applied.extend(edit.value);
        }
        info!(rule, applied = applied.len(), "rule completion finished");
        Ok(SchemaEdit {
            value: applied,
            invalidated: invalidated.into_iter().collect(),
        })
    }

    #[cfg(test)]
    fn claim_for_test(&self, rule: &str) -> Claim {
        let mut table = self.shared.lock_rules().unwrap();
        self.shared.claim(&mut table, rule).unwrap().unwrap()
    }
}

impl Drop for CheckEngine {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

/// One fix per (node, attribute) or (edge, value), in diagnostic order.
fn distinct_fixes(diagnostics: &[Diagnostic]) -> Vec<QuickFix> {
    let mut seen_targets = BTreeSet::new();
    let mut seen_values = BTreeSet::new();
    let mut out = Vec::new();
    for fix in diagnostics.iter().filter_map(|d| d.quick_fix.as_ref()) {
        let fresh = match fix {
            QuickFix::ExtendEnumeration { edge, value } => seen_values.insert((*edge, value.clone())),
            QuickFix::AddChild { node, attribute } | QuickFix::AddEdge { node, attribute, .. } => {
                seen_targets.insert((*node, attribute.clone()))
            }
        };
        if fresh {
            out.push(fix.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::DiagnosticKind;

    const GOOD: &str = "sp {read (state <s> ^io <io>) (<io> ^input-link <il>) --> (<s> ^seen yes)}";
    const TYPO: &str = "sp {read (state <s> ^io <io>) (<io> ^inputlink <il>) --> (<s> ^seen yes)}";

    fn schema() -> (SchemaGraph, NodeId, EdgeId) {
        let mut g = SchemaGraph::with_roots(["state"]).unwrap();
        let state = g.root("state").unwrap();
        let (_, io) = g.add_child(state, "io").unwrap();
        let (input_link, _) = g.add_child(io, "input-link").unwrap();
        g.add_edge(state, "seen", ValueKind::enumeration(["yes", "no"]), Multiplicity::Single)
            .unwrap();
        (g, io, input_link)
    }

    #[test]
    fn test_check_rule_states() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        assert!(engine.check_rule("r", GOOD).unwrap().is_empty());
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Clean);

        let diags = engine.check_rule("r", TYPO).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UndefinedAttribute);
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::HasDiagnostics);

        engine.check_rule("r", "sp {broken").unwrap();
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::ParseFailed);
    }

    #[test]
    fn test_unchanged_text_is_not_rechecked() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();
        assert!(!engine.update_rule("r", GOOD).unwrap());
        engine.check_rule("r", GOOD).unwrap();
        assert_eq!(engine.stats().checks_run, 1);
    }

    #[test]
    fn test_unrelated_edit_keeps_rule_settled() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();
        let lonely = engine.add_node("lonely").unwrap();
        assert!(lonely.invalidated.is_empty());
        let edit = engine
            .add_edge(lonely.value, "x", ValueKind::String, Multiplicity::Single)
            .unwrap();
        assert!(edit.invalidated.is_empty());
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Clean);
    }

    #[test]
    fn test_edge_removal_invalidates_dependents() {
        let (g, _, input_link) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();
        engine.check_rule("other", "sp {o (state <s> ^seen yes) --> (<s> ^seen no)}").unwrap();

        let edit = engine.remove_edge(input_link).unwrap();
        assert_eq!(edit.invalidated, vec!["r".to_string()]);
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Unchecked);
        assert_eq!(engine.rule_state("other").unwrap(), CheckState::Clean);

        let diags = engine.diagnostics("r").unwrap();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("input-link"));
    }

    #[test]
    fn test_failed_edit_leaves_schema_and_rules_alone() {
        let (g, io, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();
        let before = engine.schema_fingerprint().unwrap();

        let err = engine
            .edit_batch(|schema| {
                schema.add_edge(io, "extra", ValueKind::String, Multiplicity::Single)?;
                schema.add_edge(io, "input-link", ValueKind::integer(), Multiplicity::Single)
            })
            .unwrap_err();
        assert!(err.is_schema());
        assert_eq!(engine.schema_fingerprint().unwrap(), before);
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Clean);
    }

    #[test]
    fn test_cache_reuses_result_after_undo() {
        let (g, io, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();

        let added = engine
            .add_edge(io, "output-link", ValueKind::String, Multiplicity::Single)
            .unwrap();
        assert_eq!(added.invalidated, vec!["r".to_string()]);
        engine.remove_edge(added.value).unwrap();

        assert!(engine.diagnostics("r").unwrap().is_empty());
        let stats = engine.stats();
        assert_eq!(stats.checks_run, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_regrouped_enumeration_is_not_served_from_cache() {
        let (mut g, _, _) = schema();
        let state = g.root("state").unwrap();
        let mode = g
            .add_edge(state, "mode", ValueKind::enumeration(["a", "b"]), Multiplicity::Single)
            .unwrap();
        let engine = CheckEngine::with_schema(g);
        let rule = "sp {m (state <s> ^mode a) --> (<s> ^seen yes)}";
        assert!(engine.check_rule("m", rule).unwrap().is_empty());

        let edit = engine.update_edge_kind(mode, ValueKind::enumeration(["a b"])).unwrap();
        assert_eq!(edit.invalidated, vec!["m".to_string()]);
        let diags = engine.diagnostics("m").unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::ValueNotInEnumeration);
        assert_eq!(engine.stats().cache_hits, 0);
    }

    #[test]
    fn test_stream_events_arrive_in_generation_order() {
        let (g, _, _) = schema();
        let config = EngineConfig {
            workers: 4,
            ..EngineConfig::default()
        };
        let engine = CheckEngine::new(g, config);
        let stream = engine.subscribe().unwrap();
        assert_eq!(engine.stats().subscribers, 1);

        for i in 0..64 {
            engine.update_rule("r", if i % 2 == 0 { TYPO } else { GOOD }).unwrap();
        }
        engine.recheck_pending().unwrap();

        let mut last: Option<CheckEvent> = None;
        while let Some(event) = stream.try_recv().unwrap() {
            if let Some(prev) = &last {
                assert!(prev.generation < event.generation, "{} after {}", event.generation, prev.generation);
            }
            last = Some(event);
        }
        assert_eq!(last.map(|e| e.state), Some(CheckState::Clean));

        drop(stream);
        assert_eq!(engine.stats().subscribers, 0);
    }

    #[test]
    fn test_coverage_follows_rule_set() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        let seen = engine.schema().unwrap().edges().find(|e| e.name == "seen").unwrap().id;

        let coverage = engine.coverage().unwrap();
        assert_eq!(coverage.never_tested, vec![seen]);
        assert_eq!(coverage.never_created, vec![seen]);

        // Tests io and input-link, creates seen.
        engine.update_rule("r", GOOD).unwrap();
        let coverage = engine.coverage().unwrap();
        assert_eq!(coverage.never_tested, vec![seen]);
        assert!(coverage.never_created.is_empty());
        assert_eq!(coverage.created_not_tested, vec![seen]);
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Clean);

        engine
            .update_rule("t", "sp {t (state <s> ^seen yes) --> (<s> ^seen no)}")
            .unwrap();
        assert!(engine.coverage().unwrap().is_complete());
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.update_rule("r", TYPO).unwrap();
        let stream = engine.subscribe().unwrap();

        let mut stale = engine.claim_for_test("r");
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Checking);
        engine.update_rule("r", GOOD).unwrap();

        let check = engine.shared.run(&mut stale);
        assert!(!engine.shared.publish(stale, check).unwrap());
        assert_eq!(engine.rule_state("r").unwrap(), CheckState::Unchecked);
        assert!(stream.try_recv().unwrap().is_none());

        assert!(engine.diagnostics("r").unwrap().is_empty());
        assert_eq!(engine.stats().superseded, 1);
        let event = stream.try_recv().unwrap().unwrap();
        assert_eq!(event.state, CheckState::Clean);
    }

    #[test]
    fn test_schema_edit_during_check_discards_result() {
        let (g, _, input_link) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.update_rule("r", GOOD).unwrap();

        let mut stale = engine.claim_for_test("r");
        let edit = engine.remove_edge(input_link).unwrap();
        assert!(edit.invalidated.contains(&"r".to_string()));

        let check = engine.shared.run(&mut stale);
        assert!(check.diagnostics.is_empty());
        assert!(!engine.shared.publish(stale, check).unwrap());
        assert_eq!(engine.diagnostics("r").unwrap().len(), 1);
    }

    #[test]
    fn test_load_source_file_shifts_spans() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        let text = format!("# io rules\n{GOOD}\n\n{TYPO}\n");
        let ids = engine.load_source_file("io.soar", &text).unwrap();
        assert_eq!(ids, vec!["io.soar::read".to_string(), "io.soar::read#2".to_string()]);

        let all = engine.all_diagnostics().unwrap();
        assert!(all["io.soar::read"].is_empty());
        let typo = &all["io.soar::read#2"];
        assert_eq!(typo.len(), 1);
        assert_eq!(typo[0].span.line, 4);
        assert!(typo[0].span.slice(&text).unwrap().starts_with("^inputlink"));
    }

    #[test]
    fn test_reload_removes_vanished_rules() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine
            .load_source_file("a.soar", &format!("{GOOD}\nsp {{gone (state <s> ^seen yes) --> (<s> ^seen no)}}\n"))
            .unwrap();
        assert_eq!(engine.rule_ids().unwrap().len(), 2);
        engine.load_source_file("a.soar", GOOD).unwrap();
        assert_eq!(engine.rule_ids().unwrap(), vec!["a.soar::read".to_string()]);
        assert!(engine.rule_state("a.soar::gone").is_err());
    }

    #[test]
    fn test_remove_rule() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        engine.check_rule("r", GOOD).unwrap();
        engine.remove_rule("r").unwrap();
        let err = engine.remove_rule("r").unwrap_err();
        assert!(err.is_engine());
        assert!(engine.diagnostics("r").is_err());
    }

    #[test]
    fn test_complete_rule_adds_nested_attributes() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        let rule = "sp {deep (state <s> ^io <io>) (<io> ^output-link <ol>) (<ol> ^command <c>) (<c> ^name move) --> (<s> ^seen yes)}";
        assert!(!engine.check_rule("deep", rule).unwrap().is_empty());

        let edit = engine.complete_rule("deep").unwrap();
        assert!(edit.value.len() >= 3);
        assert!(edit.invalidated.contains(&"deep".to_string()));
        assert!(engine.diagnostics("deep").unwrap().is_empty());
        assert!(engine.complete_rule("deep").unwrap().value.is_empty());
    }

    #[test]
    fn test_distinct_fixes() {
        let (g, _, _) = schema();
        let engine = CheckEngine::with_schema(g);
        let rule = "sp {twice (state <s> ^color red) (state <s> ^color blue) --> (<s> ^seen yes)}";
        let diags = engine.check_rule("twice", rule).unwrap();
        assert_eq!(diags.len(), 2);
        assert_eq!(distinct_fixes(&diags).len(), 1);
    }
}
