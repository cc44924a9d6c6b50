//! Observable type cells.
//!
//! A cell holds a type that may not be known yet. Consumers subscribe to a
//! set of targets (known types or cells) with [`CellStore::on_ready`]; the
//! subscription becomes ready exactly once, as soon as every target has
//! resolved. Each subscription carries a counter of unresolved targets that
//! every resolving cell decrements.
//!
//! Everything is single-threaded: resolving a cell returns the
//! subscriptions it completed, and the caller runs them before returning.
//! Cells resolve at most once; later resolutions are ignored.

use ena::unify::{EqUnifyValue, InPlaceUnificationTable, UnifyKey};
use rustc_hash::{FxHashMap, FxHashSet};

use itir_common::ty::TypeSpec;

/// Key of an observable cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId(pub u32);

/// A resolved cell value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved(pub TypeSpec);

impl UnifyKey for CellId {
    type Value = Option<Resolved>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        CellId(u)
    }

    fn tag() -> &'static str {
        "CellId"
    }
}

impl EqUnifyValue for Resolved {}

/// Something a subscription waits for.
#[derive(Clone, Debug)]
pub enum Target {
    Ready(TypeSpec),
    Cell(CellId),
}

/// A subscription whose targets are all resolved.
#[derive(Debug)]
pub struct Fired<A> {
    pub action: A,
    /// Resolved target types, in subscription order.
    pub types: Vec<TypeSpec>,
}

/// A subscription that would wait on its own result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub cell: CellId,
}

struct Subscription<A> {
    remaining: usize,
    targets: Vec<Target>,
    /// The cell this subscription's action resolves, if any. Used only for
    /// cycle detection.
    resolves: Option<CellId>,
    action: Option<A>,
}

pub struct CellStore<A> {
    table: InPlaceUnificationTable<CellId>,
    subscriptions: Vec<Subscription<A>>,
    /// Subscriptions waiting on each unresolved cell.
    waiting: FxHashMap<CellId, Vec<usize>>,
}

impl<A> Default for CellStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> CellStore<A> {
    pub fn new() -> Self {
        CellStore {
            table: InPlaceUnificationTable::new(),
            subscriptions: Vec::new(),
            waiting: FxHashMap::default(),
        }
    }

    pub fn new_cell(&mut self) -> CellId {
        self.table.new_key(None)
    }

    pub fn probe(&mut self, cell: CellId) -> Option<TypeSpec> {
        self.table.probe_value(cell).map(|r| r.0)
    }

    pub fn is_resolved(&mut self, cell: CellId) -> bool {
        self.table.probe_value(cell).is_some()
    }

    /// Subscribe `action` to `targets`.
    ///
    /// Returns the fired subscription right away when every target is
    /// already resolved. `resolves` names the cell the action will resolve;
    /// a subscription that (transitively) waits on that cell is rejected.
    pub fn on_ready(
        &mut self,
        targets: Vec<Target>,
        resolves: Option<CellId>,
        action: A,
    ) -> Result<Option<Fired<A>>, Cycle> {
        let mut pending = Vec::new();
        for target in &targets {
            if let Target::Cell(cell) = target {
                let root = self.table.find(*cell);
                if self.table.probe_value(root).is_none() {
                    pending.push(root);
                }
            }
        }

        if let Some(own) = resolves {
            let own = self.table.find(own);
            for &cell in &pending {
                if cell == own || self.waits_on(cell, own) {
                    return Err(Cycle { cell: own });
                }
            }
        }

        if pending.is_empty() {
            let types = self.target_types(&targets);
            return Ok(Some(Fired { action, types }));
        }

        let id = self.subscriptions.len();
        self.subscriptions.push(Subscription {
            remaining: pending.len(),
            targets,
            resolves,
            action: Some(action),
        });
        for cell in pending {
            self.waiting.entry(cell).or_default().push(id);
        }
        Ok(None)
    }

    /// Resolve `cell` to `ty` and return the subscriptions this completed.
    ///
    /// Resolving an already resolved cell is a no-op.
    pub fn resolve(&mut self, cell: CellId, ty: TypeSpec) -> Vec<Fired<A>> {
        let root = self.table.find(cell);
        if self.table.probe_value(root).is_some() {
            return Vec::new();
        }
        if self
            .table
            .unify_var_value(root, Some(Resolved(ty)))
            .is_err()
        {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for id in self.waiting.remove(&root).unwrap_or_default() {
            let sub = &mut self.subscriptions[id];
            sub.remaining -= 1;
            if sub.remaining == 0 {
                if let Some(action) = sub.action.take() {
                    let targets = std::mem::take(&mut sub.targets);
                    let types = self.target_types(&targets);
                    fired.push(Fired { action, types });
                }
            }
        }
        fired
    }

    /// Number of subscriptions still waiting on some cell.
    pub fn pending_subscriptions(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| s.action.is_some())
            .count()
    }

    fn target_types(&mut self, targets: &[Target]) -> Vec<TypeSpec> {
        targets
            .iter()
            .map(|t| match t {
                Target::Ready(ty) => ty.clone(),
                Target::Cell(cell) => self.probe(*cell).unwrap_or(TypeSpec::Deferred),
            })
            .collect()
    }

    /// Whether resolving `cell` transitively depends on `on` being resolved.
    fn waits_on(&mut self, cell: CellId, on: CellId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![cell];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let mut deps = Vec::new();
            for sub in &self.subscriptions {
                if sub.action.is_none() {
                    continue;
                }
                let Some(resolves) = sub.resolves else { continue };
                if self.table.find(resolves) != current {
                    continue;
                }
                for target in &sub.targets {
                    if let Target::Cell(dep) = target {
                        deps.push(*dep);
                    }
                }
            }
            for dep in deps {
                let dep = self.table.find(dep);
                if self.table.probe_value(dep).is_some() {
                    continue;
                }
                if dep == on {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }
}
