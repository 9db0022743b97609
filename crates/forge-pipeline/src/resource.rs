//! Model residency under a memory budget.
//!
//! Every heavy model has one slot with the lifecycle
//! `Unloaded -> Loading -> Resident -> Unloading -> Unloaded`. A job borrows a
//! model through [`ResourceManager::acquire`], which blocks until the model
//! is resident and nobody else is using it, and gives it back by dropping the
//! returned [`ModelLease`].
//!
//! The costs of loading, resident and unloading models never add up to more
//! than the budget. Making room evicts the least recently used idle models;
//! a model in use is never evicted. The two text-to-image models never share
//! memory: acquiring one evicts the other even when both would fit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ModelCosts;
use crate::error::{PipelineError, PipelineResult};
use crate::oracle::ModelLoader;

/// The heavy models the pipeline juggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Fast text-to-image model.
    TextFast,
    /// High quality text-to-image model.
    TextQuality,
    /// Image-to-mesh model.
    Reconstructor,
    /// Multi-view texture model.
    Texturer,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::TextFast,
        ModelKind::TextQuality,
        ModelKind::Reconstructor,
        ModelKind::Texturer,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// The model that may never be resident at the same time as this one.
    pub fn exclusive_with(self) -> Option<ModelKind> {
        match self {
            ModelKind::TextFast => Some(ModelKind::TextQuality),
            ModelKind::TextQuality => Some(ModelKind::TextFast),
            ModelKind::Reconstructor | ModelKind::Texturer => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::TextFast => "text-fast",
            ModelKind::TextQuality => "text-quality",
            ModelKind::Reconstructor => "reconstructor",
            ModelKind::Texturer => "texturer",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Residency {
    Unloaded,
    Loading,
    Resident,
    Unloading,
}

/// Snapshot of one model slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub kind: ModelKind,
    pub state: Residency,
    pub cost: u64,
    pub in_use: bool,
    /// Jobs queued for this model, including the one being served.
    pub waiting: usize,
    pub last_used_at: Option<DateTime<Utc>>,
}

struct Slot {
    state: Residency,
    in_use: bool,
    queue: VecDeque<u64>,
    last_used_at: Option<DateTime<Utc>>,
    /// Logical clock of the last release; orders eviction.
    last_tick: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Residency::Unloaded,
            in_use: false,
            queue: VecDeque::new(),
            last_used_at: None,
            last_tick: 0,
        }
    }
}

/// Shared state behind the manager's mutex.
struct Ledger {
    slots: [Slot; 4],
    /// Cost of every slot that is loading, resident or unloading.
    committed: u64,
    /// Cost set aside for loads waiting on their evictions.
    reserved: u64,
    next_ticket: u64,
    tick: u64,
}

impl Ledger {
    fn slot(&self, kind: ModelKind) -> &Slot {
        &self.slots[kind.index()]
    }

    fn slot_mut(&mut self, kind: ModelKind) -> &mut Slot {
        &mut self.slots[kind.index()]
    }

    fn enqueue(&mut self, kind: ModelKind) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.slot_mut(kind).queue.push_back(ticket);
        ticket
    }

    fn leave_queue(&mut self, kind: ModelKind, ticket: u64) {
        self.slot_mut(kind).queue.retain(|&t| t != ticket);
    }

    fn touch(&mut self, kind: ModelKind) {
        self.tick += 1;
        let tick = self.tick;
        let slot = self.slot_mut(kind);
        slot.last_tick = tick;
        slot.last_used_at = Some(Utc::now());
    }
}

enum Plan {
    /// Resident and free: take it.
    Ready,
    /// Evict these idle models, then load.
    Load { victims: Vec<ModelKind> },
    /// Something has to be released or finish transitioning first.
    Wait,
}

/// Owns model residency for the whole service.
pub struct ResourceManager {
    budget: u64,
    costs: ModelCosts,
    loader: Arc<dyn ModelLoader>,
    acquire_timeout: Option<Duration>,
    ledger: Mutex<Ledger>,
    changed: Condvar,
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("budget", &self.budget)
            .field("costs", &self.costs)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl ResourceManager {
    pub fn new(budget: u64, costs: ModelCosts, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            budget,
            costs,
            loader,
            acquire_timeout: None,
            ledger: Mutex::new(Ledger {
                slots: [Slot::new(), Slot::new(), Slot::new(), Slot::new()],
                committed: 0,
                reserved: 0,
                next_ticket: 0,
                tick: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Give up on a busy model after `timeout` instead of waiting forever.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn cost(&self, kind: ModelKind) -> u64 {
        self.costs.cost(kind)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Memory held by loading, resident and unloading models.
    pub fn residency_cost(&self) -> u64 {
        self.lock().committed
    }

    pub fn state(&self, kind: ModelKind) -> Residency {
        self.lock().slot(kind).state
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        let ledger = self.lock();
        ModelKind::ALL
            .iter()
            .map(|&kind| {
                let slot = ledger.slot(kind);
                ModelStatus {
                    kind,
                    state: slot.state,
                    cost: self.costs.cost(kind),
                    in_use: slot.in_use,
                    waiting: slot.queue.len(),
                    last_used_at: slot.last_used_at,
                }
            })
            .collect()
    }

    /// Borrow a model exclusively, loading it if needed.
    ///
    /// Requests for the same model are served in arrival order. The caller
    /// must not hold another lease whose eviction this load could need.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::BudgetExceeded`] if the model alone exceeds the budget
    /// - [`PipelineError::LoadFailed`] if the loader fails; the slot is left unloaded
    /// - [`PipelineError::AcquireTimeout`] if a timeout is configured and expires
    pub fn acquire(&self, kind: ModelKind) -> PipelineResult<ModelLease<'_>> {
        let cost = self.costs.cost(kind);
        if cost > self.budget {
            return Err(PipelineError::BudgetExceeded {
                kind,
                cost,
                budget: self.budget,
            });
        }

        let deadline = self.acquire_timeout.map(|timeout| Instant::now() + timeout);
        let mut ledger = self.lock();
        let ticket = ledger.enqueue(kind);

        loop {
            match self.plan(&ledger, kind, ticket) {
                Plan::Ready => {
                    ledger.slot_mut(kind).in_use = true;
                    ledger.leave_queue(kind, ticket);
                    ledger.touch(kind);
                    debug!(%kind, "Model already resident");
                    return Ok(ModelLease {
                        manager: self,
                        kind,
                    });
                }
                Plan::Load { victims } => {
                    return self.load(ledger, kind, ticket, victims);
                }
                Plan::Wait => {
                    ledger = match deadline {
                        None => self.changed.wait(ledger).unwrap_or_else(PoisonError::into_inner),
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                ledger.leave_queue(kind, ticket);
                                drop(ledger);
                                self.changed.notify_all();
                                let waited_ms = self
                                    .acquire_timeout
                                    .map_or(0, |timeout| timeout.as_millis() as u64);
                                warn!(%kind, waited_ms, "Timed out waiting for model");
                                return Err(PipelineError::AcquireTimeout { kind, waited_ms });
                            }
                            self.changed
                                .wait_timeout(ledger, deadline - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0
                        }
                    };
                }
            }
        }
    }

    fn plan(&self, ledger: &Ledger, kind: ModelKind, ticket: u64) -> Plan {
        let slot = ledger.slot(kind);
        if slot.queue.front() != Some(&ticket) || slot.in_use {
            return Plan::Wait;
        }
        match slot.state {
            Residency::Resident => return Plan::Ready,
            Residency::Loading | Residency::Unloading => return Plan::Wait,
            Residency::Unloaded => {}
        }

        let mut victims = Vec::new();
        let mut freed = 0;
        if let Some(partner) = kind.exclusive_with() {
            let other = ledger.slot(partner);
            match other.state {
                Residency::Unloaded => {}
                Residency::Resident if !other.in_use => {
                    victims.push(partner);
                    freed += self.costs.cost(partner);
                }
                _ => return Plan::Wait,
            }
        }

        let cost = self.costs.cost(kind);
        let fits = |freed: u64| ledger.committed + ledger.reserved - freed + cost <= self.budget;

        if !fits(freed) {
            let mut idle: Vec<ModelKind> = ModelKind::ALL
                .iter()
                .copied()
                .filter(|&k| k != kind && !victims.contains(&k))
                .filter(|&k| {
                    let s = ledger.slot(k);
                    s.state == Residency::Resident && !s.in_use
                })
                .collect();
            idle.sort_by_key(|&k| ledger.slot(k).last_tick);

            for candidate in idle {
                victims.push(candidate);
                freed += self.costs.cost(candidate);
                if fits(freed) {
                    break;
                }
            }
            if !fits(freed) {
                return Plan::Wait;
            }
        }
        Plan::Load { victims }
    }

    fn load<'a>(
        &'a self,
        mut ledger: MutexGuard<'a, Ledger>,
        kind: ModelKind,
        ticket: u64,
        victims: Vec<ModelKind>,
    ) -> PipelineResult<ModelLease<'a>> {
        let cost = self.costs.cost(kind);
        for &victim in &victims {
            ledger.slot_mut(victim).state = Residency::Unloading;
        }
        ledger.reserved += cost;
        let slot = ledger.slot_mut(kind);
        slot.in_use = true;
        slot.state = Residency::Loading;
        drop(ledger);

        for &victim in &victims {
            info!(%victim, for_model = %kind, "Evicting model");
            self.loader.unload(victim);
        }

        let mut ledger = self.lock();
        for &victim in &victims {
            ledger.slot_mut(victim).state = Residency::Unloaded;
            ledger.committed -= self.costs.cost(victim);
        }
        ledger.reserved -= cost;
        ledger.committed += cost;
        debug_assert!(ledger.committed <= self.budget);
        drop(ledger);
        if !victims.is_empty() {
            self.changed.notify_all();
        }

        info!(%kind, cost, "Loading model");
        let loaded = self.loader.load(kind);

        let mut ledger = self.lock();
        ledger.leave_queue(kind, ticket);
        let result = match loaded {
            Ok(()) => {
                ledger.slot_mut(kind).state = Residency::Resident;
                ledger.touch(kind);
                Ok(ModelLease {
                    manager: self,
                    kind,
                })
            }
            Err(err) => {
                let slot = ledger.slot_mut(kind);
                slot.state = Residency::Unloaded;
                slot.in_use = false;
                ledger.committed -= cost;
                warn!(%kind, error = %err, "Model failed to load");
                Err(PipelineError::LoadFailed {
                    kind,
                    details: err.message,
                })
            }
        };
        drop(ledger);
        self.changed.notify_all();
        result
    }

    fn release(&self, kind: ModelKind) {
        let mut ledger = self.lock();
        ledger.slot_mut(kind).in_use = false;
        ledger.touch(kind);
        drop(ledger);
        self.changed.notify_all();
        debug!(%kind, "Model released");
    }

    /// Unload every resident model nobody is using. Returns how many were unloaded.
    pub fn evict_idle(&self) -> usize {
        let mut ledger = self.lock();
        let idle: Vec<ModelKind> = ModelKind::ALL
            .iter()
            .copied()
            .filter(|&k| {
                let s = ledger.slot(k);
                s.state == Residency::Resident && !s.in_use
            })
            .collect();
        for &kind in &idle {
            ledger.slot_mut(kind).state = Residency::Unloading;
        }
        drop(ledger);

        for &kind in &idle {
            self.loader.unload(kind);
        }

        let mut ledger = self.lock();
        for &kind in &idle {
            ledger.slot_mut(kind).state = Residency::Unloaded;
            ledger.committed -= self.costs.cost(kind);
        }
        drop(ledger);
        self.changed.notify_all();
        if !idle.is_empty() {
            info!(count = idle.len(), "Evicted idle models");
        }
        idle.len()
    }
}

/// Exclusive use of a resident model; released on drop.
#[derive(Debug)]
pub struct ModelLease<'a> {
    manager: &'a ResourceManager,
    kind: ModelKind,
}

impl ModelLease<'_> {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }
}

impl Drop for ModelLease<'_> {
    fn drop(&mut self) {
        self.manager.release(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use hashbrown::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Loader that records calls and checks the budget from its own view.
    #[derive(Default)]
    struct RecordingLoader {
        events: Mutex<Vec<String>>,
        loaded: Mutex<HashSet<ModelKind>>,
        failing: Mutex<HashSet<ModelKind>>,
        check: Option<(ModelCosts, u64)>,
    }

    impl RecordingLoader {
        fn checking(costs: ModelCosts, budget: u64) -> Self {
            Self {
                check: Some((costs, budget)),
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn fail(&self, kind: ModelKind, fail: bool) {
            let mut failing = self.failing.lock().unwrap();
            if fail {
                failing.insert(kind);
            } else {
                failing.remove(&kind);
            }
        }
    }

    impl ModelLoader for RecordingLoader {
        fn load(&self, kind: ModelKind) -> Result<(), OracleError> {
            self.events.lock().unwrap().push(format!("load {kind}"));
            if self.failing.lock().unwrap().contains(&kind) {
                return Err(OracleError::new("loader", "weights missing"));
            }
            let mut loaded = self.loaded.lock().unwrap();
            loaded.insert(kind);
            if let Some((costs, budget)) = self.check {
                let total: u64 = loaded.iter().map(|&k| costs.cost(k)).sum();
                assert!(total <= budget, "{total} bytes loaded, budget {budget}");
            }
            Ok(())
        }

        fn unload(&self, kind: ModelKind) {
            self.events.lock().unwrap().push(format!("unload {kind}"));
            self.loaded.lock().unwrap().remove(&kind);
        }
    }

    fn manager(budget: u64, costs: ModelCosts) -> (ResourceManager, Arc<RecordingLoader>) {
        let loader = Arc::new(RecordingLoader::checking(costs, budget));
        (ResourceManager::new(budget, costs, loader.clone()), loader)
    }

    #[test]
    fn test_resident_model_is_reused() {
        let (manager, loader) = manager(10, ModelCosts::uniform(4));
        drop(manager.acquire(ModelKind::Reconstructor).unwrap());
        let lease = manager.acquire(ModelKind::Reconstructor).unwrap();
        assert_eq!(lease.kind(), ModelKind::Reconstructor);
        drop(lease);

        assert_eq!(loader.events(), vec!["load reconstructor"]);
        assert_eq!(manager.state(ModelKind::Reconstructor), Residency::Resident);
        assert_eq!(manager.residency_cost(), 4);
    }

    #[test]
    fn test_cost_over_budget_never_loads() {
        let costs = ModelCosts {
            text_quality: 11,
            ..ModelCosts::uniform(4)
        };
        let (manager, loader) = manager(10, costs);
        let err = manager.acquire(ModelKind::TextQuality).unwrap_err();
        assert!(matches!(err, PipelineError::BudgetExceeded { cost: 11, .. }));
        assert!(err.is_resource_exhaustion());
        assert!(loader.events().is_empty());
        assert_eq!(manager.state(ModelKind::TextQuality), Residency::Unloaded);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let (manager, loader) = manager(10, ModelCosts::uniform(4));
        drop(manager.acquire(ModelKind::TextFast).unwrap());
        drop(manager.acquire(ModelKind::Reconstructor).unwrap());
        drop(manager.acquire(ModelKind::Texturer).unwrap());

        assert_eq!(manager.state(ModelKind::TextFast), Residency::Unloaded);
        assert_eq!(manager.state(ModelKind::Reconstructor), Residency::Resident);
        assert_eq!(manager.state(ModelKind::Texturer), Residency::Resident);
        assert_eq!(manager.residency_cost(), 8);
        assert_eq!(
            loader.events(),
            vec![
                "load text-fast",
                "load reconstructor",
                "unload text-fast",
                "load texturer"
            ]
        );
    }

    #[test]
    fn test_model_in_use_is_never_evicted() {
        let (manager, _loader) = manager(8, ModelCosts::uniform(4));
        let text = manager.acquire(ModelKind::TextFast).unwrap();
        drop(manager.acquire(ModelKind::Reconstructor).unwrap());
        drop(manager.acquire(ModelKind::Texturer).unwrap());

        assert_eq!(manager.state(ModelKind::TextFast), Residency::Resident);
        assert_eq!(manager.state(ModelKind::Reconstructor), Residency::Unloaded);
        assert_eq!(manager.state(ModelKind::Texturer), Residency::Resident);
        drop(text);
    }

    #[test]
    fn test_text_models_are_mutually_exclusive() {
        let (manager, loader) = manager(100, ModelCosts::uniform(4));
        drop(manager.acquire(ModelKind::TextFast).unwrap());
        drop(manager.acquire(ModelKind::Reconstructor).unwrap());
        drop(manager.acquire(ModelKind::TextQuality).unwrap());

        assert_eq!(manager.state(ModelKind::TextFast), Residency::Unloaded);
        assert_eq!(manager.state(ModelKind::TextQuality), Residency::Resident);
        assert_eq!(manager.state(ModelKind::Reconstructor), Residency::Resident);
        assert!(loader.events().contains(&"unload text-fast".to_string()));
    }

    #[test]
    fn test_load_failure_leaves_slot_unloaded() {
        let (manager, loader) = manager(10, ModelCosts::uniform(4));
        loader.fail(ModelKind::Texturer, true);
        let err = manager.acquire(ModelKind::Texturer).unwrap_err();
        match err {
            PipelineError::LoadFailed { kind, details } => {
                assert_eq!(kind, ModelKind::Texturer);
                assert_eq!(details, "weights missing");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(manager.state(ModelKind::Texturer), Residency::Unloaded);
        assert_eq!(manager.residency_cost(), 0);

        loader.fail(ModelKind::Texturer, false);
        assert!(manager.acquire(ModelKind::Texturer).is_ok());
    }

    #[test]
    fn test_busy_model_blocks_until_released() {
        let (manager, _loader) = manager(10, ModelCosts::uniform(4));
        let done = AtomicBool::new(false);
        thread::scope(|s| {
            let lease = manager.acquire(ModelKind::Reconstructor).unwrap();
            let waiter = s.spawn(|| {
                let second = manager.acquire(ModelKind::Reconstructor).unwrap();
                done.store(true, Ordering::SeqCst);
                drop(second);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));
            assert_eq!(manager.status()[2].waiting, 1);
            drop(lease);
            waiter.join().unwrap();
        });
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_acquire_timeout() {
        let loader = Arc::new(RecordingLoader::default());
        let manager = ResourceManager::new(10, ModelCosts::uniform(4), loader)
            .with_acquire_timeout(Some(Duration::from_millis(30)));
        thread::scope(|s| {
            let _lease = manager.acquire(ModelKind::TextFast).unwrap();
            let result = s
                .spawn(|| manager.acquire(ModelKind::TextFast).map(|l| l.kind()))
                .join()
                .unwrap();
            assert!(matches!(
                result,
                Err(PipelineError::AcquireTimeout { waited_ms: 30, .. })
            ));
        });
        assert_eq!(manager.status()[0].waiting, 0);
    }

    #[test]
    fn test_evict_idle() {
        let (manager, _loader) = manager(20, ModelCosts::uniform(4));
        let held = manager.acquire(ModelKind::Reconstructor).unwrap();
        drop(manager.acquire(ModelKind::Texturer).unwrap());
        assert_eq!(manager.evict_idle(), 1);
        assert_eq!(manager.residency_cost(), 4);
        drop(held);
    }

    #[test]
    fn test_budget_holds_under_contention() {
        let costs = ModelCosts {
            text_fast: 4,
            text_quality: 6,
            reconstructor: 5,
            texturer: 3,
        };
        let (manager, loader) = manager(10, costs);
        thread::scope(|s| {
            for worker in 0..4usize {
                let manager = &manager;
                s.spawn(move || {
                    for round in 0..40usize {
                        let kind = ModelKind::ALL[(worker * 7 + round * 3) % 4];
                        let lease = manager.acquire(kind).unwrap();
                        assert!(manager.residency_cost() <= 10);
                        if round % 5 == 0 {
                            thread::yield_now();
                        }
                        drop(lease);
                    }
                });
            }
        });
        assert!(manager.residency_cost() <= 10);
        assert!(!loader.events().is_empty());
    }
}
