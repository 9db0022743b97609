//! Property-based tests for the model resource manager.
//!
//! Run with: cargo test -p forge-pipeline -- proptest

use std::sync::{Arc, Mutex};
use std::time::Duration;

use forge_pipeline::{
    ModelCosts, ModelKind, ModelLease, ModelLoader, OracleError, PipelineError, Residency,
    ResourceManager,
};
use hashbrown::HashSet;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Acquire(ModelKind),
    /// Drop the lease at this position, modulo the number held.
    Release(usize),
    EvictIdle,
}

fn arb_kind() -> impl Strategy<Value = ModelKind> {
    prop::sample::select(ModelKind::ALL.to_vec())
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_kind().prop_map(Op::Acquire),
        2 => any::<usize>().prop_map(Op::Release),
        1 => Just(Op::EvictIdle),
    ]
}

fn arb_costs() -> impl Strategy<Value = ModelCosts> {
    (1..=10u64, 1..=10u64, 1..=10u64, 1..=10u64).prop_map(
        |(text_fast, text_quality, reconstructor, texturer)| ModelCosts {
            text_fast,
            text_quality,
            reconstructor,
            texturer,
        },
    )
}

/// Sums what is loaded from the loader's side of the seam.
struct LedgerLoader {
    costs: ModelCosts,
    loaded: Mutex<HashSet<ModelKind>>,
}

impl LedgerLoader {
    fn loaded_cost(&self) -> u64 {
        let loaded = self.loaded.lock().unwrap();
        loaded.iter().map(|&kind| self.costs.cost(kind)).sum()
    }
}

impl ModelLoader for LedgerLoader {
    fn load(&self, kind: ModelKind) -> Result<(), OracleError> {
        self.loaded.lock().unwrap().insert(kind);
        Ok(())
    }

    fn unload(&self, kind: ModelKind) {
        self.loaded.lock().unwrap().remove(&kind);
    }
}

// =============================================================================
// Budget
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_budget_holds_for_any_sequence(
        budget in 1..=20u64,
        costs in arb_costs(),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let loader = Arc::new(LedgerLoader {
            costs,
            loaded: Mutex::new(HashSet::new()),
        });
        let manager = ResourceManager::new(budget, costs, loader.clone())
            .with_acquire_timeout(Some(Duration::from_millis(1)));
        let mut leases: Vec<ModelLease<'_>> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire(kind) => match manager.acquire(kind) {
                    Ok(lease) => {
                        prop_assert!(costs.cost(kind) <= budget);
                        prop_assert!(leases.iter().all(|held| held.kind() != kind));
                        leases.push(lease);
                    }
                    Err(PipelineError::BudgetExceeded { .. }) => {
                        prop_assert!(costs.cost(kind) > budget);
                    }
                    Err(PipelineError::AcquireTimeout { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                },
                Op::Release(index) => {
                    if !leases.is_empty() {
                        let index = index % leases.len();
                        drop(leases.swap_remove(index));
                    }
                }
                Op::EvictIdle => {
                    manager.evict_idle();
                }
            }

            prop_assert!(manager.residency_cost() <= budget);
            prop_assert!(loader.loaded_cost() <= budget);
            for held in &leases {
                prop_assert_eq!(manager.state(held.kind()), Residency::Resident);
            }
            let text_models = [ModelKind::TextFast, ModelKind::TextQuality]
                .iter()
                .filter(|&&kind| manager.state(kind) != Residency::Unloaded)
                .count();
            prop_assert!(text_models <= 1);
        }

        drop(leases);
        manager.evict_idle();
        prop_assert_eq!(manager.residency_cost(), 0);
        prop_assert_eq!(loader.loaded_cost(), 0);
    }
}
