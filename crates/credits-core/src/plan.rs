//! Plan catalog.
//!
//! Plans are owned by an external catalog; the ledger only reads
//! `{code -> credits_per_cycle, cycle_kind}`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::PlanCode;

// ============================================================================
// Constants
// ============================================================================

/// Code of the plan new accounts start on.
pub const DEFAULT_PLAN_CODE: &str = "free";

/// Credits granted once when a trial starts.
pub const TRIAL_PLAN_CREDITS: i64 = 1000;

/// Standard plan monthly credit allowance.
pub const STANDARD_PLAN_CREDITS: i64 = 2500;

/// Pro plan monthly credit allowance.
pub const PRO_PLAN_CREDITS: i64 = 6000;

/// How a plan's credit grant recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Calendar-month cycle, UTC.
    Monthly,

    /// A single grant for the lifetime of a trial window.
    FixedTrial,

    /// No recurring grant.
    None,
}

/// A plan as served by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan code.
    pub code: PlanCode,

    /// Credits granted at each cycle start.
    pub credits_per_cycle: i64,

    /// Cycle behaviour.
    pub cycle_kind: CycleKind,
}

impl Plan {
    /// Whether ledger sums for this plan are scoped to the current cycle.
    #[must_use]
    pub const fn is_cycle_bound(&self) -> bool {
        !matches!(self.cycle_kind, CycleKind::None)
    }
}

/// Read-only plan lookup.
pub trait PlanCatalog: Send + Sync {
    /// Look up a plan by code.
    fn plan(&self, code: &PlanCode) -> Option<Plan>;

    /// The plan assigned to newly initialised accounts.
    fn default_plan_code(&self) -> PlanCode;

    /// Look up a plan, failing with `LedgerError::UnknownPlan` if absent.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownPlan` if the code is not in the catalog.
    fn require(&self, code: &PlanCode) -> Result<Plan> {
        self.plan(code)
            .ok_or_else(|| LedgerError::UnknownPlan(code.to_string()))
    }
}

/// An in-memory catalog, built from a list of plans.
#[derive(Debug, Clone)]
pub struct StaticPlanCatalog {
    plans: HashMap<PlanCode, Plan>,
    default_plan: PlanCode,
}

/// On-disk catalog file structure.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    default_plan: PlanCode,
    plans: Vec<Plan>,
}

impl StaticPlanCatalog {
    /// Build a catalog.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownPlan` if `default_plan` is not among `plans`,
    /// or `LedgerError::InvalidAmount` if a plan grants a negative amount.
    pub fn new(plans: Vec<Plan>, default_plan: PlanCode) -> Result<Self> {
        if let Some(plan) = plans.iter().find(|p| p.credits_per_cycle < 0) {
            return Err(LedgerError::InvalidAmount(plan.credits_per_cycle));
        }
        let plans: HashMap<_, _> = plans.into_iter().map(|p| (p.code.clone(), p)).collect();
        if !plans.contains_key(&default_plan) {
            return Err(LedgerError::UnknownPlan(default_plan.to_string()));
        }
        Ok(Self {
            plans,
            default_plan,
        })
    }

    /// Load a catalog from a JSON file of the form
    /// `{"default_plan": "free", "plans": [{"code", "credits_per_cycle", "cycle_kind"}]}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LedgerError::Storage(format!("{}: {e}", path.as_ref().display())))?;
        let file: CatalogFile = serde_json::from_str(&contents)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Self::new(file.plans, file.default_plan)
    }

    /// Number of plans in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether the catalog is empty. Never true for a constructed catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for StaticPlanCatalog {
    fn default() -> Self {
        let plan = |code: &str, credits_per_cycle, cycle_kind| Plan {
            code: PlanCode::from_trusted(code.to_string()),
            credits_per_cycle,
            cycle_kind,
        };
        let plans = [
            plan(DEFAULT_PLAN_CODE, 0, CycleKind::None),
            plan("trial", TRIAL_PLAN_CREDITS, CycleKind::FixedTrial),
            plan("standard", STANDARD_PLAN_CREDITS, CycleKind::Monthly),
            plan("pro", PRO_PLAN_CREDITS, CycleKind::Monthly),
        ];
        Self {
            plans: plans.into_iter().map(|p| (p.code.clone(), p)).collect(),
            default_plan: PlanCode::from_trusted(DEFAULT_PLAN_CODE.to_string()),
        }
    }
}

impl PlanCatalog for StaticPlanCatalog {
    fn plan(&self, code: &PlanCode) -> Option<Plan> {
        self.plans.get(code).cloned()
    }

    fn default_plan_code(&self) -> PlanCode {
        self.default_plan.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn code(s: &str) -> PlanCode {
        PlanCode::new(s).unwrap()
    }

    #[test]
    fn default_catalog_plans() {
        let catalog = StaticPlanCatalog::default();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.default_plan_code(), code("free"));
        assert_eq!(catalog.plan(&code("free")).unwrap().cycle_kind, CycleKind::None);
        assert_eq!(
            catalog.plan(&code("standard")).unwrap().credits_per_cycle,
            STANDARD_PLAN_CREDITS
        );
        assert_eq!(
            catalog.plan(&code("trial")).unwrap().cycle_kind,
            CycleKind::FixedTrial
        );
    }

    #[test]
    fn require_unknown_plan_fails() {
        let catalog = StaticPlanCatalog::default();
        assert!(matches!(
            catalog.require(&code("platinum")),
            Err(LedgerError::UnknownPlan(p)) if p == "platinum"
        ));
    }

    #[test]
    fn default_plan_must_exist() {
        let result = StaticPlanCatalog::new(vec![], code("free"));
        assert!(matches!(result, Err(LedgerError::UnknownPlan(_))));
    }

    #[test]
    fn negative_credits_rejected() {
        let plans = vec![Plan {
            code: code("bad"),
            credits_per_cycle: -1,
            cycle_kind: CycleKind::Monthly,
        }];
        assert!(matches!(
            StaticPlanCatalog::new(plans, code("bad")),
            Err(LedgerError::InvalidAmount(-1))
        ));
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "default_plan": "starter",
                "plans": [
                    {{"code": "starter", "credits_per_cycle": 4000, "cycle_kind": "monthly"}},
                    {{"code": "promo", "credits_per_cycle": 500, "cycle_kind": "fixed_trial"}}
                ]
            }}"#
        )
        .unwrap();

        let catalog = StaticPlanCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.default_plan_code(), code("starter"));
        assert_eq!(catalog.require(&code("starter")).unwrap().credits_per_cycle, 4000);
        assert!(catalog.require(&code("promo")).unwrap().is_cycle_bound());
    }
}
