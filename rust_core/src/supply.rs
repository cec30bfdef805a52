//! Total-supply estimation from partial ownership signals.
//!
//! No single feed sees every unit in existence. Known (counted) figures
//! are trusted over estimates per component, and an estimate only adds
//! the portion the known figure has not already covered.

use crate::types::SupplyTotals;

/// Raw inputs for one estimation pass. Any subset may be present.
#[derive(Clone, Copy, Debug, Default)]
pub struct SupplyInputs {
    /// Modelled holdings of ordinary owners (e.g. lifetime subscriptions).
    pub owners_estimated: Option<u64>,
    /// Counted holdings of ordinary owners.
    pub owners_known: Option<u64>,
    /// Modelled holdings of large holders.
    pub investors_estimated: Option<u64>,
    /// Counted holdings of large holders.
    pub investors_known: Option<u64>,
    /// Units currently listed across marketplaces. Always a count.
    pub markets_known: Option<u64>,
}

/// Known units plus whatever the estimate says exists beyond them.
/// `max(known, estimated)` expressed additively, so a stale estimate
/// below the counted figure contributes nothing.
fn component_total(known: Option<u64>, estimated: Option<u64>) -> u64 {
    let known = known.unwrap_or(0);
    let estimated = estimated.unwrap_or(0);
    known + estimated.saturating_sub(known)
}

/// Recompute the stored totals from fresh inputs. Missing inputs are
/// treated as zero; the result is deterministic in the inputs alone.
pub fn estimate_supply(inputs: SupplyInputs) -> SupplyTotals {
    let total_estimated = component_total(inputs.owners_known, inputs.owners_estimated)
        + component_total(inputs.investors_known, inputs.investors_estimated)
        + inputs.markets_known.unwrap_or(0);

    SupplyTotals {
        owners_estimated: inputs.owners_estimated,
        owners_known: inputs.owners_known,
        investors_estimated: inputs.investors_estimated,
        investors_known: inputs.investors_known,
        markets_known: inputs.markets_known,
        total_estimated,
    }
}
