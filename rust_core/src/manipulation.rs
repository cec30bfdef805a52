//! Price-manipulation heuristics.
//!
//! A large price jump on thin sales volume marks an item as suspected;
//! the flag clears only after several consecutive clean cycles so a
//! single quiet cycle cannot reset a pump in progress.

use crate::currency::Money;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
pub struct ManipulationConfig {
    /// Fractional price increase over the previous cycle that counts as a
    /// jump (0.5 = +50%).
    pub price_jump_fraction: f64,
    /// 24h sales below this fraction of the trailing daily average count
    /// as thin volume.
    pub thin_volume_fraction: f64,
    /// Consecutive non-triggering cycles required before the flag clears.
    pub recovery_cycles: u32,
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        Self {
            price_jump_fraction: 0.5,
            thin_volume_fraction: 0.25,
            recovery_cycles: 3,
        }
    }
}

/// Per-cycle observations the detector judges an item on.
#[derive(Clone, Copy, Debug)]
pub struct CycleSignals {
    /// Best price after the previous cycle. Zero when this is the first
    /// cycle for the item.
    pub previous_price: Money,
    pub new_price: Money,
    /// Sales counted in the trailing 24h window.
    pub sales_last_24h: u64,
    /// Sales counted in the trailing 7-day window.
    pub sales_last_week: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct ItemState {
    suspected: bool,
    clean_cycles: u32,
}

/// Stateful detector; one instance shared across the engine. State is
/// in-memory only and rebuilt from scratch on restart, erring on the
/// side of Normal.
pub struct ManipulationDetector {
    config: ManipulationConfig,
    states: Mutex<HashMap<Uuid, ItemState>>,
}

impl ManipulationDetector {
    pub fn new(config: ManipulationConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn triggered(&self, signals: &CycleSignals) -> bool {
        if signals.previous_price.minor() <= 0 {
            return false;
        }
        let jump_floor = signals.previous_price.minor() as f64
            * (1.0 + self.config.price_jump_fraction);
        if (signals.new_price.minor() as f64) <= jump_floor {
            return false;
        }
        let daily_avg = signals.sales_last_week as f64 / 7.0;
        (signals.sales_last_24h as f64) < daily_avg * self.config.thin_volume_fraction
    }

    /// Judge one cycle for one item and return the flag to store on its
    /// snapshot.
    pub fn evaluate(&self, item_id: Uuid, signals: CycleSignals) -> bool {
        let triggered = self.triggered(&signals);
        let mut states = self.states.lock();
        let state = states.entry(item_id).or_default();

        if triggered {
            if !state.suspected {
                warn!(
                    %item_id,
                    previous = signals.previous_price.minor(),
                    new = signals.new_price.minor(),
                    sales_24h = signals.sales_last_24h,
                    "Price jump on thin volume, flagging item as manipulated"
                );
            }
            state.suspected = true;
            state.clean_cycles = 0;
            return true;
        }

        if state.suspected {
            state.clean_cycles += 1;
            if state.clean_cycles >= self.config.recovery_cycles {
                info!(%item_id, "Manipulation flag cleared after clean cycles");
                state.suspected = false;
                state.clean_cycles = 0;
                return false;
            }
            return true;
        }

        false
    }

    /// Number of items currently flagged.
    pub fn suspected_count(&self) -> usize {
        self.states.lock().values().filter(|s| s.suspected).count()
    }
}

impl Default for ManipulationDetector {
    fn default() -> Self {
        Self::new(ManipulationConfig::default())
    }
}
