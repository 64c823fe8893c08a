//! Shared reactor status.
//!
//! The only build-wide state workers read before starting a unit: whether
//! the build was halted, and which units are blacklisted because they or
//! something upstream of them failed.

use super::graph::UnitGraph;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Why a unit will not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Halted,
    Blacklisted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Halted => write!(f, "build halted after an earlier failure"),
            SkipReason::Blacklisted => write!(f, "an upstream unit failed"),
        }
    }
}

#[derive(Debug)]
pub struct ReactorStatus {
    units: Arc<UnitGraph>,
    halted: AtomicBool,
    blacklist: Mutex<BTreeSet<String>>,
}

impl ReactorStatus {
    pub fn new(units: Arc<UnitGraph>) -> Self {
        Self {
            units,
            halted: AtomicBool::new(false),
            blacklist: Mutex::new(BTreeSet::new()),
        }
    }

    /// Stop starting new units. Running units are not interrupted.
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            tracing::warn!("Build halted");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Blacklist `unit` and everything downstream of it.
    pub fn blacklist(&self, unit: &str) {
        let mut blacklist = self.blacklist.lock().unwrap_or_else(PoisonError::into_inner);
        blacklist.insert(unit.to_string());
        for downstream in self.units.transitive_downstream(unit) {
            if blacklist.insert(downstream.to_string()) {
                tracing::debug!(unit = %downstream, upstream = %unit, "Blacklisted unit");
            }
        }
    }

    pub fn is_blacklisted(&self, unit: &str) -> bool {
        self.blacklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(unit)
    }

    pub fn blacklisted(&self) -> Vec<String> {
        self.blacklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Why `unit` must be skipped, if it must.
    pub fn skip_reason(&self, unit: &str) -> Option<SkipReason> {
        if self.is_halted() {
            Some(SkipReason::Halted)
        } else if self.is_blacklisted(unit) {
            Some(SkipReason::Blacklisted)
        } else {
            None
        }
    }
}
