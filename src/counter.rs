use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Process-wide concurrent mapping from `(node_name, quota_label)` to a
/// non-negative outstanding-execution count.
///
/// Empty `quota` is treated as a no-op on both `plus` and `minus`. Lazily
/// constructed, idempotent on first access — subsequent calls to `global()`
/// return the same instance.
#[derive(Default)]
pub struct Counter {
    inner: RwLock<HashMap<String, HashMap<String, u64>>>,
}

static GLOBAL: OnceLock<Counter> = OnceLock::new();

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-global singleton.
    pub fn global() -> &'static Counter {
        GLOBAL.get_or_init(Counter::new)
    }

    pub fn plus(&self, node_name: &str, quota: &str) {
        if quota.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let quotas = inner.entry(node_name.to_string()).or_default();
        *quotas.entry(quota.to_string()).or_insert(0) += 1;
    }

    /// Saturating at zero: never leaves `get(node, quota) < 0`.
    pub fn minus(&self, node_name: &str, quota: &str) {
        if quota.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(quotas) = inner.get_mut(node_name) {
            if let Some(count) = quotas.get_mut(quota) {
                if *count > 0 {
                    *count -= 1;
                }
            }
        }
    }

    pub fn get(&self, node_name: &str, quota: &str) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(node_name)
            .and_then(|quotas| quotas.get(quota))
            .copied()
            .unwrap_or(0)
    }
}
