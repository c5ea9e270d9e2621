use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::shop::workstation::{StationId, DEF_SETUP};

/// One processing step of a job at a specific workstation. Immutable once
/// part of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub station: StationId,
    pub proc_time: f64,
    /// Setup family determining changeover cost on the machine.
    pub setup_family: String,
    /// Jobs sharing a batch family may be processed jointly.
    pub batch_family: Option<String>,
}

impl Operation {
    pub fn new(station: StationId, proc_time: f64) -> Self {
        Self {
            station,
            proc_time,
            setup_family: DEF_SETUP.to_string(),
            batch_family: None,
        }
    }

    pub fn with_setup_family(mut self, family: impl Into<String>) -> Self {
        self.setup_family = family.into();
        self
    }

    pub fn with_batch_family(mut self, family: impl Into<String>) -> Self {
        self.batch_family = Some(family.into());
        self
    }
}

/// The ordered operation sequence a job undergoes. Routes are immutable and
/// shared between jobs via [`Arc`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    ops: Vec<Operation>,
}

impl Route {
    pub fn new(ops: Vec<Operation>) -> Arc<Self> {
        Arc::new(Self { ops })
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn op(&self, i: usize) -> &Operation {
        &self.ops[i]
    }

    /// Sum of all processing times on this route.
    pub fn total_proc_time(&self) -> f64 {
        self.ops.iter().map(|o| o.proc_time).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_proc_time_sums_all_ops() {
        let route = Route::new(vec![
            Operation::new(0, 2.0),
            Operation::new(1, 3.5),
            Operation::new(0, 0.5),
        ]);
        assert_eq!(route.total_proc_time(), 6.0);
        assert_eq!(route.len(), 3);
    }

    #[test]
    fn builders_set_families() {
        let op = Operation::new(2, 1.0)
            .with_setup_family("A")
            .with_batch_family("F1");
        assert_eq!(op.setup_family, "A");
        assert_eq!(op.batch_family.as_deref(), Some("F1"));
    }
}
