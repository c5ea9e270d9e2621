//! Statistics collectors observing a run through the listener protocol,
//! plus the numeric summary type shared with the experiment driver.

use average::{Estimate, Max, Merge, Min, Variance};
use tracing::trace;

use crate::core::error::SimError;
use crate::core::notify::{NotifyCtx, ShopEvent, ShopListener};
use crate::core::results::ResultMap;
use crate::shop::job::JobKey;
use crate::shop::Shop;

/// Count / sum / mean / min / max / standard deviation of a sample set.
///
/// Merging two summaries is associative and commutative, so partial
/// summaries from parallel replications can be combined in any order.
#[derive(Debug, Clone)]
pub struct SummaryStat {
    var: Variance,
    min: Min,
    max: Max,
}

impl Default for SummaryStat {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryStat {
    pub fn new() -> Self {
        Self {
            var: Variance::new(),
            min: Min::new(),
            max: Max::new(),
        }
    }

    pub fn add(&mut self, v: f64) {
        self.var.add(v);
        self.min.add(v);
        self.max.add(v);
    }

    pub fn merge(&mut self, other: &SummaryStat) {
        self.var.merge(&other.var);
        self.min.merge(&other.min);
        self.max.merge(&other.max);
    }

    pub fn count(&self) -> u64 {
        self.var.len()
    }

    pub fn mean(&self) -> f64 {
        if self.count() == 0 {
            0.0
        } else {
            self.var.mean()
        }
    }

    pub fn sum(&self) -> f64 {
        self.mean() * self.count() as f64
    }

    pub fn std_dev(&self) -> f64 {
        if self.count() < 2 {
            0.0
        } else {
            self.var.sample_variance().sqrt()
        }
    }

    pub fn min(&self) -> f64 {
        if self.count() == 0 {
            0.0
        } else {
            self.min.min()
        }
    }

    pub fn max(&self) -> f64 {
        if self.count() == 0 {
            0.0
        } else {
            self.max.max()
        }
    }

    /// The summary as a nested result map.
    pub fn to_result_map(&self) -> ResultMap {
        let mut rm = ResultMap::new();
        rm.set("count", self.count() as i64);
        rm.set("sum", self.sum());
        rm.set("mean", self.mean());
        rm.set("min", self.min());
        rm.set("max", self.max());
        rm.set("stddev", self.std_dev());
        rm
    }
}

/// Collects flow time and tardiness over finished jobs.
///
/// A warm-up reset discards everything gathered so far; only jobs finishing
/// after the reset count.
#[derive(Debug, Clone, Default)]
pub struct FlowTimeCollector {
    flow: SummaryStat,
    tardiness: SummaryStat,
    num_tardy: u64,
}

impl FlowTimeCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShopListener for FlowTimeCollector {
    fn job_finished(&mut self, shop: &Shop, job: JobKey, _ctx: &mut NotifyCtx) {
        let j = shop.job(job);
        let flow = shop.sim_time - j.release_date;
        let tardy = (shop.sim_time - j.due_date).max(0.0);

        self.flow.add(flow);
        self.tardiness.add(tardy);
        if tardy > 0.0 {
            self.num_tardy += 1;
        }
    }

    fn stats_reset(&mut self, _shop: &Shop) {
        *self = Self::default();
    }

    fn produce_results(&mut self, _shop: &Shop, rm: &mut ResultMap) -> Result<(), SimError> {
        rm.put("flowMean", self.flow.mean())?;
        rm.put("flowtime", self.flow.to_result_map())?;
        rm.put("tardiness", self.tardiness.to_result_map())?;
        rm.put("numTardy", self.num_tardy as i64)?;
        Ok(())
    }

    fn clone_listener(&self) -> Box<dyn ShopListener> {
        Box::new(self.clone())
    }
}

/// Writes every notification to the `tracing` log. Purely observational.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceListener;

impl ShopListener for TraceListener {
    fn inform(&mut self, shop: &Shop, event: &ShopEvent, _ctx: &mut NotifyCtx) {
        trace!(t = shop.sim_time, event = ?event);
    }

    fn clone_listener(&self) -> Box<dyn ShopListener> {
        Box::new(*self)
    }
}
