//! Experiments: a single parameterized scenario run, and the trait the
//! multi-configuration driver composes.

pub mod multi;

use std::any::Any;
use std::sync::Arc;
use tracing::info;

use crate::core::error::SimError;
use crate::core::notify::ShopListener;
use crate::core::queue::SimTime;
use crate::core::results::ResultMap;
use crate::core::sim::Simulation;
use crate::shop::Shop;

pub use multi::{Configuration, ConfigurationValidator, MultiConfExperiment, KEY_EXPERIMENT};

/// Configures a cloned experiment procedurally, where a plain property
/// assignment is not expressive enough.
pub type ComplexFactorSetter =
    Arc<dyn Fn(&mut dyn Experiment) -> Result<(), SimError> + Send + Sync>;

/// A value assigned to an experiment property by the factor sweep.
#[derive(Clone)]
pub enum FactorValue {
    Num(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    /// Replacement clone template, only meaningful under the reserved
    /// [`KEY_EXPERIMENT`] key.
    Experiment(Box<dyn Experiment>),
    Setter(ComplexFactorSetter),
}

impl FactorValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            FactorValue::Num(v) => Some(*v),
            FactorValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FactorValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FactorValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactorValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FactorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactorValue::Num(v) => write!(f, "{v}"),
            FactorValue::Int(v) => write!(f, "{v}"),
            FactorValue::Bool(v) => write!(f, "{v}"),
            FactorValue::Str(v) => write!(f, "{v:?}"),
            FactorValue::Experiment(_) => f.write_str("<experiment>"),
            FactorValue::Setter(_) => f.write_str("<setter>"),
        }
    }
}

impl From<f64> for FactorValue {
    fn from(v: f64) -> Self {
        FactorValue::Num(v)
    }
}

impl From<i64> for FactorValue {
    fn from(v: i64) -> Self {
        FactorValue::Int(v)
    }
}

impl From<bool> for FactorValue {
    fn from(v: bool) -> Self {
        FactorValue::Bool(v)
    }
}

impl From<&str> for FactorValue {
    fn from(v: &str) -> Self {
        FactorValue::Str(v.to_string())
    }
}

/// One runnable, cloneable, property-settable scenario.
///
/// Deep-cloning is the replication mechanism: a clone shares nothing
/// mutable with its original, so replications can run on worker threads.
pub trait Experiment: Send {
    /// Executes the scenario and produces its result map. Failures abort
    /// this run; the multi-configuration driver traps them.
    fn run(&mut self) -> Result<ResultMap, SimError>;

    /// Assigns a factor value to a property path. Unknown paths fail with
    /// [`SimError::UnknownProperty`], wrong value kinds with
    /// [`SimError::TypeMismatch`].
    fn set_property(&mut self, path: &str, value: &FactorValue) -> Result<(), SimError>;

    fn clone_exp(&self) -> Box<dyn Experiment>;

    /// Downcast support for [`ComplexFactorSetter`]s.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn Experiment> {
    fn clone(&self) -> Self {
        self.clone_exp()
    }
}

/// Runs one job-shop scenario: clones the shop template into a fresh
/// [`Simulation`], seeds it, runs it, and collects the result map.
#[derive(Clone)]
pub struct ShopExperiment {
    pub shop: Shop,
    pub listeners: Vec<Box<dyn ShopListener>>,
    pub sim_length: Option<SimTime>,
    pub warm_up: Option<SimTime>,
    pub stop_after_jobs: Option<u64>,
    pub seed: u64,
}

impl ShopExperiment {
    pub fn new(shop: Shop) -> Self {
        Self {
            shop,
            listeners: Vec::new(),
            sim_length: None,
            warm_up: None,
            stop_after_jobs: None,
            seed: 0,
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn ShopListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_sim_length(mut self, length: SimTime) -> Self {
        self.sim_length = Some(length);
        self
    }

    pub fn with_warm_up(mut self, warm_up: SimTime) -> Self {
        self.warm_up = Some(warm_up);
        self
    }

    pub fn with_stop_after_jobs(mut self, count: u64) -> Self {
        self.stop_after_jobs = Some(count);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Experiment for ShopExperiment {
    fn run(&mut self) -> Result<ResultMap, SimError> {
        let mut sim = Simulation::new(self.shop.clone());
        if let Some(l) = self.sim_length {
            sim = sim.with_length(l);
        }
        if let Some(w) = self.warm_up {
            sim = sim.with_warm_up(w);
        }
        if let Some(n) = self.stop_after_jobs {
            sim = sim.with_stop_after_jobs(n);
        }
        sim.reseed(self.seed);
        for listener in &self.listeners {
            sim.add_listener(listener.clone())?;
        }

        sim.run()?;
        let mut rm = sim.produce_results()?;
        rm.set("abortCount", 0i64);

        info!(
            seed = self.seed,
            sim_time = sim.now(),
            finished = sim.shop.jobs_finished,
            "experiment done"
        );
        Ok(rm)
    }

    fn set_property(&mut self, path: &str, value: &FactorValue) -> Result<(), SimError> {
        match path {
            "seed" => {
                let v = value.as_i64().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "integer",
                })?;
                self.seed = v as u64;
            }
            "sim.length" => {
                self.sim_length = Some(numeric(path, value)?);
            }
            "sim.warmUp" => {
                self.warm_up = Some(numeric(path, value)?);
            }
            "sim.stopAfterJobs" => {
                let v = value.as_i64().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "integer",
                })?;
                self.stop_after_jobs = Some(v as u64);
            }
            "shop.lookAhead" => {
                self.shop.enable_look_ahead = value.as_bool().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "bool",
                })?;
            }
            "dueDateFactor" => {
                let v = numeric(path, value)?;
                for src in &mut self.shop.sources {
                    src.due_date_factor = v;
                }
            }
            _ => return Err(SimError::UnknownProperty(path.into())),
        }
        Ok(())
    }

    fn clone_exp(&self) -> Box<dyn Experiment> {
        Box::new(self.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn numeric(path: &str, value: &FactorValue) -> Result<f64, SimError> {
    value.as_num().ok_or(SimError::TypeMismatch {
        path: path.into(),
        expected: "number",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::DblConst;
    use crate::rules::Fcfs;
    use crate::shop::operation::{Operation, Route};
    use crate::shop::source::{ArrivalProcess, JobSource};
    use crate::shop::workstation::WorkStation;
    use crate::stats::FlowTimeCollector;

    fn fifo_experiment() -> ShopExperiment {
        let mut shop = Shop::new();
        let w1 = shop.add_station(WorkStation::new("W1", 1), Box::new(Fcfs));
        let route = Route::new(vec![Operation::new(w1, 2.0)]);
        shop.add_source(
            JobSource::new(
                ArrivalProcess::ReleaseDates(Box::new(DblConst::new([0.0, 1.0, 2.0]))),
                vec![route],
            )
            .with_max_jobs(3),
        );
        ShopExperiment::new(shop).with_listener(Box::new(FlowTimeCollector::new()))
    }

    #[test]
    fn run_produces_flow_statistics() {
        let mut exp = fifo_experiment();
        let rm = exp.run().unwrap();

        assert!((rm.num("flowMean").unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(rm.num("abortCount"), Some(0.0));
        assert_eq!(rm.num("jobsFinished"), Some(3.0));
    }

    #[test]
    fn template_is_reusable_across_runs() {
        let exp = fifo_experiment();
        let rm1 = exp.clone_exp().run().unwrap();
        let rm2 = exp.clone_exp().run().unwrap();
        assert_eq!(rm1, rm2);
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut exp = fifo_experiment();
        let err = exp
            .set_property("no.such.thing", &FactorValue::Num(1.0))
            .unwrap_err();
        assert!(matches!(err, SimError::UnknownProperty(_)));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut exp = fifo_experiment();
        let err = exp
            .set_property("sim.length", &FactorValue::Str("long".into()))
            .unwrap_err();
        assert!(matches!(err, SimError::TypeMismatch { .. }));
    }

    #[test]
    fn properties_reach_the_simulation() {
        let mut exp = fifo_experiment();
        exp.set_property("sim.length", &FactorValue::Num(3.0)).unwrap();
        let rm = exp.run().unwrap();
        assert_eq!(rm.num("simTime"), Some(3.0));
        assert_eq!(rm.num("jobsFinished"), Some(1.0));
    }
}
