//! Discrete-event simulator for manufacturing job-shops.
//!
//! Jobs flow along per-job routes through workstations with parallel
//! machines, competing for capacity under pluggable priority rules, with
//! sequence-dependent setups, batching, machine breakdowns, and look-ahead.
//! Listeners observe the run through a notification bus and accumulate the
//! performance measures; the experiment layer clones scenario templates,
//! sweeps factors, and aggregates results across replications.

pub mod core;
pub mod experiment;
pub mod random;
pub mod rules;
pub mod shop;
pub mod stats;

pub use crate::core::{
    EventQueue, NotifierAdapter, NotifyCtx, ResultMap, ResultValue, ShopEvent, ShopListener,
    SimError, SimEvent, SimState, SimTime, Simulation,
};
pub use experiment::{
    Configuration, Experiment, FactorValue, MultiConfExperiment, ShopExperiment, KEY_EXPERIMENT,
};
pub use random::{DblConst, DblExp, DblStream, DblUniform};
pub use rules::{PriorityRule, RuleCtx};
pub use shop::batch::PrioRuleTarget;
pub use shop::job::{Job, JobKey};
pub use shop::operation::{Operation, Route};
pub use shop::source::{ArrivalProcess, JobSource};
pub use shop::workstation::{
    DowntimePolicy, IndividualMachine, MachineState, SetupMatrix, StationId, WorkStation,
};
pub use shop::Shop;
pub use stats::{FlowTimeCollector, SummaryStat, TraceListener};
