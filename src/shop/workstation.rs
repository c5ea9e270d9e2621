use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::core::queue::{EventId, SimTime};
use crate::random::DblStream;
use crate::shop::batch::PrioRuleTarget;
use crate::shop::job::{Job, JobKey};

/// Index of a workstation in the shop's station table.
pub type StationId = usize;

/// Setup state of a machine that has not processed anything yet.
pub const DEF_SETUP: &str = "DEF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Not yet taken into service.
    Inactive,
    Idle,
    Processing,
    Down,
}

/// What happens to in-progress work when a machine breaks down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DowntimePolicy {
    /// Remaining processing time is preserved and resumed on repair.
    #[default]
    PreserveRemaining,
    /// The operation is abandoned; its jobs re-enter the queue and will be
    /// processed from scratch.
    Discard,
}

/// Failure/repair process of a workstation's machines.
#[derive(Clone)]
pub struct Downtime {
    pub time_between_failures: Box<dyn DblStream>,
    pub time_to_repair: Box<dyn DblStream>,
}

impl std::fmt::Debug for Downtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Downtime")
    }
}

/// Sequence-dependent setup-time matrix: (from family, to family) → time.
///
/// Same-family transitions cost nothing unless explicitly set; unknown
/// pairs fall back to the default time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupMatrix {
    transitions: FxHashMap<(String, String), f64>,
    default_time: f64,
}

impl SetupMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, time: f64) -> Self {
        self.default_time = time;
        self
    }

    pub fn set(&mut self, from: impl Into<String>, to: impl Into<String>, time: f64) {
        self.transitions.insert((from.into(), to.into()), time);
    }

    pub fn with_transition(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        time: f64,
    ) -> Self {
        self.set(from, to, time);
        self
    }

    pub fn get(&self, from: &str, to: &str) -> f64 {
        if let Some(&t) = self.transitions.get(&(from.to_string(), to.to_string())) {
            return t;
        }
        if from == to {
            0.0
        } else {
            self.default_time
        }
    }
}

/// A single processing unit inside a workstation.
#[derive(Debug, Clone)]
pub struct IndividualMachine {
    pub idx: usize,
    pub state: MachineState,
    pub setup_state: String,
    /// Work in progress while `state == Processing`.
    pub current: Option<PrioRuleTarget>,
    pub proc_started: SimTime,
    /// Completion instant of the current operation while busy.
    pub proc_finished: SimTime,
    /// Handle of the pending departure event, for cancellation on breakdown.
    pub departure: Option<EventId>,
    /// Remaining processing time preserved across a breakdown.
    pub paused_remaining: Option<f64>,
}

impl IndividualMachine {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            state: MachineState::Inactive,
            setup_state: DEF_SETUP.to_string(),
            current: None,
            proc_started: 0.0,
            proc_finished: 0.0,
            departure: None,
            paused_remaining: None,
        }
    }
}

/// A look-ahead announcement: `job` (a future clone) will arrive at this
/// workstation when its predecessor operation finishes.
#[derive(Debug, Clone)]
pub struct FutureArrival {
    pub job: Job,
    pub time: SimTime,
}

/// A processing resource with one or more parallel machines and a shared
/// input queue.
///
/// The queue is unordered; the workstation's priority rule re-evaluates it
/// on every selection.
#[derive(Debug, Clone)]
pub struct WorkStation {
    pub id: StationId,
    pub name: String,
    pub machines: Vec<IndividualMachine>,
    pub queue: Vec<JobKey>,
    pub setup_matrix: SetupMatrix,
    /// Jobs of one batch family grouped per selection, 1 = no batching.
    pub max_batch_size: usize,
    pub futures: Vec<FutureArrival>,
    pub downtime_policy: DowntimePolicy,
    pub downtime: Option<Downtime>,
    // counters reported into the result map
    pub jobs_completed: u64,
    pub setup_changeovers: u64,
    pub busy_time: f64,
}

impl WorkStation {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity >= 1, "workstation needs at least one machine");
        Self {
            id: 0,
            name: name.into(),
            machines: (0..capacity).map(IndividualMachine::new).collect(),
            queue: Vec::new(),
            setup_matrix: SetupMatrix::new(),
            max_batch_size: 1,
            futures: Vec::new(),
            downtime_policy: DowntimePolicy::default(),
            downtime: None,
            jobs_completed: 0,
            setup_changeovers: 0,
            busy_time: 0.0,
        }
    }

    pub fn with_setup_matrix(mut self, matrix: SetupMatrix) -> Self {
        self.setup_matrix = matrix;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        assert!(size >= 1, "batch size must be at least 1");
        self.max_batch_size = size;
        self
    }

    pub fn with_downtime_policy(mut self, policy: DowntimePolicy) -> Self {
        self.downtime_policy = policy;
        self
    }

    pub fn with_downtime(mut self, downtime: Downtime) -> Self {
        self.downtime = Some(downtime);
        self
    }

    pub fn capacity(&self) -> usize {
        self.machines.len()
    }

    /// First machine available for selection, if any.
    pub fn idle_machine(&self) -> Option<usize> {
        self.machines
            .iter()
            .find(|m| m.state == MachineState::Idle)
            .map(|m| m.idx)
    }

    pub fn num_processing(&self) -> usize {
        self.machines
            .iter()
            .filter(|m| m.state == MachineState::Processing)
            .count()
    }

    /// Drops the recorded future arrival of `job_num`, if any. Called when
    /// the real job arrives.
    pub fn remove_future(&mut self, job_num: u64) {
        self.futures.retain(|f| f.job.job_num() != job_num);
    }

    pub(crate) fn reset_stats(&mut self) {
        self.jobs_completed = 0;
        self.setup_changeovers = 0;
        self.busy_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_matrix_lookup() {
        let m = SetupMatrix::new()
            .with_default(5.0)
            .with_transition("A", "B", 2.0)
            .with_transition("A", "A", 0.5);

        assert_eq!(m.get("A", "B"), 2.0);
        assert_eq!(m.get("B", "A"), 5.0); // falls back to default
        assert_eq!(m.get("A", "A"), 0.5); // explicit same-family
        assert_eq!(m.get("B", "B"), 0.0); // same family costs nothing
    }

    #[test]
    fn machines_start_inactive_with_default_setup() {
        let ws = WorkStation::new("W1", 3);
        assert_eq!(ws.capacity(), 3);
        assert!(ws.idle_machine().is_none());
        assert!(ws.machines.iter().all(|m| m.setup_state == DEF_SETUP));
    }

    #[test]
    fn remove_future_matches_by_job_num() {
        use crate::shop::operation::{Operation, Route};

        let mut ws = WorkStation::new("W1", 1);
        let route = Route::new(vec![Operation::new(0, 1.0), Operation::new(1, 1.0)]);
        let job = Job::new(7, 0, route, 0.0);
        ws.futures.push(FutureArrival {
            job: job.future_self(),
            time: 3.0,
        });

        ws.remove_future(8);
        assert_eq!(ws.futures.len(), 1);
        ws.remove_future(7);
        assert!(ws.futures.is_empty());
    }
}
