use slotmap::SlotMap;

use crate::core::queue::SimTime;
use crate::shop::job::{Job, JobKey};
use crate::shop::workstation::DEF_SETUP;

/// The unit a priority rule selects: a single job or a batch of jobs of the
/// same batch family, processed jointly on one machine.
#[derive(Debug, Clone)]
pub struct PrioRuleTarget {
    members: Vec<JobKey>,
    batch_family: Option<String>,
}

impl PrioRuleTarget {
    pub fn single(job: JobKey) -> Self {
        Self {
            members: vec![job],
            batch_family: None,
        }
    }

    pub fn batch(family: impl Into<String>, members: Vec<JobKey>) -> Self {
        debug_assert!(!members.is_empty(), "batch without members");
        Self {
            members,
            batch_family: Some(family.into()),
        }
    }

    pub fn is_batch(&self) -> bool {
        self.batch_family.is_some()
    }

    pub fn num_jobs(&self) -> usize {
        self.members.len()
    }

    pub fn job(&self, i: usize) -> JobKey {
        self.members[i]
    }

    pub fn jobs(&self) -> &[JobKey] {
        &self.members
    }

    /// Processing time of the target: the job's current operation, or for a
    /// batch the maximum processing time among its members.
    pub fn proc_time(&self, jobs: &SlotMap<JobKey, Job>) -> f64 {
        self.members
            .iter()
            .map(|&k| jobs[k].current_proc_time())
            .fold(0.0, f64::max)
    }

    /// Setup family the machine must change to: a batch derives it from the
    /// batch family, a single job from its current operation.
    pub fn setup_family(&self, jobs: &SlotMap<JobKey, Job>) -> String {
        if let Some(f) = &self.batch_family {
            return f.clone();
        }
        jobs[self.members[0]]
            .current_operation()
            .map(|op| op.setup_family.clone())
            .unwrap_or_else(|| DEF_SETUP.to_string())
    }

    /// Earliest queue-arrival time among the members.
    pub fn earliest_arrival(&self, jobs: &SlotMap<JobKey, Job>) -> SimTime {
        self.members
            .iter()
            .map(|&k| jobs[k].arrive_time)
            .fold(f64::INFINITY, f64::min)
    }

    /// Earliest final due date among the members.
    pub fn earliest_due_date(&self, jobs: &SlotMap<JobKey, Job>) -> SimTime {
        self.members
            .iter()
            .map(|&k| jobs[k].due_date)
            .fold(f64::INFINITY, f64::min)
    }

    /// Smallest member job number; priority rules break ties on it.
    pub fn min_job_num(&self, jobs: &SlotMap<JobKey, Job>) -> u64 {
        self.members
            .iter()
            .map(|&k| jobs[k].job_num())
            .min()
            .expect("target without members")
    }
}
