use slotmap::new_key_type;
use std::cell::Cell;
use std::sync::Arc;

use crate::core::queue::SimTime;
use crate::shop::operation::{Operation, Route};
use crate::shop::value_store::ValueStore;
use crate::shop::workstation::StationId;

new_key_type! {
    /// Arena key of a job owned by the shop.
    pub struct JobKey;
}

/// Main work unit flowing through the shop, bound to a route.
#[derive(Debug, Clone)]
pub struct Job {
    job_num: u64,
    pub job_type: usize,
    name: Option<String>,
    route: Arc<Route>,
    task_number: usize,
    pub release_date: SimTime,
    pub due_date: SimTime,
    pub weight: f64,
    op_due_dates: Vec<SimTime>,
    /// Arrival time at the current workstation's queue.
    pub arrive_time: SimTime,
    pub curr_station: Option<StationId>,
    /// Start of the current operation, set when processing begins.
    pub start_time: SimTime,
    /// Completion time of the current operation, set when processing begins.
    pub finish_time: SimTime,
    is_future: bool,
    // cache of the value returned by remaining_proc_time()
    rem_proc_time: Cell<Option<f64>>,
    pub values: ValueStore,
}

impl Job {
    pub fn new(job_num: u64, job_type: usize, route: Arc<Route>, release_date: SimTime) -> Self {
        Self {
            job_num,
            job_type,
            name: None,
            route,
            task_number: 0,
            release_date,
            due_date: release_date,
            weight: 1.0,
            op_due_dates: Vec::new(),
            arrive_time: release_date,
            curr_station: None,
            start_time: 0.0,
            finish_time: 0.0,
            is_future: false,
            rem_proc_time: Cell::new(None),
            values: ValueStore::new(),
        }
    }

    pub fn job_num(&self) -> u64 {
        self.job_num
    }

    pub fn name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("Job.{}.{}", self.job_type, self.job_num),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn task_number(&self) -> usize {
        self.task_number
    }

    /// Moves the job to operation `tn`, invalidating the remaining-time
    /// cache.
    pub fn set_task_number(&mut self, tn: usize) {
        debug_assert!(
            tn <= self.route.len(),
            "task number {tn} beyond route of length {}",
            self.route.len()
        );
        self.rem_proc_time.set(None);
        self.task_number = tn;
    }

    /// The operation the job currently undergoes or waits for; `None` once
    /// the route is exhausted.
    pub fn current_operation(&self) -> Option<&Operation> {
        self.route.ops().get(self.task_number)
    }

    pub fn current_proc_time(&self) -> f64 {
        self.current_operation()
            .map(|op| op.proc_time)
            .unwrap_or(0.0)
    }

    pub fn num_ops(&self) -> usize {
        self.route.len()
    }

    pub fn num_ops_left(&self) -> usize {
        self.route.len() - self.task_number
    }

    pub fn is_last_operation(&self) -> bool {
        self.task_number + 1 == self.route.len()
    }

    pub fn is_finished(&self) -> bool {
        self.task_number >= self.route.len()
    }

    /// Sum of processing times from the current operation onward. Cached
    /// until the task number changes.
    pub fn remaining_proc_time(&self) -> f64 {
        if let Some(cached) = self.rem_proc_time.get() {
            return cached;
        }
        let rem = self.route.ops()[self.task_number..]
            .iter()
            .map(|op| op.proc_time)
            .sum();
        self.rem_proc_time.set(Some(rem));
        rem
    }

    pub fn total_proc_time(&self) -> f64 {
        self.route.total_proc_time()
    }

    /// Assigns operation due dates by total work content: each operation's
    /// due date grows proportionally to its processing time. Also sets the
    /// job's final due date.
    pub fn assign_due_dates(&mut self, factor: f64) {
        let mut due = self.release_date;
        self.op_due_dates = self
            .route
            .ops()
            .iter()
            .map(|op| {
                due += factor * op.proc_time;
                due
            })
            .collect();
        self.due_date = self.op_due_dates.last().copied().unwrap_or(due);
    }

    /// Due date of the current operation; the final due date once the route
    /// is exhausted or no per-operation dates were assigned.
    pub fn current_op_due_date(&self) -> SimTime {
        self.op_due_dates
            .get(self.task_number)
            .copied()
            .unwrap_or(self.due_date)
    }

    pub fn is_future(&self) -> bool {
        self.is_future
    }

    /// The look-ahead placeholder for this job: a clone switched to the next
    /// operation and flagged as future. Futures are announced to downstream
    /// workstations but never enqueued for real processing.
    pub fn future_self(&self) -> Job {
        let mut f = self.clone();
        f.is_future = true;
        f.set_task_number(self.task_number + 1);
        f
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name(), self.task_number)?;
        if self.is_future {
            write!(f, "(future)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_op_job() -> Job {
        let route = Route::new(vec![
            Operation::new(0, 2.0),
            Operation::new(1, 3.0),
            Operation::new(2, 5.0),
        ]);
        Job::new(1, 0, route, 0.0)
    }

    #[test]
    fn remaining_proc_time_follows_task_number() {
        let mut j = three_op_job();
        assert_eq!(j.remaining_proc_time(), 10.0);

        j.set_task_number(1);
        assert_eq!(j.remaining_proc_time(), 8.0);

        j.set_task_number(3);
        assert_eq!(j.remaining_proc_time(), 0.0);
        assert!(j.is_finished());
    }

    #[test]
    fn cache_is_invalidated_not_stale() {
        let j = three_op_job();
        // prime the cache, then move on and query again
        assert_eq!(j.remaining_proc_time(), 10.0);
        let mut j = j;
        j.set_task_number(2);
        assert_eq!(j.remaining_proc_time(), 5.0);
    }

    #[test]
    fn twc_due_dates() {
        let mut j = three_op_job();
        j.assign_due_dates(2.0);

        assert_eq!(j.current_op_due_date(), 4.0);
        j.set_task_number(1);
        assert_eq!(j.current_op_due_date(), 10.0);
        j.set_task_number(2);
        assert_eq!(j.current_op_due_date(), 20.0);
        assert_eq!(j.due_date, 20.0);
    }

    #[test]
    fn future_self_points_at_next_operation() {
        let j = three_op_job();
        let f = j.future_self();

        assert!(f.is_future());
        assert_eq!(f.task_number(), 1);
        assert_eq!(f.job_num(), j.job_num());
        // original is untouched
        assert!(!j.is_future());
        assert_eq!(j.task_number(), 0);
    }

    #[test]
    fn default_name_encodes_type_and_number() {
        let j = three_op_job();
        assert_eq!(j.name(), "Job.0.1");
        assert_eq!(format!("{}", j.future_self()), "Job.0.1#1(future)");
    }
}
