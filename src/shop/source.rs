use std::sync::Arc;

use crate::core::queue::SimTime;
use crate::random::DblStream;
use crate::shop::job::Job;
use crate::shop::operation::Route;
use crate::shop::value_store::ValueStore;

/// How a source spaces its job releases.
#[derive(Clone)]
pub enum ArrivalProcess {
    /// Each draw is the gap to the previous release.
    InterArrival(Box<dyn DblStream>),
    /// Each draw is an absolute release date; must be non-decreasing.
    ReleaseDates(Box<dyn DblStream>),
}

impl std::fmt::Debug for ArrivalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArrivalProcess::InterArrival(_) => f.write_str("InterArrival"),
            ArrivalProcess::ReleaseDates(_) => f.write_str("ReleaseDates"),
        }
    }
}

/// Produces jobs and feeds them into the shop at their release dates.
#[derive(Clone)]
pub struct JobSource {
    /// Index in the shop's source table.
    pub index: usize,
    pub arrivals: ArrivalProcess,
    /// Routes jobs may follow; the job type is the route index.
    pub routes: Vec<Arc<Route>>,
    /// Uniform sample in [0, 1) mapped to a route index; cycles through the
    /// routes in order when absent.
    pub route_mix: Option<Box<dyn DblStream>>,
    /// When set, every operation's processing time is redrawn from this
    /// stream at job creation.
    pub proc_times: Option<Box<dyn DblStream>>,
    /// Total-work-content factor for due-date assignment.
    pub due_date_factor: f64,
    pub job_weight: f64,
    pub max_jobs: Option<u64>,
    pub stop_arrivals: bool,
    pub jobs_started: u64,
    pub values: ValueStore,
    last_release: SimTime,
    route_cursor: usize,
}

impl std::fmt::Debug for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSource")
            .field("index", &self.index)
            .field("arrivals", &self.arrivals)
            .field("routes", &self.routes.len())
            .field("jobs_started", &self.jobs_started)
            .field("stop_arrivals", &self.stop_arrivals)
            .finish()
    }
}

impl JobSource {
    pub fn new(arrivals: ArrivalProcess, routes: Vec<Arc<Route>>) -> Self {
        assert!(!routes.is_empty(), "job source needs at least one route");
        Self {
            index: 0,
            arrivals,
            routes,
            route_mix: None,
            proc_times: None,
            due_date_factor: 2.0,
            job_weight: 1.0,
            max_jobs: None,
            stop_arrivals: false,
            jobs_started: 0,
            values: ValueStore::new(),
            last_release: 0.0,
            route_cursor: 0,
        }
    }

    pub fn with_route_mix(mut self, mix: Box<dyn DblStream>) -> Self {
        self.route_mix = Some(mix);
        self
    }

    pub fn with_proc_times(mut self, stream: Box<dyn DblStream>) -> Self {
        self.proc_times = Some(stream);
        self
    }

    pub fn with_due_date_factor(mut self, factor: f64) -> Self {
        self.due_date_factor = factor;
        self
    }

    pub fn with_job_weight(mut self, weight: f64) -> Self {
        self.job_weight = weight;
        self
    }

    pub fn with_max_jobs(mut self, max: u64) -> Self {
        self.max_jobs = Some(max);
        self
    }

    /// Release date of the next job, or `None` once the source is done.
    pub(crate) fn next_release(&mut self) -> Option<SimTime> {
        if self.stop_arrivals {
            return None;
        }
        if let Some(max) = self.max_jobs {
            if self.jobs_started >= max {
                return None;
            }
        }
        let t = match &mut self.arrivals {
            ArrivalProcess::InterArrival(s) => self.last_release + s.next_value(),
            ArrivalProcess::ReleaseDates(s) => s.next_value(),
        };
        self.last_release = t;
        Some(t)
    }

    /// Builds the job released at `release`. `job_num` is assigned by the
    /// shop.
    pub(crate) fn create_job(&mut self, job_num: u64, release: SimTime) -> Job {
        let route_idx = match &mut self.route_mix {
            Some(mix) => {
                let u = mix.next_value().clamp(0.0, 1.0 - f64::EPSILON);
                (u * self.routes.len() as f64) as usize
            }
            None => {
                let i = self.route_cursor;
                self.route_cursor = (self.route_cursor + 1) % self.routes.len();
                i
            }
        };

        let route = match &mut self.proc_times {
            Some(stream) => {
                // redraw processing times into a private copy of the route
                let mut ops = self.routes[route_idx].ops().to_vec();
                for op in &mut ops {
                    op.proc_time = stream.next_value().max(0.0);
                }
                Route::new(ops)
            }
            None => Arc::clone(&self.routes[route_idx]),
        };

        let mut job = Job::new(job_num, route_idx, route, release);
        job.weight = self.job_weight;
        job.assign_due_dates(self.due_date_factor);
        self.jobs_started += 1;
        job
    }

    /// Clears run state so the source can drive a fresh run.
    pub(crate) fn reset(&mut self) {
        self.stop_arrivals = false;
        self.jobs_started = 0;
        self.last_release = 0.0;
        self.route_cursor = 0;
    }

    /// Re-seeds all owned streams from a per-source seed.
    pub(crate) fn reseed(&mut self, seed: u64) {
        match &mut self.arrivals {
            ArrivalProcess::InterArrival(s) | ArrivalProcess::ReleaseDates(s) => s.reseed(seed),
        }
        if let Some(mix) = &mut self.route_mix {
            mix.reseed(seed.wrapping_add(1));
        }
        if let Some(pt) = &mut self.proc_times {
            pt.reseed(seed.wrapping_add(2));
        }
    }
}
