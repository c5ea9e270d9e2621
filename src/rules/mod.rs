//! Queue-selection priority rules.
//!
//! A rule picks the next [`PrioRuleTarget`] for an idle machine. It never
//! reorders the queue itself; selection is re-evaluated from scratch every
//! time a machine frees up. Rules may carry state across calls and are
//! cloned together with the scenario.

use slotmap::SlotMap;

use crate::core::queue::SimTime;
use crate::shop::batch::PrioRuleTarget;
use crate::shop::job::{Job, JobKey};
use crate::shop::workstation::{IndividualMachine, WorkStation};

/// Read-only view a rule gets for one selection decision.
pub struct RuleCtx<'a> {
    pub ws: &'a WorkStation,
    /// The idle machine the selection is for.
    pub machine: &'a IndividualMachine,
    pub jobs: &'a SlotMap<JobKey, Job>,
    pub now: SimTime,
}

impl RuleCtx<'_> {
    /// Announced future arrivals at this workstation; empty unless
    /// look-ahead is enabled.
    pub fn look_ahead(&self) -> &[crate::shop::workstation::FutureArrival] {
        &self.ws.futures
    }
}

/// Selects which queued target an idle machine processes next.
pub trait PriorityRule: Send {
    fn name(&self) -> &'static str;

    /// Urgency of a target; the default [`PriorityRule::select`] picks the
    /// maximum. Ties are broken by ascending job number.
    fn priority(&mut self, target: &PrioRuleTarget, ctx: &RuleCtx<'_>) -> f64;

    /// Index of the chosen target, or `None` to leave the machine idle
    /// (a look-ahead rule may wait for an imminent better match).
    fn select(&mut self, queue: &[PrioRuleTarget], ctx: &RuleCtx<'_>) -> Option<usize> {
        best_by(queue, ctx.jobs, |t| self.priority(t, ctx))
    }

    fn clone_rule(&self) -> Box<dyn PriorityRule>;
}

impl Clone for Box<dyn PriorityRule> {
    fn clone(&self) -> Self {
        self.clone_rule()
    }
}

/// Argmax of `score` with ties broken by ascending job number.
fn best_by(
    queue: &[PrioRuleTarget],
    jobs: &SlotMap<JobKey, Job>,
    mut score: impl FnMut(&PrioRuleTarget) -> f64,
) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .map(|(i, t)| (i, score(t), t.min_job_num(jobs)))
        .max_by(|(_, sa, na), (_, sb, nb)| {
            sa.total_cmp(sb).then_with(|| nb.cmp(na)) // smaller job number wins ties
        })
        .map(|(i, _, _)| i)
}

/// First come, first served: earliest queue arrival first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fcfs;

impl PriorityRule for Fcfs {
    fn name(&self) -> &'static str {
        "FCFS"
    }

    fn priority(&mut self, target: &PrioRuleTarget, ctx: &RuleCtx<'_>) -> f64 {
        -target.earliest_arrival(ctx.jobs)
    }

    fn clone_rule(&self) -> Box<dyn PriorityRule> {
        Box::new(*self)
    }
}

/// Shortest processing time first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spt;

impl PriorityRule for Spt {
    fn name(&self) -> &'static str {
        "SPT"
    }

    fn priority(&mut self, target: &PrioRuleTarget, ctx: &RuleCtx<'_>) -> f64 {
        -target.proc_time(ctx.jobs)
    }

    fn clone_rule(&self) -> Box<dyn PriorityRule> {
        Box::new(*self)
    }
}

/// Earliest due date first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Edd;

impl PriorityRule for Edd {
    fn name(&self) -> &'static str {
        "EDD"
    }

    fn priority(&mut self, target: &PrioRuleTarget, ctx: &RuleCtx<'_>) -> f64 {
        -target.earliest_due_date(ctx.jobs)
    }

    fn clone_rule(&self) -> Box<dyn PriorityRule> {
        Box::new(*self)
    }
}

/// Setup-minimizing rule: prefers targets whose setup family matches the
/// machine's current setup state, falling back to the cheapest changeover.
///
/// With look-ahead enabled it may keep the machine idle when no queued
/// target matches but an announced future arrival does.
#[derive(Debug, Clone, Copy)]
pub struct SetupAvoidance {
    /// Wait for a matching future arrival instead of changing over.
    pub defer_for_matching_future: bool,
}

impl Default for SetupAvoidance {
    fn default() -> Self {
        Self {
            defer_for_matching_future: true,
        }
    }
}

impl PriorityRule for SetupAvoidance {
    fn name(&self) -> &'static str {
        "SetupAvoidance"
    }

    fn priority(&mut self, target: &PrioRuleTarget, ctx: &RuleCtx<'_>) -> f64 {
        let setup = ctx
            .ws
            .setup_matrix
            .get(&ctx.machine.setup_state, &target.setup_family(ctx.jobs));
        // cheapest changeover first, FCFS within equal setup cost
        -(setup * 1e6 + target.earliest_arrival(ctx.jobs))
    }

    fn select(&mut self, queue: &[PrioRuleTarget], ctx: &RuleCtx<'_>) -> Option<usize> {
        let matching = best_by(queue, ctx.jobs, |t| {
            if t.setup_family(ctx.jobs) == ctx.machine.setup_state {
                -t.earliest_arrival(ctx.jobs)
            } else {
                f64::NEG_INFINITY
            }
        })
        .filter(|&i| queue[i].setup_family(ctx.jobs) == ctx.machine.setup_state);

        if matching.is_some() {
            return matching;
        }

        if self.defer_for_matching_future {
            let future_match = ctx.look_ahead().iter().any(|f| {
                f.job
                    .current_operation()
                    .is_some_and(|op| op.setup_family == ctx.machine.setup_state)
            });
            if future_match {
                return None;
            }
        }

        best_by(queue, ctx.jobs, |t| self.priority(t, ctx))
    }

    fn clone_rule(&self) -> Box<dyn PriorityRule> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::operation::{Operation, Route};
    use crate::shop::workstation::{FutureArrival, SetupMatrix, WorkStation};

    struct Fixture {
        ws: WorkStation,
        jobs: SlotMap<JobKey, Job>,
        queue: Vec<PrioRuleTarget>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ws: WorkStation::new("W1", 1),
                jobs: SlotMap::with_key(),
                queue: Vec::new(),
            }
        }

        fn push(&mut self, job_num: u64, proc_time: f64, setup: &str, arrive: f64) -> JobKey {
            let route =
                Route::new(vec![Operation::new(0, proc_time).with_setup_family(setup)]);
            let mut job = Job::new(job_num, 0, route, 0.0);
            job.arrive_time = arrive;
            let key = self.jobs.insert(job);
            self.queue.push(PrioRuleTarget::single(key));
            key
        }

        fn select(&mut self, rule: &mut dyn PriorityRule) -> Option<usize> {
            // machine 0 is the one being scheduled
            let ctx = RuleCtx {
                ws: &self.ws,
                machine: &self.ws.machines[0],
                jobs: &self.jobs,
                now: 0.0,
            };
            rule.select(&self.queue, &ctx)
        }
    }

    #[test]
    fn fcfs_picks_earliest_arrival() {
        let mut fx = Fixture::new();
        fx.push(1, 1.0, "A", 5.0);
        fx.push(2, 1.0, "A", 2.0);
        fx.push(3, 1.0, "A", 8.0);

        assert_eq!(fx.select(&mut Fcfs), Some(1));
    }

    #[test]
    fn spt_picks_shortest_job() {
        let mut fx = Fixture::new();
        fx.push(1, 4.0, "A", 0.0);
        fx.push(2, 1.5, "A", 0.0);
        fx.push(3, 3.0, "A", 0.0);

        assert_eq!(fx.select(&mut Spt), Some(1));
    }

    #[test]
    fn ties_break_by_ascending_job_number() {
        let mut fx = Fixture::new();
        fx.push(7, 2.0, "A", 1.0);
        fx.push(3, 2.0, "A", 1.0);
        fx.push(5, 2.0, "A", 1.0);

        // identical priorities: job 3 wins
        assert_eq!(fx.select(&mut Fcfs), Some(1));
        assert_eq!(fx.select(&mut Spt), Some(1));
    }

    #[test]
    fn setup_avoidance_prefers_matching_family() {
        let mut fx = Fixture::new();
        fx.ws.setup_matrix = SetupMatrix::new().with_default(2.0);
        fx.ws.machines[0].setup_state = "B".to_string();
        fx.push(1, 1.0, "A", 0.0);
        fx.push(2, 1.0, "B", 5.0);

        // the later B job still wins: no changeover needed
        assert_eq!(fx.select(&mut SetupAvoidance::default()), Some(1));
    }

    #[test]
    fn setup_avoidance_defers_for_matching_future() {
        let mut fx = Fixture::new();
        fx.ws.setup_matrix = SetupMatrix::new().with_default(2.0);
        fx.ws.machines[0].setup_state = "A".to_string();
        fx.push(1, 1.0, "B", 0.0);

        // an A-family job is announced to arrive soon
        let route = Route::new(vec![
            Operation::new(9, 1.0),
            Operation::new(0, 1.0).with_setup_family("A"),
        ]);
        let upstream = Job::new(42, 0, route, 0.0);
        fx.ws.futures.push(FutureArrival {
            job: upstream.future_self(),
            time: 1.0,
        });

        assert_eq!(fx.select(&mut SetupAvoidance::default()), None);

        // without deferral the rule settles for the changeover
        let mut eager = SetupAvoidance {
            defer_for_matching_future: false,
        };
        assert_eq!(fx.select(&mut eager), Some(0));
    }
}
