//! The job-shop domain model: jobs, routes, workstations, sources, and the
//! shop container owning them.

pub mod batch;
pub mod job;
pub mod operation;
pub mod source;
pub mod value_store;
pub mod workstation;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::core::error::SimError;
use crate::core::queue::SimTime;
use crate::core::results::ResultMap;
use crate::rules::PriorityRule;
use crate::shop::batch::PrioRuleTarget;
use crate::shop::job::{Job, JobKey};
use crate::shop::source::JobSource;
use crate::shop::workstation::{MachineState, StationId, WorkStation};

/// Owning container of workstations, job sources, and the job arena.
///
/// Workstations and sources are indexed by position; jobs live in a slotmap
/// from release to completion. Priority rules are kept in a table parallel
/// to the stations so a rule can be invoked mutably while it reads the rest
/// of the shop.
#[derive(Clone)]
pub struct Shop {
    pub stations: Vec<WorkStation>,
    pub rules: Vec<Box<dyn PriorityRule>>,
    pub sources: Vec<JobSource>,
    pub jobs: SlotMap<JobKey, Job>,
    pub enable_look_ahead: bool,
    /// Clock mirror maintained by the kernel so listeners can read the
    /// current time.
    pub sim_time: SimTime,
    pub jobs_released: u64,
    pub jobs_finished: u64,
    /// Completion time of the job that finished last.
    pub last_finish_time: SimTime,
    /// Warm-up boundary; statistics cover the span after it.
    pub stats_reset_at: SimTime,
    next_job_num: u64,
}

impl Default for Shop {
    fn default() -> Self {
        Self::new()
    }
}

impl Shop {
    pub fn new() -> Self {
        Self {
            stations: Vec::new(),
            rules: Vec::new(),
            sources: Vec::new(),
            jobs: SlotMap::with_key(),
            enable_look_ahead: false,
            sim_time: 0.0,
            jobs_released: 0,
            jobs_finished: 0,
            last_finish_time: 0.0,
            stats_reset_at: 0.0,
            next_job_num: 0,
        }
    }

    /// Adds a workstation with its priority rule; returns the station id.
    pub fn add_station(
        &mut self,
        mut station: WorkStation,
        rule: Box<dyn PriorityRule>,
    ) -> StationId {
        let id = self.stations.len();
        station.id = id;
        self.stations.push(station);
        self.rules.push(rule);
        id
    }

    pub fn add_source(&mut self, mut source: JobSource) -> usize {
        let index = self.sources.len();
        source.index = index;
        self.sources.push(source);
        index
    }

    pub fn station(&self, id: StationId) -> &WorkStation {
        &self.stations[id]
    }

    pub fn job(&self, key: JobKey) -> &Job {
        &self.jobs[key]
    }

    pub(crate) fn next_job_num(&mut self) -> u64 {
        let n = self.next_job_num;
        self.next_job_num += 1;
        n
    }

    /// The selectable units in a station's queue: singles, or per-family
    /// batches capped at the station's batch size. Queue order is preserved
    /// within and across targets.
    pub fn build_targets(&self, station: StationId) -> Vec<PrioRuleTarget> {
        let ws = &self.stations[station];
        if ws.max_batch_size <= 1 {
            return ws.queue.iter().map(|&k| PrioRuleTarget::single(k)).collect();
        }

        let mut targets = Vec::new();
        let mut families: FxHashMap<&str, usize> = FxHashMap::default();

        for &key in &ws.queue {
            let family = self.jobs[key]
                .current_operation()
                .and_then(|op| op.batch_family.as_deref());

            match family {
                None => targets.push(PrioRuleTarget::single(key)),
                Some(fam) => {
                    // extend the family's open batch or start a fresh one
                    let open = families.get(fam).copied().filter(|&i| {
                        let t: &PrioRuleTarget = &targets[i];
                        t.num_jobs() < ws.max_batch_size
                    });
                    match open {
                        Some(i) => {
                            let members = {
                                let mut m = targets[i].jobs().to_vec();
                                m.push(key);
                                m
                            };
                            targets[i] = PrioRuleTarget::batch(fam, members);
                        }
                        None => {
                            families.insert(fam, targets.len());
                            targets.push(PrioRuleTarget::batch(fam, vec![key]));
                        }
                    }
                }
            }
        }
        targets
    }

    pub(crate) fn reset_stats(&mut self, now: SimTime) {
        self.stats_reset_at = now;
        for ws in &mut self.stations {
            ws.reset_stats();
        }
    }

    /// Shop-level contribution to the result map.
    pub(crate) fn produce_results(&self, rm: &mut ResultMap) -> Result<(), SimError> {
        rm.put("jobsReleased", self.jobs_released as i64)?;
        rm.put("jobsFinished", self.jobs_finished as i64)?;
        rm.put("cMax", self.last_finish_time)?;

        for src in &self.sources {
            rm.put(
                format!("source.{}.jobsStarted", src.index),
                src.jobs_started as i64,
            )?;
        }

        let span = self.sim_time - self.stats_reset_at;
        for ws in &self.stations {
            let prefix = format!("ws.{}", ws.name);
            rm.put(format!("{prefix}.jobsCompleted"), ws.jobs_completed as i64)?;
            rm.put(
                format!("{prefix}.setupChangeovers"),
                ws.setup_changeovers as i64,
            )?;
            let util = if span > 0.0 {
                ws.busy_time / (span * ws.capacity() as f64)
            } else {
                0.0
            };
            rm.put(format!("{prefix}.utilization"), util)?;
        }
        Ok(())
    }

    /// Structural invariants, checked after every dispatched event in debug
    /// builds. Mirrors the queue/processing exclusivity rules: a real job
    /// is in at most one queue or processing slot; futures never appear in
    /// a real queue.
    #[cfg(debug_assertions)]
    pub(crate) fn assert_consistent(&self) {
        let mut seen: FxHashMap<JobKey, usize> = FxHashMap::default();

        for ws in &self.stations {
            for &k in &ws.queue {
                *seen.entry(k).or_default() += 1;
                debug_assert!(
                    !self.jobs[k].is_future(),
                    "future clone enqueued for real processing at {}",
                    ws.name
                );
            }
            for m in &ws.machines {
                if let Some(target) = &m.current {
                    // a down machine may hold paused work
                    debug_assert!(
                        m.state == MachineState::Processing || m.state == MachineState::Down,
                        "machine {}.{} holds work in state {:?}",
                        ws.name,
                        m.idx,
                        m.state
                    );
                    for &k in target.jobs() {
                        *seen.entry(k).or_default() += 1;
                    }
                }
            }
            debug_assert!(
                ws.num_processing() <= ws.capacity(),
                "station {} exceeds its capacity",
                ws.name
            );
        }

        for (key, count) in seen {
            debug_assert!(
                count <= 1,
                "job {:?} owned by {} queues/machines at once",
                key,
                count
            );
        }
    }
}

impl std::fmt::Debug for Shop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shop")
            .field("stations", &self.stations.len())
            .field("sources", &self.sources.len())
            .field("jobs", &self.jobs.len())
            .field("jobs_released", &self.jobs_released)
            .field("jobs_finished", &self.jobs_finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Fcfs;
    use crate::shop::operation::{Operation, Route};

    fn batch_shop(max_batch: usize) -> (Shop, StationId) {
        let mut shop = Shop::new();
        let ws = WorkStation::new("W1", 1).with_max_batch_size(max_batch);
        let id = shop.add_station(ws, Box::new(Fcfs));
        (shop, id)
    }

    fn enqueue(shop: &mut Shop, station: StationId, family: Option<&str>) -> JobKey {
        let mut op = Operation::new(station, 1.0);
        if let Some(f) = family {
            op = op.with_batch_family(f);
        }
        let num = shop.next_job_num();
        let job = Job::new(num, 0, Route::new(vec![op]), 0.0);
        let key = shop.jobs.insert(job);
        shop.stations[station].queue.push(key);
        key
    }

    #[test]
    fn no_batching_yields_singles() {
        let (mut shop, id) = batch_shop(1);
        enqueue(&mut shop, id, Some("F"));
        enqueue(&mut shop, id, Some("F"));

        let targets = shop.build_targets(id);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| !t.is_batch()));
    }

    #[test]
    fn family_members_group_up_to_batch_size() {
        let (mut shop, id) = batch_shop(2);
        enqueue(&mut shop, id, Some("F"));
        enqueue(&mut shop, id, None);
        enqueue(&mut shop, id, Some("F"));
        enqueue(&mut shop, id, Some("F"));

        let targets = shop.build_targets(id);
        // F-batch of 2, the single, then the overflow F-batch of 1
        assert_eq!(targets.len(), 3);
        assert!(targets[0].is_batch());
        assert_eq!(targets[0].num_jobs(), 2);
        assert!(!targets[1].is_batch());
        assert!(targets[2].is_batch());
        assert_eq!(targets[2].num_jobs(), 1);
    }

    #[test]
    fn distinct_families_never_mix() {
        let (mut shop, id) = batch_shop(4);
        enqueue(&mut shop, id, Some("F"));
        enqueue(&mut shop, id, Some("G"));
        enqueue(&mut shop, id, Some("F"));

        let targets = shop.build_targets(id);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].num_jobs(), 2);
        assert_eq!(targets[1].num_jobs(), 1);
    }
}
