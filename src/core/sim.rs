use tracing::{debug, trace};

use crate::core::error::SimError;
use crate::core::notify::{NotifierAdapter, ShopEvent, ShopListener};
use crate::core::queue::{
    EventQueue, SimTime, PRIO_ARRIVAL, PRIO_DEPART, PRIO_HORIZON, PRIO_NORMAL,
};
use crate::core::results::ResultMap;
use crate::shop::batch::PrioRuleTarget;
use crate::shop::job::JobKey;
use crate::shop::workstation::{DowntimePolicy, FutureArrival, MachineState, StationId};
use crate::shop::Shop;

/// Kernel-level events driving the run. Payloads are small and copyable;
/// recurring events (source arrivals, machine failures) re-schedule their
/// own variant instead of allocating anything new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// A source releases its next job and draws the following arrival.
    SourceArrival { source: usize },
    /// A machine finishes its current operation.
    Departure { station: StationId, machine: usize },
    MachineDown { station: StationId, machine: usize },
    MachineUp { station: StationId, machine: usize },
    /// Warm-up boundary: discard statistics gathered so far.
    StatsReset,
    /// Simulation-length stop.
    Horizon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Created,
    Initialized,
    Running,
    Finished,
    Resultified,
}

/// Single-threaded cooperative simulation kernel.
///
/// Owns the clock, the event queue, the notification bus, and the shop.
/// Handlers run to completion between pops; notifications raised by a
/// handler are delivered before the next event is popped.
pub struct Simulation {
    queue: EventQueue,
    notifier: NotifierAdapter,
    pub shop: Shop,
    state: SimState,
    length: Option<SimTime>,
    warm_up: Option<SimTime>,
    stop_after_jobs: Option<u64>,
    stop_requested: bool,
    events_dispatched: u64,
}

impl Simulation {
    pub fn new(shop: Shop) -> Self {
        Self {
            queue: EventQueue::new(),
            notifier: NotifierAdapter::new(),
            shop,
            state: SimState::Created,
            length: None,
            warm_up: None,
            stop_after_jobs: None,
            stop_requested: false,
            events_dispatched: 0,
        }
    }

    /// Stops the run at this simulated time.
    pub fn with_length(mut self, length: SimTime) -> Self {
        self.length = Some(length);
        self
    }

    /// Discards statistics collected before this simulated time.
    pub fn with_warm_up(mut self, warm_up: SimTime) -> Self {
        self.warm_up = Some(warm_up);
        self
    }

    /// Stops the run once this many jobs finished.
    pub fn with_stop_after_jobs(mut self, count: u64) -> Self {
        self.stop_after_jobs = Some(count);
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn ShopListener>) -> Result<(), SimError> {
        self.notifier.add_listener(listener)
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched
    }

    /// Derives per-source and per-station stream seeds from one scenario
    /// seed. Identical seeds reproduce identical runs.
    pub fn reseed(&mut self, seed: u64) {
        const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
        for (i, src) in self.shop.sources.iter_mut().enumerate() {
            src.reseed(seed.wrapping_add((i as u64 + 1).wrapping_mul(GOLDEN)));
        }
        for (sid, ws) in self.shop.stations.iter_mut().enumerate() {
            if let Some(dt) = &mut ws.downtime {
                let base = seed.wrapping_add((sid as u64 + 1000).wrapping_mul(GOLDEN));
                dt.time_between_failures.reseed(base);
                dt.time_to_repair.reseed(base.wrapping_add(1));
            }
        }
    }

    /// Wires the shop into the kernel: activates machines, schedules first
    /// arrivals and failures, and arms warm-up and horizon events.
    pub fn init(&mut self) -> Result<(), SimError> {
        if self.state != SimState::Created {
            return Err(SimError::InvariantViolation(
                "simulation initialized twice".into(),
            ));
        }

        for sid in 0..self.shop.stations.len() {
            for midx in 0..self.shop.stations[sid].machines.len() {
                self.shop.stations[sid].machines[midx].state = MachineState::Idle;
                self.fire(ShopEvent::WsActivated {
                    station: sid,
                    machine: midx,
                })?;
            }
        }

        for i in 0..self.shop.sources.len() {
            self.shop.sources[i].reset();
            if let Some(t) = self.shop.sources[i].next_release() {
                self.queue
                    .schedule(t, PRIO_ARRIVAL, SimEvent::SourceArrival { source: i })?;
            }
        }

        for sid in 0..self.shop.stations.len() {
            for midx in 0..self.shop.stations[sid].machines.len() {
                let ttf = self.shop.stations[sid]
                    .downtime
                    .as_mut()
                    .map(|dt| dt.time_between_failures.next_value().max(0.0));
                if let Some(t) = ttf {
                    self.queue.schedule(
                        t,
                        PRIO_NORMAL,
                        SimEvent::MachineDown {
                            station: sid,
                            machine: midx,
                        },
                    )?;
                }
            }
        }

        if let Some(w) = self.warm_up {
            self.queue.schedule(w, PRIO_NORMAL, SimEvent::StatsReset)?;
        }
        if let Some(l) = self.length {
            self.queue.schedule(l, PRIO_HORIZON, SimEvent::Horizon)?;
        }

        self.state = SimState::Initialized;
        Ok(())
    }

    /// The main loop: pop, advance the clock, dispatch, until the queue is
    /// empty or a stop condition fired. Stops are soft: the current handler
    /// always completes.
    pub fn run(&mut self) -> Result<(), SimError> {
        if self.state == SimState::Created {
            self.init()?;
        }
        if self.state != SimState::Initialized {
            return Err(SimError::InvariantViolation(format!(
                "run() in state {:?}",
                self.state
            )));
        }

        self.state = SimState::Running;
        while !self.stop_requested {
            let Some((t, ev)) = self.queue.pop() else { break };
            self.shop.sim_time = t;
            trace!(t, event = ?ev, "dispatch");
            self.events_dispatched += 1;
            self.dispatch(ev)?;
            #[cfg(debug_assertions)]
            self.shop.assert_consistent();
        }
        self.state = SimState::Finished;

        debug!(
            t = self.queue.now(),
            events = self.events_dispatched,
            finished = self.shop.jobs_finished,
            "run finished"
        );
        Ok(())
    }

    /// Collects the result map: shop contribution first, then every
    /// listener in registration order.
    pub fn produce_results(&mut self) -> Result<ResultMap, SimError> {
        if self.state != SimState::Finished {
            return Err(SimError::InvariantViolation(format!(
                "produce_results() in state {:?}",
                self.state
            )));
        }

        let mut rm = ResultMap::new();
        rm.put("simTime", self.queue.now())?;
        self.shop.produce_results(&mut rm)?;

        let Self {
            notifier, shop, ..
        } = self;
        notifier.produce_results(shop, &mut rm)?;

        self.state = SimState::Resultified;
        Ok(rm)
    }

    fn dispatch(&mut self, ev: SimEvent) -> Result<(), SimError> {
        match ev {
            SimEvent::SourceArrival { source } => self.on_source_arrival(source),
            SimEvent::Departure { station, machine } => self.on_departure(station, machine),
            SimEvent::MachineDown { station, machine } => self.on_machine_down(station, machine),
            SimEvent::MachineUp { station, machine } => self.on_machine_up(station, machine),
            SimEvent::StatsReset => self.on_stats_reset(),
            SimEvent::Horizon => {
                self.stop_requested = true;
                Ok(())
            }
        }
    }

    fn fire(&mut self, event: ShopEvent) -> Result<(), SimError> {
        let effects = self.notifier.fire(&self.shop, event)?;
        if effects.stop {
            self.stop_requested = true;
        }
        Ok(())
    }

    fn on_source_arrival(&mut self, si: usize) -> Result<(), SimError> {
        let now = self.queue.now();
        let num = self.shop.next_job_num();
        let job = self.shop.sources[si].create_job(num, now);
        let first_station = job.current_operation().map(|op| op.station);
        let key = self.shop.jobs.insert(job);
        self.shop.jobs_released += 1;

        // one arrival event per source, rescheduled with the next draw
        if let Some(t) = self.shop.sources[si].next_release() {
            self.queue
                .schedule(t, PRIO_ARRIVAL, SimEvent::SourceArrival { source: si })?;
        }

        debug!(t = now, job = %self.shop.jobs[key], "released");
        self.fire(ShopEvent::JobReleased { job: key })?;

        match first_station {
            Some(sid) => self.arrive_in_queue(key, sid),
            // a job with an empty route finishes on release
            None => self.handle_job_finished(key),
        }
    }

    fn arrive_in_queue(&mut self, key: JobKey, sid: StationId) -> Result<(), SimError> {
        let now = self.queue.now();
        let job_num = {
            let job = &mut self.shop.jobs[key];
            job.curr_station = Some(sid);
            job.arrive_time = now;
            job.job_num()
        };

        // the announcement is superseded by the real arrival
        self.shop.stations[sid].remove_future(job_num);
        self.shop.stations[sid].queue.push(key);

        self.fire(ShopEvent::JobArrivedInQueue { job: key, station: sid })?;
        self.fire(ShopEvent::WsJobArrival { station: sid, job: key })?;

        if self.shop.stations[sid].idle_machine().is_some() {
            self.try_select(sid)?;
        }
        Ok(())
    }

    /// Keeps selecting work for idle machines of `sid` until the queue runs
    /// out, no machine is idle, or the rule defers.
    fn try_select(&mut self, sid: StationId) -> Result<(), SimError> {
        loop {
            let Some(midx) = self.shop.stations[sid].idle_machine() else {
                return Ok(());
            };
            let mut targets = self.shop.build_targets(sid);
            if targets.is_empty() {
                return Ok(());
            }

            let now = self.queue.now();
            let choice = {
                let Shop {
                    stations,
                    rules,
                    jobs,
                    ..
                } = &mut self.shop;
                let ws = &stations[sid];
                let ctx = crate::rules::RuleCtx {
                    ws,
                    machine: &ws.machines[midx],
                    jobs: &*jobs,
                    now,
                };
                rules[sid].select(&targets, &ctx)
            };

            let Some(ti) = choice else {
                // rule leaves the machine idle (e.g. waiting for a look-ahead match)
                return Ok(());
            };
            let target = targets.swap_remove(ti);
            self.start_processing(sid, midx, target)?;
        }
    }

    fn start_processing(
        &mut self,
        sid: StationId,
        midx: usize,
        target: PrioRuleTarget,
    ) -> Result<(), SimError> {
        let now = self.queue.now();
        let keys: Vec<JobKey> = target.jobs().to_vec();

        for &k in &keys {
            let p = self.shop.jobs[k].current_proc_time();
            if p < 0.0 {
                return Err(SimError::InvariantViolation(format!(
                    "negative processing time {p} for {}",
                    self.shop.jobs[k]
                )));
            }
        }

        let new_setup = target.setup_family(&self.shop.jobs);
        let proc_time = target.proc_time(&self.shop.jobs);
        let (old_setup, setup_time) = {
            let ws = &self.shop.stations[sid];
            let old = ws.machines[midx].setup_state.clone();
            let t = ws.setup_matrix.get(&old, &new_setup);
            (old, t)
        };
        let finish = now + setup_time + proc_time;

        {
            // the whole target leaves the queue atomically
            let ws = &mut self.shop.stations[sid];
            ws.queue.retain(|k| !keys.contains(k));
            if setup_time > 0.0 {
                ws.setup_changeovers += 1;
            }
            let m = &mut ws.machines[midx];
            debug_assert_eq!(m.state, MachineState::Idle, "selection on a busy machine");
            m.state = MachineState::Processing;
            m.setup_state = new_setup.clone();
            m.current = Some(target.clone());
            m.proc_started = now;
            m.proc_finished = finish;
            m.paused_remaining = None;
        }

        for &k in &keys {
            self.fire(ShopEvent::JobRemovedFromQueue { job: k, station: sid })?;
        }

        for &k in &keys {
            {
                let job = &mut self.shop.jobs[k];
                job.start_time = now;
                job.finish_time = finish;
            }
            // announce the job downstream while it is being processed here
            if self.shop.enable_look_ahead {
                let future = {
                    let job = &self.shop.jobs[k];
                    (!job.is_last_operation()).then(|| job.future_self())
                };
                if let Some(f) = future {
                    let next_sid = f
                        .current_operation()
                        .expect("future clone beyond its route")
                        .station;
                    self.shop.stations[next_sid]
                        .futures
                        .push(FutureArrival { job: f, time: finish });
                }
            }
        }

        let dep = self.queue.schedule(
            finish,
            PRIO_DEPART,
            SimEvent::Departure {
                station: sid,
                machine: midx,
            },
        )?;
        self.shop.stations[sid].machines[midx].departure = Some(dep);

        self.fire(ShopEvent::WsJobSelected {
            station: sid,
            machine: midx,
            target: target.clone(),
            old_setup,
            new_setup,
            setup_time,
        })?;
        for &k in &keys {
            self.fire(ShopEvent::JobStartOperation { job: k, station: sid })?;
        }
        Ok(())
    }

    fn on_departure(&mut self, sid: StationId, midx: usize) -> Result<(), SimError> {
        let now = self.queue.now();
        let stats_reset_at = self.shop.stats_reset_at;

        let (target, proc_start) = {
            let ws = &mut self.shop.stations[sid];
            let m = &mut ws.machines[midx];
            debug_assert_eq!(m.state, MachineState::Processing, "departure from idle machine");
            let target = m.current.take().expect("departure from an empty machine");
            m.state = MachineState::Idle;
            m.departure = None;
            let proc_start = m.proc_started;

            ws.jobs_completed += target.num_jobs() as u64;
            ws.busy_time += now - proc_start.max(stats_reset_at);
            (target, proc_start)
        };

        let keys: Vec<JobKey> = target.jobs().to_vec();
        for &k in &keys {
            self.fire(ShopEvent::JobEndOperation { job: k, station: sid })?;
        }
        self.fire(ShopEvent::WsJobCompleted {
            station: sid,
            machine: midx,
            target,
            proc_start,
        })?;

        for &k in &keys {
            let (finished, next_sid) = {
                let job = &mut self.shop.jobs[k];
                job.set_task_number(job.task_number() + 1);
                match job.current_operation() {
                    Some(op) => (false, op.station),
                    None => (true, 0),
                }
            };
            if finished {
                self.handle_job_finished(k)?;
            } else {
                self.arrive_in_queue(k, next_sid)?;
            }
        }

        self.try_select(sid)
    }

    fn handle_job_finished(&mut self, key: JobKey) -> Result<(), SimError> {
        let now = self.queue.now();
        self.shop.jobs_finished += 1;
        self.shop.last_finish_time = now;
        self.shop.jobs[key].curr_station = None;

        debug!(t = now, job = %self.shop.jobs[key], "finished");
        self.fire(ShopEvent::JobFinished { job: key })?;
        // hand the job over to result collection
        self.shop.jobs.remove(key);

        if let Some(max) = self.stop_after_jobs {
            if self.shop.jobs_finished >= max {
                self.stop_requested = true;
            }
        }
        Ok(())
    }

    fn on_machine_down(&mut self, sid: StationId, midx: usize) -> Result<(), SimError> {
        let now = self.queue.now();
        let policy = self.shop.stations[sid].downtime_policy;

        let (dep, requeue) = {
            let ws = &mut self.shop.stations[sid];
            let m = &mut ws.machines[midx];
            let dep = m.departure.take();
            let mut requeue = Vec::new();

            if m.state == MachineState::Processing {
                match policy {
                    DowntimePolicy::PreserveRemaining => {
                        m.paused_remaining = Some(m.proc_finished - now);
                    }
                    DowntimePolicy::Discard => {
                        if let Some(t) = m.current.take() {
                            requeue = t.jobs().to_vec();
                        }
                        m.paused_remaining = None;
                    }
                }
            }
            m.state = MachineState::Down;
            (dep, requeue)
        };

        if let Some(d) = dep {
            self.queue.cancel(d);
        }
        // abandoned work competes for a machine again, from scratch
        for k in requeue {
            self.shop.stations[sid].queue.push(k);
        }

        self.fire(ShopEvent::WsDeactivated {
            station: sid,
            machine: midx,
        })?;

        let ttr = self.shop.stations[sid]
            .downtime
            .as_mut()
            .map(|dt| dt.time_to_repair.next_value().max(0.0));
        if let Some(t) = ttr {
            self.queue.schedule(
                now + t,
                PRIO_NORMAL,
                SimEvent::MachineUp {
                    station: sid,
                    machine: midx,
                },
            )?;
        }
        Ok(())
    }

    fn on_machine_up(&mut self, sid: StationId, midx: usize) -> Result<(), SimError> {
        let now = self.queue.now();

        let resumed = {
            let ws = &mut self.shop.stations[sid];
            let m = &mut ws.machines[midx];
            debug_assert_eq!(m.state, MachineState::Down, "repair of a machine not down");
            match m.paused_remaining.take() {
                Some(rem) => {
                    m.state = MachineState::Processing;
                    m.proc_finished = now + rem;
                    Some(rem)
                }
                None => {
                    m.state = MachineState::Idle;
                    None
                }
            }
        };

        if let Some(rem) = resumed {
            let dep = self.queue.schedule(
                now + rem,
                PRIO_DEPART,
                SimEvent::Departure {
                    station: sid,
                    machine: midx,
                },
            )?;
            self.shop.stations[sid].machines[midx].departure = Some(dep);
        }

        self.fire(ShopEvent::WsActivated {
            station: sid,
            machine: midx,
        })?;

        let ttf = self.shop.stations[sid]
            .downtime
            .as_mut()
            .map(|dt| dt.time_between_failures.next_value().max(0.0));
        if let Some(t) = ttf {
            self.queue.schedule(
                now + t,
                PRIO_NORMAL,
                SimEvent::MachineDown {
                    station: sid,
                    machine: midx,
                },
            )?;
        }

        if resumed.is_none() {
            self.try_select(sid)?;
        }
        Ok(())
    }

    fn on_stats_reset(&mut self) -> Result<(), SimError> {
        let now = self.queue.now();
        self.shop.reset_stats(now);
        self.fire(ShopEvent::StatsReset)
    }
}
