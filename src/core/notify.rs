use std::collections::VecDeque;

use crate::core::error::SimError;
use crate::core::queue::SimTime;
use crate::core::results::ResultMap;
use crate::shop::batch::PrioRuleTarget;
use crate::shop::job::JobKey;
use crate::shop::workstation::StationId;
use crate::shop::Shop;

/// Notification kinds published during a run. Listeners match on the
/// variant tag; `Custom` carries a caller-chosen tag for extension events.
#[derive(Debug, Clone)]
pub enum ShopEvent {
    JobReleased {
        job: JobKey,
    },
    JobFinished {
        job: JobKey,
    },
    JobArrivedInQueue {
        job: JobKey,
        station: StationId,
    },
    JobRemovedFromQueue {
        job: JobKey,
        station: StationId,
    },
    JobStartOperation {
        job: JobKey,
        station: StationId,
    },
    JobEndOperation {
        job: JobKey,
        station: StationId,
    },
    WsJobArrival {
        station: StationId,
        job: JobKey,
    },
    WsJobSelected {
        station: StationId,
        machine: usize,
        target: PrioRuleTarget,
        old_setup: String,
        new_setup: String,
        setup_time: f64,
    },
    WsJobCompleted {
        station: StationId,
        machine: usize,
        target: PrioRuleTarget,
        proc_start: SimTime,
    },
    WsActivated {
        station: StationId,
        machine: usize,
    },
    WsDeactivated {
        station: StationId,
        machine: usize,
    },
    /// Warm-up boundary: collectors discard everything gathered so far.
    StatsReset,
    Custom(&'static str),
}

/// Per-dispatch scratch handed to each listener invocation. Anything a
/// listener wants to feed back into the run goes through here: further
/// notifications, a stop request, or its own removal.
#[derive(Default)]
pub struct NotifyCtx {
    published: Vec<ShopEvent>,
    added: usize,
    stop: bool,
    unsubscribe: bool,
}

impl NotifyCtx {
    /// Publishes a follow-up notification. It is queued and delivered after
    /// the current fan-out completes, preserving causal order.
    pub fn publish(&mut self, event: ShopEvent) {
        self.published.push(event);
    }

    /// Registering listeners during fan-out is not allowed; calling this
    /// makes the surrounding dispatch fail.
    pub fn add_listener(&mut self) {
        self.added += 1;
    }

    /// Asks the kernel to stop after the current event.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    /// Removes the currently firing listener after it returns. Successors in
    /// the registration order still see the current notification.
    pub fn unsubscribe(&mut self) {
        self.unsubscribe = true;
    }
}

/// Observer of a running scenario. The default [`ShopListener::inform`]
/// dispatches each notification kind to a dedicated hook; implementors
/// override only the hooks they care about.
#[allow(unused_variables, clippy::too_many_arguments)]
pub trait ShopListener: Send {
    fn inform(&mut self, shop: &Shop, event: &ShopEvent, ctx: &mut NotifyCtx) {
        match event {
            ShopEvent::JobReleased { job } => self.job_released(shop, *job, ctx),
            ShopEvent::JobFinished { job } => self.job_finished(shop, *job, ctx),
            ShopEvent::JobArrivedInQueue { job, station } => {
                self.job_arrived_in_queue(shop, *job, *station, ctx)
            }
            ShopEvent::JobRemovedFromQueue { job, station } => {
                self.job_removed_from_queue(shop, *job, *station, ctx)
            }
            ShopEvent::JobStartOperation { job, station } => {
                self.job_start_operation(shop, *job, *station, ctx)
            }
            ShopEvent::JobEndOperation { job, station } => {
                self.job_end_operation(shop, *job, *station, ctx)
            }
            ShopEvent::WsJobArrival { station, job } => {
                self.ws_job_arrival(shop, *station, *job, ctx)
            }
            ShopEvent::WsJobSelected {
                station,
                machine,
                target,
                old_setup,
                new_setup,
                setup_time,
            } => self.ws_job_selected(
                shop, *station, *machine, target, old_setup, new_setup, *setup_time, ctx,
            ),
            ShopEvent::WsJobCompleted {
                station,
                machine,
                target,
                proc_start,
            } => self.ws_job_completed(shop, *station, *machine, target, *proc_start, ctx),
            ShopEvent::WsActivated { station, machine } => {
                self.ws_activated(shop, *station, *machine, ctx)
            }
            ShopEvent::WsDeactivated { station, machine } => {
                self.ws_deactivated(shop, *station, *machine, ctx)
            }
            ShopEvent::StatsReset => self.stats_reset(shop),
            ShopEvent::Custom(tag) => self.custom(shop, *tag, ctx),
        }
    }

    fn job_released(&mut self, shop: &Shop, job: JobKey, ctx: &mut NotifyCtx) {}
    fn job_finished(&mut self, shop: &Shop, job: JobKey, ctx: &mut NotifyCtx) {}
    fn job_arrived_in_queue(
        &mut self,
        shop: &Shop,
        job: JobKey,
        station: StationId,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn job_removed_from_queue(
        &mut self,
        shop: &Shop,
        job: JobKey,
        station: StationId,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn job_start_operation(
        &mut self,
        shop: &Shop,
        job: JobKey,
        station: StationId,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn job_end_operation(
        &mut self,
        shop: &Shop,
        job: JobKey,
        station: StationId,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn ws_job_arrival(&mut self, shop: &Shop, station: StationId, job: JobKey, ctx: &mut NotifyCtx) {
    }
    fn ws_job_selected(
        &mut self,
        shop: &Shop,
        station: StationId,
        machine: usize,
        target: &PrioRuleTarget,
        old_setup: &str,
        new_setup: &str,
        setup_time: f64,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn ws_job_completed(
        &mut self,
        shop: &Shop,
        station: StationId,
        machine: usize,
        target: &PrioRuleTarget,
        proc_start: SimTime,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn ws_activated(&mut self, shop: &Shop, station: StationId, machine: usize, ctx: &mut NotifyCtx) {
    }
    fn ws_deactivated(
        &mut self,
        shop: &Shop,
        station: StationId,
        machine: usize,
        ctx: &mut NotifyCtx,
    ) {
    }
    fn stats_reset(&mut self, shop: &Shop) {}
    fn custom(&mut self, shop: &Shop, tag: &'static str, ctx: &mut NotifyCtx) {}

    /// Contribution to the run's result map, called once after the run.
    fn produce_results(&mut self, shop: &Shop, rm: &mut ResultMap) -> Result<(), SimError> {
        Ok(())
    }

    fn clone_listener(&self) -> Box<dyn ShopListener>;
}

impl Clone for Box<dyn ShopListener> {
    fn clone(&self) -> Self {
        self.clone_listener()
    }
}

/// Side effects of one [`NotifierAdapter::fire`] call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FireEffects {
    pub stop: bool,
}

/// Listener registry and fan-out engine.
///
/// Subscribers are invoked in registration order. Notifications published
/// while a fan-out is in progress are held in a FIFO and drained once the
/// current fan-out completes, so re-entrant publishes keep causal order.
#[derive(Default)]
pub struct NotifierAdapter {
    listeners: Vec<Box<dyn ShopListener>>,
    pending: VecDeque<ShopEvent>,
    firing: bool,
    disable_count: u32,
}

impl NotifierAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Box<dyn ShopListener>) -> Result<(), SimError> {
        if self.firing {
            return Err(SimError::ConcurrentModification);
        }
        self.listeners.push(listener);
        Ok(())
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }

    /// Suppresses all notifications until a matching [`NotifierAdapter::enable`].
    pub fn disable(&mut self) {
        self.disable_count += 1;
    }

    /// Undoes one [`NotifierAdapter::disable`]; unbalanced calls are an
    /// invariant violation.
    pub fn enable(&mut self) -> Result<(), SimError> {
        if self.disable_count == 0 {
            return Err(SimError::InvariantViolation(
                "events enabled more often than disabled".into(),
            ));
        }
        self.disable_count -= 1;
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.disable_count == 0
    }

    /// Delivers `event` to every listener, then drains any notifications the
    /// listeners published along the way.
    pub fn fire(&mut self, shop: &Shop, event: ShopEvent) -> Result<FireEffects, SimError> {
        if !self.enabled() {
            return Ok(FireEffects::default());
        }

        if self.firing {
            // fire() re-entered from inside a fan-out: hold for the drain loop
            self.pending.push_back(event);
            return Ok(FireEffects::default());
        }

        self.firing = true;
        let result = self.fan_out(shop, event);
        self.firing = false;
        self.pending.clear();
        result
    }

    fn fan_out(&mut self, shop: &Shop, event: ShopEvent) -> Result<FireEffects, SimError> {
        let mut effects = FireEffects::default();
        let mut current = Some(event);

        while let Some(ev) = current.take() {
            let mut i = 0;
            while i < self.listeners.len() {
                let mut ctx = NotifyCtx::default();
                self.listeners[i].inform(shop, &ev, &mut ctx);

                if ctx.added > 0 {
                    return Err(SimError::ConcurrentModification);
                }
                self.pending.extend(ctx.published.drain(..));
                if ctx.stop {
                    effects.stop = true;
                }
                if ctx.unsubscribe {
                    self.listeners.remove(i);
                } else {
                    i += 1;
                }
            }
            current = self.pending.pop_front();
        }

        Ok(effects)
    }

    /// Result-production pass over all listeners, outside any fan-out.
    pub fn produce_results(&mut self, shop: &Shop, rm: &mut ResultMap) -> Result<(), SimError> {
        for listener in &mut self.listeners {
            listener.produce_results(shop, rm)?;
        }
        Ok(())
    }
}

impl Clone for NotifierAdapter {
    fn clone(&self) -> Self {
        // transient dispatch state never survives a clone
        Self {
            listeners: self.listeners.clone(),
            pending: VecDeque::new(),
            firing: false,
            disable_count: self.disable_count,
        }
    }
}

impl std::fmt::Debug for NotifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierAdapter")
            .field("listeners", &self.listeners.len())
            .field("firing", &self.firing)
            .field("disable_count", &self.disable_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::Shop;
    use std::sync::mpsc::Sender;

    /// Records every tag it sees; optionally republishes or misbehaves.
    #[derive(Clone)]
    struct Probe {
        tx: Sender<&'static str>,
        label: &'static str,
        republish_on: Option<&'static str>,
        unsubscribe_on: Option<&'static str>,
        add_on: Option<&'static str>,
    }

    impl Probe {
        fn new(tx: Sender<&'static str>, label: &'static str) -> Self {
            Self {
                tx,
                label,
                republish_on: None,
                unsubscribe_on: None,
                add_on: None,
            }
        }
    }

    impl ShopListener for Probe {
        fn custom(&mut self, _shop: &Shop, tag: &'static str, ctx: &mut NotifyCtx) {
            self.tx.send(self.label).unwrap();
            self.tx.send(tag).unwrap();
            if self.republish_on == Some(tag) {
                self.republish_on = None;
                ctx.publish(ShopEvent::Custom("X"));
            }
            if self.unsubscribe_on == Some(tag) {
                ctx.unsubscribe();
            }
            if self.add_on == Some(tag) {
                ctx.add_listener();
            }
        }

        fn clone_listener(&self) -> Box<dyn ShopListener> {
            Box::new(self.clone())
        }
    }

    fn drain(rx: &std::sync::mpsc::Receiver<&'static str>) -> Vec<&'static str> {
        rx.try_iter().collect()
    }

    #[test]
    fn fan_out_in_registration_order() {
        let shop = Shop::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut n = NotifierAdapter::new();
        n.add_listener(Box::new(Probe::new(tx.clone(), "a"))).unwrap();
        n.add_listener(Box::new(Probe::new(tx.clone(), "b"))).unwrap();

        n.fire(&shop, ShopEvent::Custom("E")).unwrap();
        assert_eq!(drain(&rx), vec!["a", "E", "b", "E"]);
    }

    #[test]
    fn reentrant_publish_is_delivered_after_current_fan_out() {
        let shop = Shop::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut n = NotifierAdapter::new();
        let mut first = Probe::new(tx.clone(), "a");
        first.republish_on = Some("E");
        n.add_listener(Box::new(first)).unwrap();
        n.add_listener(Box::new(Probe::new(tx.clone(), "b"))).unwrap();

        n.fire(&shop, ShopEvent::Custom("E")).unwrap();
        // "b" still sees E before anyone sees the follow-up X
        assert_eq!(drain(&rx), vec!["a", "E", "b", "E", "a", "X", "b", "X"]);
    }

    #[test]
    fn removing_the_firing_listener_keeps_successors() {
        let shop = Shop::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut n = NotifierAdapter::new();
        let mut first = Probe::new(tx.clone(), "a");
        first.unsubscribe_on = Some("E");
        n.add_listener(Box::new(first)).unwrap();
        n.add_listener(Box::new(Probe::new(tx.clone(), "b"))).unwrap();

        n.fire(&shop, ShopEvent::Custom("E")).unwrap();
        assert_eq!(n.num_listeners(), 1);
        assert_eq!(drain(&rx), vec!["a", "E", "b", "E"]);

        n.fire(&shop, ShopEvent::Custom("F")).unwrap();
        assert_eq!(drain(&rx), vec!["b", "F"]);
    }

    #[test]
    fn adding_during_fan_out_fails() {
        let shop = Shop::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        let mut n = NotifierAdapter::new();
        let mut listener = Probe::new(tx, "a");
        listener.add_on = Some("E");
        n.add_listener(Box::new(listener)).unwrap();

        let err = n.fire(&shop, ShopEvent::Custom("E")).unwrap_err();
        assert!(matches!(err, SimError::ConcurrentModification));
    }

    #[test]
    fn disable_enable_round_trip_is_a_noop() {
        let shop = Shop::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut n = NotifierAdapter::new();
        n.add_listener(Box::new(Probe::new(tx, "a"))).unwrap();

        n.disable();
        n.fire(&shop, ShopEvent::Custom("E")).unwrap();
        n.enable().unwrap();
        assert!(drain(&rx).is_empty());
        assert_eq!(n.num_listeners(), 1);

        n.fire(&shop, ShopEvent::Custom("F")).unwrap();
        assert_eq!(drain(&rx), vec!["a", "F"]);
    }

    #[test]
    fn unbalanced_enable_fails() {
        let mut n = NotifierAdapter::new();
        let err = n.enable().unwrap_err();
        assert!(matches!(err, SimError::InvariantViolation(_)));
    }
}
