pub mod error;
pub mod notify;
pub mod queue;
pub mod results;
pub mod sim;

pub use error::SimError;
pub use notify::{FireEffects, NotifierAdapter, NotifyCtx, ShopEvent, ShopListener};
pub use queue::{EventId, EventPrio, EventQueue, SimTime};
pub use results::{ResultMap, ResultValue};
pub use sim::{SimEvent, SimState, Simulation};
