pub mod bootstrap;
pub mod cooldown;
pub mod dispatcher;
pub mod retry;
pub mod signals;
pub mod symbol_store;

pub use cooldown::CooldownGate;
pub use dispatcher::{Dispatcher, DispatcherSettings, DispatcherStats, EventOutcome};
pub use retry::RetryPolicy;
pub use signals::SignalEngine;
pub use symbol_store::{StoreError, SymbolHistory, SymbolStore};
