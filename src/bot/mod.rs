pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::TradeExecutor;
pub use metrics::SessionMetrics;
pub use orchestrator::SwapBot;
pub use scheduler::{
    stop_channel, Decision, Phase, ScheduleController, SessionState, SkipReason, StopHandle,
    StopSignal, TickOutcome,
};
pub use timer::{Timer, TokioTimer};
