//! Application Services
//!
//! - [`IngestionEngine`]: owns the active transport and the tracked set
//! - [`PollingTransport`] / [`StreamingTransport`]: the two interchangeable transports
//! - [`FlushScheduler`]: drains the tick buffer into the store
//! - [`PriceRecorder`]: idempotent per-day price writes with an existence cache
//! - [`RetentionPruner`]: deletes history past the retention horizon

mod backoff;
mod flush;
mod liveness;
mod polling;
mod recorder;
mod registry;
mod resolver;
mod retention;
mod streaming;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use flush::{FlushReport, FlushScheduler};
pub use liveness::{LivenessConfig, LivenessEvent, LivenessState, LivenessWatchdog};
pub use polling::{CycleReport, PollingConfig, PollingTransport};
pub use recorder::{ExistenceCache, PriceRecorder, WriteOutcome};
pub use registry::{EngineConfig, EngineDependencies, IngestionEngine};
pub use resolver::SymbolResolver;
pub use retention::RetentionPruner;
pub use streaming::{StreamingConfig, StreamingTransport};
