// # rotodns-core
//
// Core library for scheduled DNS record rotation.
//
// ## Architecture Overview
//
// - **Config store**: one validated JSON document owning accounts, zone
//   references, rotation jobs, and traffic triggers
// - **State store**: crash-safe per-job rotation state (last firing,
//   cursor, failure streak) and per-trigger period markers
// - **Rotation algorithms**: three pure selection functions (single
//   pick, sliding pool window, cyclic shuffle)
// - **Evaluator**: dispatches a due job to its algorithm and emits a
//   concrete update plan
// - **Engine**: the tick driver; serializes work per account, applies
//   updates through the provider, persists state after every firing
// - **Trigger evaluator**: traffic-limit alerts with at-most-one firing
//   per period
//
// ## Design Principles
//
// 1. **Injected collaborators**: the provider client, state store,
//    clock, and usage source are trait objects handed to the engine, so
//    tests drive everything deterministically
// 2. **Pure decisions, I/O at the edges**: selection arithmetic never
//    touches the network or the clock
// 3. **Durable cadence**: state is persisted after each successful
//    firing, so restarts neither duplicate nor hurry a rotation
// 4. **Classified failures**: every provider error is pre-sorted into
//    the retry/quarantine taxonomy before the engine sees it

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod rotation;
pub mod state;
pub mod traits;
pub mod trigger;

// Re-export the types most integrations need
pub use config::{Account, Agent, ConfigStore, Job, JobKind, RecordType, Trigger, TriggerWindow, Zone};
pub use engine::{EngineOptions, RotationEngine, TickSummary};
pub use error::{Error, FaultKind, Result};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{
    Clock, DnsProvider, JobState, Record, StateStore, SystemClock, TokenVerification,
    UsageReport, UsageSource,
};
