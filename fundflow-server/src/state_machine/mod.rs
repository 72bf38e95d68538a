//! Explicit state machine for the fund request lifecycle.
//!
//! The design separates:
//! - **State**: the stored request and its reviews (`RequestSnapshot`)
//! - **Events**: what a user did (`Event`)
//! - **Effects**: what must be written or logged (`Effect`)
//! - **Transition**: pure function `(Snapshot, Context, Event) -> (Request, Vec<Effect>)`
//!
//! The interpreter applies effects to a `WorkflowRepository`; the engine
//! wires loading, locking, transition and interpretation together.

pub mod effect;
pub mod engine;
pub mod event;
pub mod interpreter;
pub mod repository;
pub mod state;
pub mod transition;

pub use effect::*;
pub use engine::*;
pub use event::*;
pub use interpreter::{EngineStats, EngineStatsSnapshot, StoreRetry};
pub use state::*;
pub use transition::{transition, Transition, TransitionResult};
