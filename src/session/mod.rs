//! The session engine.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────┐        ┌───────────────┐
//!  │ SessionRegistry │──owns──▶ SessionActor  │  (one per session, a tokio task)
//!  │  (ID → Handle)  │        │  owns history │
//!  └────────┬────────┘        │  and totals,  │
//!           │                 │  serializes   │
//!           │ clone           │  mutations    │
//!           ▼                 └───────▲───────┘
//!  ┌─────────────────┐                │ mpsc commands
//!  │  SessionHandle  │────────────────┘
//!  └─────────────────┘
//! ```
//!
//! - **SessionActor** owns mutable session state; commands are processed
//!   sequentially so no lock is held across an await point.
//! - **SessionHandle** is a cloneable sender; all other code goes through it.
//! - **SessionRegistry** maps IDs to handles and manages actor lifecycle,
//!   including the idle-eviction sweep.
//! - **run_turn** drives one user turn through the model/tool loop and
//!   appends the finished [`Turn`] to the session.

mod actor;
mod actor_types;
mod handle;
mod registry;
mod turn;
mod turn_loop;

pub use actor_types::{SessionError, SessionMetadata};
pub use handle::SessionHandle;
pub use registry::SessionRegistry;
pub use turn::{Step, Turn, TurnFailure, TurnOutcome, UserMessage};
pub use turn_loop::{run_turn, FailureKind, TurnContext, TurnEvent, TurnOptions};
