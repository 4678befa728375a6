//! Shared state primitives for the remcon agent.
//!
//! - [`state_machine::StateMachine`]: mutex-guarded state with closure transitions.
//! - [`session_state::SessionState`]: the process-wide console session (mode, working
//!   directory, running flag) shared by the router and the lifecycle controller.

pub mod session_state;
pub mod state_machine;

pub use session_state::{Mode, SessionState, SessionStateError};
pub use state_machine::StateMachine;
