//! Runtime core: orchestration and lifecycle.
//!
//! The public API of this module is [`Supervisor`] (built with
//! [`SupervisorBuilder`]) plus its [`Config`].
//!
//! Internal modules:
//! - [`supervisor`]: spawns multiplier tasks, runs the broadcast stop protocol;
//! - [`builder`]: validates the task set and assembles the supervisor;
//! - [`alive`]: tracks which tasks are running, to name stuck ones on shutdown;
//! - [`counter`]: process-wide diagnostic pulse counter;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod alive;
mod builder;
mod config;
mod counter;
mod shutdown;
mod supervisor;

pub use alive::AliveTracker;
pub use builder::SupervisorBuilder;
pub use config::{Config, DEFAULT_CONTROL_CHANNEL};
pub use counter::PulseCounter;
pub use supervisor::Supervisor;
