//! The foreman orchestration engine.
//!
//! Given a roster of roles with dependencies, the engine spawns one
//! external worker process per role in dependency order, keeps each alive
//! through a heartbeat contract, restarts stalls with checkpoint-derived
//! recovery context, and escalates once the retry budget runs out. All
//! state lives in the `foreman-db` store; observers watch the event plane.
//!
//! Components are constructed explicitly in dependency order: store, state
//! manager, resolver, bus, heartbeat monitor, checkpoint service, spawner,
//! timeout handler, supervisor, event publisher. Each receives its
//! collaborators by parameter; there is no global registry.

pub mod bus;
pub mod checkpoint;
pub mod config;
pub mod events;
pub mod facade;
pub mod heartbeat;
pub mod notify;
pub mod resolver;
pub mod roster;
pub mod spawner;
pub mod state;
pub mod supervisor;
pub mod timeout;
