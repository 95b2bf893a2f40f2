//! Session lifecycle and skill orchestration.
//!
//! - [`lifecycle`]: the `none -> active <-> suspended -> ended` state
//!   machine, with the single-active-session invariant.
//! - [`dispatcher`]: stateless selection of a skill (protocol) for a task.
//! - [`spawn`]: assembly of the spawn prompt for a selected skill.

pub mod dispatcher;
pub mod lifecycle;
pub mod spawn;

pub use dispatcher::{dispatch_skill, SkillCategory, SkillDef};
pub use lifecycle::SessionEvent;
pub use spawn::{prepare_spawn, SpawnPlan};
