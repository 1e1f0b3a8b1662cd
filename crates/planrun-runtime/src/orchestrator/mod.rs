//! Plan activation and the per-iteration state machine.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `orchestrator` | Public entry point: activate, subscribe, delete, and the iteration driver |
//! | `iteration` | One iteration from registry check to listener hand-off |
//! | `stage` | Pure stage classification |
//! | `budget` | Token budget check and conversation fitting |
//! | `listener` | Default reply stream consumer and reply parser |
//! | `prompts` | Minimal prompt templates |
//!
//! ## Driver loop
//!
//! iteration 0 → listener outcome → `Continue` runs the next iteration with
//! fresh parameters; `Finished` and `Failed` deliver the single terminal
//! outcome; cancellation ends the loop without one.

pub mod budget;
pub mod iteration;
pub mod listener;
#[allow(clippy::module_inception)]
pub mod orchestrator;
pub mod prompts;
pub mod stage;
