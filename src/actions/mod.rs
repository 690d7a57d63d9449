//! Actions: reusable units of work with declared inputs, outputs and
//! a node or docker runtime
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`schema`] | `action.yml` parsing (`ActionSpec`, `Runs`, `Parameter`) |
//! | [`plan`] | Materialise an action into a schedulable [`crate::runner::plan::Plan`] |
//! | [`input_handler`] | `INPUT_*` env derivation with required-parameter checks |
//! | [`output_handler`] | `::set-output` capture + ACTION_RUN_SUMMARY enforcement |
//! | [`remote`] | Download of known remote actions |

pub mod input_handler;
pub mod output_handler;
pub mod plan;
pub mod remote;
pub mod schema;

pub use input_handler::ActionInputHandler;
pub use output_handler::{ActionOutputHandler, CapturedOutputs, ACTION_RUN_SUMMARY};
pub use plan::{new_action_plan, ActionPlanParams};
pub use schema::{ActionSpec, Parameter, Runs, UsingType};
