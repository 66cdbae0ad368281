pub mod hiring;
pub mod stepper;
pub mod store;

pub use hiring::{actions_for, HiringWorkflow, WorkFlowAction, WorkflowEvent, WorkflowStatus};
pub use stepper::WorkflowStepper;
pub use store::{WorkflowSpec, WorkflowStore};
