//! Actions and the premises that record them

pub mod catalog;
pub mod premise;

pub use catalog::{invoke_action, Action, ActionResult};
pub use premise::{ActionPremise, ActionPremiseIteration};
