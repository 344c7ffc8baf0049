//! Callback bus connecting the registry, the grid index and milestone hooks

pub mod callbacks;

pub use callbacks::{callback, Callback, CallbackChannel, CallbackSuite};
