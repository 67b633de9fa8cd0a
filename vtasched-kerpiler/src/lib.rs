//! Schedule lowering for packed conv2d and fused elementwise kernels on a
//! tensor accelerator with input, weight and accumulator scratchpads.

pub mod classify;
pub mod env;
pub mod error;
pub mod ker;
pub mod pre;
pub mod space;
pub mod strategy;
pub mod stream_ir;

#[cfg(test)]
mod testing;

pub use error::{Result, ScheduleError};
pub use strategy::*;
