//! API routes.

pub mod memory;
pub mod orchestration;
