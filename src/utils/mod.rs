//! Process-level helpers shared by the binary and the service.

pub mod bootstrap;
pub mod retry;
