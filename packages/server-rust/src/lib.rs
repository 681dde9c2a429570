//! `tenantbus` server: the command/query bus, domain handlers, storage and
//! background workers for a multi-tenant feedback application.

pub mod app;
pub mod logging;
pub mod service;
pub mod storage;

pub use app::{App, AppBuilder, Worker};
pub use logging::LogFormat;
pub use service::{Bus, BusConfig, Operation, OperationKind, Task};
pub use storage::MemoryStore;
