//! Command/query dispatch.
//!
//! 1. **Operations** (`operation`): typed intents with their output type
//! 2. **Handlers** (`handler`): one authoritative handler per operation, plus query decorators
//! 3. **Registry** (`registry`): built once at startup, read-only afterwards
//! 4. **Bus** (`bus`): sequential, fail-fast dispatch against a context
//! 5. **Domain** (`domain`): notification and post handlers
//! 6. **Background workers** (`worker`): tasks run on contexts derived from their origin

pub mod bus;
pub mod config;
pub mod domain;
pub mod handler;
pub mod operation;
pub mod registry;
pub mod worker;

// Re-export key types for convenient access.
pub use bus::{Batch, Bus};
pub use config::BusConfig;
pub use handler::{Decorator, Handler};
pub use operation::{Operation, OperationKind};
pub use registry::{HandlerRegistry, RegistryBuilder};
pub use worker::{BackgroundRunnable, BackgroundWorker, Job, Task, TaskRunner, WorkerStats};
