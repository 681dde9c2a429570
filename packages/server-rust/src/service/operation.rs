use std::fmt;

/// Whether an operation mutates state or only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Mutates persisted state. Exactly one handler, no decorators.
    Command,
    /// Reads state. One handler plus any number of decorators.
    Query,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of business intent dispatched through the bus.
///
/// The caller constructs the operation with its inputs, hands it to the bus,
/// and receives `Output` back. Operations are resolved by exact type.
pub trait Operation: Send + Sync + 'static {
    /// Value produced by the authoritative handler.
    type Output: Send + 'static;

    const KIND: OperationKind;

    /// Type name used in diagnostics.
    #[must_use]
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Implement [`Operation`] as a command.
#[macro_export]
macro_rules! command {
    ($op:ty => $output:ty) => {
        impl $crate::service::operation::Operation for $op {
            type Output = $output;
            const KIND: $crate::service::operation::OperationKind =
                $crate::service::operation::OperationKind::Command;
        }
    };
}

/// Implement [`Operation`] as a query.
#[macro_export]
macro_rules! query {
    ($op:ty => $output:ty) => {
        impl $crate::service::operation::Operation for $op {
            type Output = $output;
            const KIND: $crate::service::operation::OperationKind =
                $crate::service::operation::OperationKind::Query;
        }
    };
}
