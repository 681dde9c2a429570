//! Error taxonomy shared by the context, the bus, and every handler.

use std::panic::Location;

/// Coarse classification callers use to map failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Registration bugs and unscoped persistence access. Never retried.
    Configuration,
    /// Missing entity, or an entity the caller does not own.
    NotFound,
    /// The operation needs an authenticated user and none is bound.
    Unauthorized,
    /// Failure reported by the persistence collaborator.
    Persistence,
    /// The context's cancellation signal fired. Not a business failure.
    Cancelled,
}

/// Errors surfaced by dispatch and by operation handlers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("no handler registered for operation `{type_name}`")]
    HandlerNotFound { type_name: &'static str },
    #[error("operation `{type_name}` already has an authoritative handler")]
    DuplicateHandler { type_name: &'static str },
    #[error("decorators are only allowed on queries, `{type_name}` is a command")]
    DecoratorOnCommand { type_name: &'static str },
    #[error("facility not registered: `{type_name}`")]
    FacilityNotRegistered { type_name: &'static str },
    #[error("persistence access without a bound tenant")]
    Unscoped,
    #[error("operation requires an authenticated user")]
    Unauthenticated,
    #[error("operation cancelled")]
    Cancelled,
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
    #[error("{source} (at {location})")]
    Traced {
        #[source]
        source: Box<Error>,
        location: &'static Location<'static>,
    },
}

impl Error {
    /// Wrap with the caller's location. Already-traced errors are returned unchanged.
    #[must_use]
    #[track_caller]
    pub fn traced(self) -> Self {
        match self {
            traced @ Self::Traced { .. } => traced,
            other => Self::Traced {
                source: Box::new(other),
                location: Location::caller(),
            },
        }
    }

    /// The error beneath any provenance wrapper.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Traced { source, .. } => source.root(),
            other => other,
        }
    }

    /// Where the error was funnelled through `Context::fail`, if it was.
    #[must_use]
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Traced { location, .. } => Some(location),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthenticated => ErrorKind::Unauthorized,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::HandlerNotFound { .. }
            | Self::DuplicateHandler { .. }
            | Self::DecoratorOnCommand { .. }
            | Self::FacilityNotRegistered { .. }
            | Self::Unscoped
            | Self::Traced { .. } => ErrorKind::Configuration,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
