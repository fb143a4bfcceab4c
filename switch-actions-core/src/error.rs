use thiserror::Error;

/// Errors surfaced by the action execution engine.
///
/// `OutOfMemory`, `Loop` and `Inval` are the three kinds a control plane
/// and tests observe. `Inval` is never constructed by this crate — it is
/// reserved for a
/// validation layer that sits in front of the engine — but the variant is
/// kept so callers can match on a stable, complete error enum.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("packet loop detected")]
    Loop,

    #[error("invalid action list")]
    Inval,

    #[error("external collaborator error: {0}")]
    Collaborator(String),

    #[error("malformed action list: {0}")]
    MalformedActions(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
