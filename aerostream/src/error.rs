use thiserror::Error;

/// Stream Source failure modes. `Timeout` and `Demux` both drive the
/// consecutive-error counter in [`crate::source`]; `ReconnectExhausted` is
/// fatal and propagates to `main`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("demux error: {0}")]
    Demux(String),
    #[error("transport timeout")]
    Timeout,
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Top-level pipeline failure. Anything that reaches `main` as an `Err`
/// stops the process with a non-zero exit code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("encoder sink start-up failed: {0}")]
    EncoderStartup(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Tactical Dispatcher connection/transmit failures. These never propagate
/// out of the actor task — they only change internal `ready`/`connected`
/// state and increment the drop counter (see `SourceError`'s "never
/// propagate to the output stage" policy in the error taxonomy).
#[derive(Debug, Error)]
pub enum TacticalError {
    #[error("tls error: {0}")]
    Tls(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dispatcher not ready")]
    NotReady,
}
