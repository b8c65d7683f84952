use thiserror::Error;

/// Failures of the link itself. Each one ends the worker that owns the handle.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("open serial {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("link I/O: {0}")]
    Transport(#[from] std::io::Error),

    #[error("link closed")]
    Closed,
}
