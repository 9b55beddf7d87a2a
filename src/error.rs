use thiserror::Error;

/// Faults raised while applying a frame to a tracker.
///
/// Points pushed before the fault stay in their buffers.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("device {device} reported stats without the {attribute:?} attribute")]
    MissingAttribute {
        device: String,
        attribute: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed stats frame: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: FrameError,
    },
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
#[error("unknown series {0:?}")]
pub struct UnknownSeries(pub String);
