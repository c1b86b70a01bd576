use std::ops::Range;

/// Problems with how something was configured.
///
/// These only come out of constructors and config parsing; nothing retries them.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported pool behavior {0:?}; expected \"grow\" or \"fixed\"")]
    UnsupportedPoolBehavior(String),

    #[error("Unable to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A panic captured from one chunk of a partitioned call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    /// Which chunk, counting from 0 in input order.
    pub chunk: usize,

    /// The part of the input that chunk covered.
    pub range: Range<usize>,

    /// The panic payload, if it was a string.  Otherwise a placeholder.
    pub message: String,
}

impl std::fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk {} ({}..{}) panicked: {}",
            self.chunk, self.range.start, self.range.end, self.message
        )
    }
}

/// Every fault from one partitioned call, in the order the chunks finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFaults {
    /// The first chunk to fault.
    pub first: WorkerFault,

    /// Any chunks which faulted after the first.
    pub others: Vec<WorkerFault>,
}

impl WorkerFaults {
    pub(crate) fn from_vec(mut faults: Vec<WorkerFault>) -> Option<WorkerFaults> {
        if faults.is_empty() {
            return None;
        }

        let first = faults.remove(0);
        Some(WorkerFaults {
            first,
            others: faults,
        })
    }

    /// How many chunks faulted in total.
    pub fn len(&self) -> usize {
        1 + self.others.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerFault> {
        std::iter::once(&self.first).chain(self.others.iter())
    }
}

impl std::fmt::Display for WorkerFaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first)?;
        if !self.others.is_empty() {
            write!(f, " (and {} more faulted chunks)", self.others.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, derive_more::Display, derive_more::IsVariant)]
enum ErrorPayload {
    #[display(fmt = "Configuration error: {}", _0)]
    Config(ConfigError),

    #[display(fmt = "Worker fault: {}", _0)]
    WorkerFault(WorkerFaults),
}

#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct Error {
    payload: ErrorPayload,
}

macro_rules! conv {
    ($variant: ident, $from_err: path) => {
        impl From<$from_err> for Error {
            fn from(value: $from_err) -> Error {
                Error {
                    payload: ErrorPayload::$variant(value),
                }
            }
        }
    };
}

conv!(Config, ConfigError);
conv!(WorkerFault, WorkerFaults);

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(value: rayon::ThreadPoolBuildError) -> Error {
        ConfigError::from(value).into()
    }
}

impl Error {
    /// Did this come from bad configuration?
    pub fn is_config(&self) -> bool {
        self.payload.is_config()
    }

    /// Did a worker panic during a partitioned call?
    pub fn is_worker_fault(&self) -> bool {
        self.payload.is_worker_fault()
    }

    /// The faults behind this error, if it is a worker fault.
    pub fn worker_faults(&self) -> Option<&WorkerFaults> {
        match &self.payload {
            ErrorPayload::WorkerFault(f) => Some(f),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
