pub mod assignment;
pub mod client;
pub mod common;
pub mod encoding;
pub mod error;
pub mod pool;
pub mod probe;
pub mod settings;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod transport;
pub mod verifier;
pub mod worker;

pub use assignment::{AssignmentSource, Assignments};
pub use client::RetrievalClient;
pub use error::{DownloadError, DynError, RetrievalError};
pub use settings::{ConfigError, RetrievalSettings};
pub use worker::{RetrievalBackends, RetrievalRequest, RetrievalWorker};
