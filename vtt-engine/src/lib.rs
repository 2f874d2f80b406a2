//! Evaluation session engine for blinded visual Turing tests.
//!
//! Raters judge a randomized stream of images, either classifying each one
//! as real or synthetic or scoring features on a 1..=5 scale. The engine
//! owns everything between "here are some image pools" and "here are the
//! statistics":
//!
//! - **Sampling** ([`Sampler`]) draws a bounded, shuffled [`EvaluationSequence`]
//! - **Session** ([`EvaluationSession`]) presents it one item at a time
//! - **Store** ([`ResponseStore`]) rewrites the result log after every response
//!   and mirrors it to an optional [`MirrorTarget`]
//! - **Metrics** ([`metrics`]) computes accuracy figures and inter-rater kappa
//!
//! Presentation, image decoding and remote credentials live outside this
//! crate, behind the [`ImageSource`] and [`MirrorTarget`] traits.

pub mod config;
mod error;
pub mod metrics;
mod pool;
mod report;
mod response;
mod sampler;
mod session;
pub mod store;
mod types;

pub use error::{Error, Result};

// Pools and sampling
pub use pool::{DirectoryImageSource, ImageClass, ImageItem, ImagePool, ImageSource, SourceEntry};
pub use sampler::{DEFAULT_MAX_PER_LABEL, EvaluationSequence, Sampler, sample};

// Responses
pub use response::{
    ClassificationResponse, EvaluationMode, RatingResponse, ResponsePayload, ResponseRecord,
    SCORE_MAX, SCORE_MIN, Score,
};

// Session
pub use session::{
    EvaluationSession, Lifecycle, PersistenceSettings, ResponseTally, SessionState,
    result_file_name,
};

// Persistence
pub use store::{
    AppendOutcome, DirectoryMirror, MirrorSettings, MirrorTarget, PersistenceWarning, RemoteId,
    ResponseStore,
};

// Reporting
pub use report::{FinalReport, ReportMetrics};

// Config
pub use config::{ConfigLoader, StudyConfig};

// ID types
pub use types::{ItemId, RaterId, SessionId};
