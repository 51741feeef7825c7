//! Form entry queue processing.
//!
//! [`ProcessorLoop`] drains a [`QueueStore`] of XML form submissions. Each
//! submission is matched to its form, transformed to HL7 with the form's
//! stylesheet and handed to a [`MessageSink`]; the entry is then archived.
//! Submissions that cannot be matched or transformed go to the [`ErrorSink`].
//! Every queued entry ends in exactly one of the two.

pub mod engine;
pub mod error;
pub mod memory;
pub mod payload;
pub mod ports;
pub mod processor;
pub mod resolver;
pub mod router;

pub use engine::{TransformEngine, XsltEngine};
pub use error::{BuildError, ProcessError, StoreError, TransformError};
pub use payload::{PayloadInfo, parse_payload};
pub use ports::{
    ArchiveSink, ConfigStore, DrainLease, DrainLock, ErrorSink, FormResolver, MessageSink,
    QueueStore, SourceRegistry,
};
pub use processor::{
    DEFAULT_CREATOR, DEFAULT_SOURCE_NAME, DEFAULT_SOURCE_PROPERTY, DrainOutcome, DrainReport,
    NextOutcome, ProcessorLoop, ProcessorLoopBuilder, QueueStatus,
};
pub use resolver::CachingFormResolver;
pub use router::{Router, dedup_key};
