//! Request-pair analyzer and swap-request templating engine.
//!
//! Given two HTTP request/response pairs captured from two different
//! authenticated sessions performing the same navigation, this crate
//! decides whether the pair is worth probing for broken access control,
//! identifies which differing fields look like identity or identifier
//! values, builds a parameterized request template out of the pair, and
//! enumerates a bounded set of substitution configurations a replay worker
//! can execute.
//!
//! [`candidate::process_candidate`] is the entry point; everything else is
//! a stage in its pipeline (diff, classify, unify, template, enumerate).

pub mod body;
pub mod candidate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod normalize;
pub mod patterns;
pub mod request;
pub mod swap_request;
pub mod template;

pub use body::{BodyEncoding, BodyInstance, BodyValue};
pub use candidate::{process_candidate, CandidateOutcome, ResultCode, SwapConfig};
pub use classifier::{identity_keywords, should_swap, IdentityFields};
pub use config::{AnalyzerConfig, PatternFilesConfig, Rules};
pub use error::{AnalyzerError, Result};
pub use patterns::{Mode, PatternList};
pub use request::{diff_instances, FieldDiff, Location, RequestInstance};
pub use swap_request::{RenderedRequest, SwapRequest, SwapRequestTemplate, SwapVariableSpec};
pub use template::{BodyTemplate, DictTemplate, IntegerTemplate, ListTemplate, Segment, StringTemplate, TemplateNode};
