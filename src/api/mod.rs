//! Purpose: Public client surface for the recommendation service.
//! Exports: `ThothClient`, analysis model types, and submission options.
//! Role: Stable boundary used by the CLI; hides wire envelopes.
//! Invariants: Wire envelope structs stay private to this module tree.

mod analysis;
mod remote;
mod request;

pub use analysis::{AnalysisKind, AnalysisOutcome, AnalysisReport, AnalysisStatus, PollPolicy};
pub use remote::ThothClient;
pub use request::{
    AdviseOptions, ImageAnalysisOptions, ProvenanceOptions, resolve_recommendation_type,
};
