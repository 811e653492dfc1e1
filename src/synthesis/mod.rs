//! Answer synthesis: grounding prompts, the NDJSON event protocol, and the
//! consumer-side reconciler.

pub mod events;
pub mod prompt;
pub mod reconciler;
pub mod registry;
pub mod service;

pub use events::SynthesisEvent;
pub use reconciler::{StreamReconciler, StreamState};
pub use registry::ActiveStreams;
pub use service::{SynthesisOptions, SynthesisService};
