//! The intelligence pipeline: everything that turns raw positions into
//! passenger-facing estimates. The engines are pure given their inputs; the
//! only shared state is the per-route traffic smoothing map and whatever
//! lives in the cache (speed samples, reliability counters).

pub mod confidence;
pub mod eta;
pub mod reliability;
pub mod speed_memory;
pub mod suggestions;
pub mod traffic;

pub use confidence::{ConfidenceInput, ConfidenceLabel, ConfidenceScore};
pub use eta::{EtaEngine, EtaEstimate, EtaRequest};
pub use reliability::{ReliabilityLabel, ReliabilityScore, ReliabilityTracker};
pub use speed_memory::SpeedMemory;
pub use suggestions::{rank_suggestions, Suggestion, SuggestionCandidate};
pub use traffic::{CongestionLevel, TrafficLevel, TrafficModel};

/// Floor applied wherever a speed could reach zero and divide an ETA.
pub const MIN_SPEED_KMH: f64 = 5.0;
