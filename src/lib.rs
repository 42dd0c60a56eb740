// Core pipeline for the Aadhaar district activity dashboard: dataset
// merging, name reconciliation, metric derivation, anomaly detection and
// geographic linking. Serving and rendering live outside this crate; the
// tables produced here are their inputs.
pub mod anomaly;
pub mod cluster;
pub mod dataset;
pub mod error;
pub mod geo;
pub mod metrics;
pub mod normalize;
pub mod output;
pub mod patterns;
pub mod pipeline;
pub mod types;
pub mod util;
