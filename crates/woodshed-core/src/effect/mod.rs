//! Processing-chain effect stages.

mod clipper;
mod gain;

pub use clipper::SafetyClipper;
pub use gain::SmoothedGain;
