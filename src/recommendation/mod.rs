//! Geometry-driven manufacturing method recommendations

pub mod engine;
pub mod rules;

pub use engine::{MethodRecommendation, RecommendationEngine};
pub use rules::{profile, MethodProfile};
