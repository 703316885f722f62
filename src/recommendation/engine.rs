use serde::Serialize;
use tracing::{debug, info};

use crate::error::FabError;
use crate::geometry::{GeometryFeatureSet, Tolerance};
use crate::recommendation::rules::{profile, MethodProfile, Note, PROFILES};
use crate::workflow::Method;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodRecommendation {
    pub method: Method,
    pub confidence: f64,
    pub reasoning: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub estimated_cost: f64,
    pub estimated_time: String,
    pub material_suggestion: String,
}

/// Scores every manufacturing method against a part's geometry.
///
/// Stateless; one engine can serve concurrent callers.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine {
    profiles: &'static [&'static MethodProfile],
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationEngine {
    pub fn new() -> Self {
        Self {
            profiles: &PROFILES,
        }
    }

    /// One recommendation per method, highest confidence first.
    ///
    /// Equal confidences keep the fixed order FDM, SLS, CFC, CNC.
    pub fn evaluate(
        &self,
        features: &GeometryFeatureSet,
    ) -> Result<Vec<MethodRecommendation>, FabError> {
        features.validate()?;

        let mut ranked: Vec<MethodRecommendation> = self
            .profiles
            .iter()
            .map(|profile| score(profile, features))
            .collect();
        // Stable sort over profiles already in tie-break order
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        if let Some(top) = ranked.first() {
            info!(
                method = %top.method,
                confidence = top.confidence,
                "Top manufacturing recommendation"
            );
        }
        Ok(ranked)
    }

    /// Recommendation for a single method.
    pub fn evaluate_method(
        &self,
        features: &GeometryFeatureSet,
        method: Method,
    ) -> Result<MethodRecommendation, FabError> {
        features.validate()?;
        Ok(score(profile(method), features))
    }
}

fn score(profile: &MethodProfile, features: &GeometryFeatureSet) -> MethodRecommendation {
    let mut confidence = profile.base_confidence;
    let mut pros = Vec::new();
    let mut cons = Vec::new();

    if features.fits_within(profile.envelope) {
        confidence += profile.fits.delta;
        record(profile.fits.note, &mut pros, &mut cons);
    } else {
        confidence += profile.exceeds.delta;
        record(profile.exceeds.note, &mut pros, &mut cons);
        if let Some(short) = profile.short_circuit {
            debug!(method = %profile.method, "Part exceeds envelope, skipping remaining rules");
            return MethodRecommendation {
                method: profile.method,
                confidence: short.confidence,
                reasoning: short.reasoning.to_string(),
                pros: vec![short.pro.to_string()],
                cons,
                estimated_cost: 0.0,
                estimated_time: "N/A".to_string(),
                material_suggestion: "N/A".to_string(),
            };
        }
    }

    for rule in profile.rules {
        if let Some(effect) = rule.effect(features) {
            confidence += effect.delta;
            record(effect.note, &mut pros, &mut cons);
        }
    }

    pros.extend(profile.always_pros.iter().map(|text| text.to_string()));
    cons.extend(profile.always_cons.iter().map(|text| text.to_string()));

    MethodRecommendation {
        method: profile.method,
        confidence: confidence.clamp(0.0, 1.0),
        reasoning: reasoning(features, profile.method, confidence),
        pros,
        cons,
        estimated_cost: estimate_cost(profile, features),
        estimated_time: profile.turnaround.to_string(),
        material_suggestion: profile.material.to_string(),
    }
}

fn record(note: Note, pros: &mut Vec<String>, cons: &mut Vec<String>) {
    match note {
        Note::Pro(text) => pros.push(text.to_string()),
        Note::Con(text) => cons.push(text.to_string()),
    }
}

pub fn rating(confidence: f64) -> &'static str {
    if confidence > 0.7 {
        "Highly recommended"
    } else if confidence > 0.5 {
        "Good fit"
    } else if confidence > 0.3 {
        "Possible but not ideal"
    } else {
        "Not recommended"
    }
}

fn reasoning(features: &GeometryFeatureSet, method: Method, confidence: f64) -> String {
    let [x, y, z] = features.bounding_box;
    let mut text = format!(
        "{} for {}. Part dimensions: {x:.1} × {y:.1} × {z:.1} mm, volume: {:.2} cm³.",
        rating(confidence),
        method.label(),
        features.volume_cm3()
    );
    if features.has_overhangs {
        text.push_str(" Has overhangs.");
    }
    if features.has_complex_geometry {
        text.push_str(" Complex geometry detected.");
    }
    if features.tolerance == Tolerance::Tight {
        text.push_str(" Tight tolerances required.");
    }
    text
}

/// `(base_fee + volume_cm3 * rate) * (1 + complexity / 2)`, rounded to cents.
pub fn estimate_cost(profile: &MethodProfile, features: &GeometryFeatureSet) -> f64 {
    let raw = (profile.base_fee + features.volume_cm3() * profile.rate_per_cm3)
        * (1.0 + features.complexity_score * 0.5);
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceFinish;
    use crate::recommendation::rules::{CNC_PROFILE, FDM_PROFILE};

    fn example_part() -> GeometryFeatureSet {
        GeometryFeatureSet {
            bounding_box: [80.0, 60.0, 40.0],
            volume: 150_000.0,
            surface_area: 25_000.0,
            has_overhangs: false,
            min_wall_thickness: 2.5,
            complexity_score: 0.6,
            has_internal_cavities: true,
            tolerance: Tolerance::Standard,
            ..Default::default()
        }
    }

    #[test]
    fn test_example_part_prefers_sls_then_fdm() {
        let ranked = RecommendationEngine::new().evaluate(&example_part()).unwrap();
        let order: Vec<Method> = ranked.iter().map(|r| r.method).collect();
        assert_eq!(order, vec![Method::Sls, Method::Fdm, Method::Cfc, Method::Cnc]);

        assert_eq!(ranked[0].confidence, 1.0);
        assert!((ranked[1].confidence - 0.8).abs() < 1e-9);
        for rec in &ranked {
            assert!(rec.pros.iter().any(|p| p.starts_with("Fits within")), "{:?}", rec.method);
        }
    }

    #[test]
    fn test_reasoning_mentions_dimensions_and_flags() {
        let features = GeometryFeatureSet {
            has_overhangs: true,
            has_complex_geometry: true,
            tolerance: Tolerance::Tight,
            ..example_part()
        };
        let rec = RecommendationEngine::new()
            .evaluate_method(&features, Method::Fdm)
            .unwrap();
        assert!(rec
            .reasoning
            .contains("Part dimensions: 80.0 × 60.0 × 40.0 mm, volume: 150.00 cm³."));
        assert!(rec.reasoning.contains("Has overhangs."));
        assert!(rec.reasoning.contains("Complex geometry detected."));
        assert!(rec.reasoning.ends_with("Tight tolerances required."));
    }

    #[test]
    fn test_cnc_envelope_short_circuit() {
        let features = GeometryFeatureSet {
            bounding_box: [450.0, 100.0, 100.0],
            tolerance: Tolerance::Tight,
            surface_roughness: SurfaceFinish::High,
            ..example_part()
        };
        let rec = RecommendationEngine::new()
            .evaluate_method(&features, Method::Cnc)
            .unwrap();
        assert_eq!(rec.confidence, 0.1);
        assert!(rec.reasoning.contains("exceeds CNC work envelope"));
        assert_eq!(rec.pros, vec!["Best accuracy".to_string()]);
        assert_eq!(rec.cons, vec!["Exceeds CNC work envelope".to_string()]);
        assert_eq!(rec.estimated_cost, 0.0);
        assert_eq!(rec.estimated_time, "N/A");
    }

    #[test]
    fn test_fdm_oversize_is_penalized_not_short_circuited() {
        let features = GeometryFeatureSet {
            bounding_box: [300.0, 100.0, 100.0],
            ..example_part()
        };
        let rec = RecommendationEngine::new()
            .evaluate_method(&features, Method::Fdm)
            .unwrap();
        assert!(rec.cons.contains(&"Exceeds FDM build volume".to_string()));
        assert!(rec.pros.contains(&"Most cost-effective option".to_string()));
        assert!((rec.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_cost_estimate() {
        let features = example_part();
        // (10 + 150 * 0.05) * 1.3
        assert_eq!(estimate_cost(&FDM_PROFILE, &features), 22.75);
        // (100 + 150 * 0.5) * 1.3
        assert_eq!(estimate_cost(&CNC_PROFILE, &features), 227.5);
    }

    #[test]
    fn test_rating_buckets() {
        assert_eq!(rating(0.71), "Highly recommended");
        assert_eq!(rating(0.7), "Good fit");
        assert_eq!(rating(0.5), "Possible but not ideal");
        assert_eq!(rating(0.3), "Not recommended");
    }

    #[test]
    fn test_invalid_geometry_rejected_before_scoring() {
        let features = GeometryFeatureSet {
            volume: -5.0,
            ..Default::default()
        };
        let err = RecommendationEngine::new().evaluate(&features).unwrap_err();
        assert!(matches!(err, FabError::Validation(_)));
    }
}
