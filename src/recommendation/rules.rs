//! Per-method scoring tables.
//!
//! Each method is described entirely by data: a base confidence, its machine
//! envelope, cost factors, and an ordered list of rules. A rule pairs a
//! geometric predicate with the confidence delta and pro/con line applied when
//! the predicate holds (`then`) or does not (`otherwise`).

use crate::geometry::{GeometryFeatureSet, SurfaceFinish, Tolerance};
use crate::workflow::Method;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Note {
    Pro(&'static str),
    Con(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    pub delta: f64,
    pub note: Note,
}

const fn pro(delta: f64, text: &'static str) -> Option<Effect> {
    Some(Effect {
        delta,
        note: Note::Pro(text),
    })
}

const fn con(delta: f64, text: &'static str) -> Option<Effect> {
    Some(Effect {
        delta,
        note: Note::Con(text),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub when: fn(&GeometryFeatureSet) -> bool,
    pub then: Option<Effect>,
    pub otherwise: Option<Effect>,
}

impl Rule {
    /// Effect this rule contributes for `features`, if any.
    pub fn effect(&self, features: &GeometryFeatureSet) -> Option<Effect> {
        if (self.when)(features) {
            self.then
        } else {
            self.otherwise
        }
    }
}

/// Result returned as-is when a part misses the envelope of a specialist method.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeShortCircuit {
    pub confidence: f64,
    pub reasoning: &'static str,
    pub pro: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodProfile {
    pub method: Method,
    pub base_confidence: f64,
    /// Largest part the method's machine accepts, x/y/z in mm
    pub envelope: [f64; 3],
    pub fits: Effect,
    pub exceeds: Effect,
    pub short_circuit: Option<EnvelopeShortCircuit>,
    pub rules: &'static [Rule],
    pub always_pros: &'static [&'static str],
    pub always_cons: &'static [&'static str],
    pub base_fee: f64,
    pub rate_per_cm3: f64,
    pub turnaround: &'static str,
    pub material: &'static str,
}

static FDM_RULES: &[Rule] = &[
    Rule {
        when: |f| !f.has_overhangs,
        then: pro(0.15, "No overhangs - minimal supports needed"),
        otherwise: con(-0.1, "Overhangs require support structures"),
    },
    Rule {
        when: |f| f.min_wall_thickness >= 1.2,
        then: pro(0.1, "Wall thickness suitable for FDM"),
        otherwise: con(-0.2, "Thin walls may be challenging with FDM"),
    },
    Rule {
        when: |f| f.complexity_score < 0.6,
        then: pro(0.15, "Simple geometry ideal for FDM"),
        otherwise: con(-0.05, "Complex geometry - may have visible layer lines"),
    },
    Rule {
        when: |f| f.tolerance == Tolerance::Loose,
        then: pro(0.1, "Tolerance requirements match FDM capabilities"),
        otherwise: None,
    },
    Rule {
        when: |f| f.tolerance == Tolerance::Tight,
        then: con(-0.15, "FDM may not achieve tight tolerances"),
        otherwise: None,
    },
];

static SLS_RULES: &[Rule] = &[
    Rule {
        when: |f| f.has_overhangs,
        then: pro(0.15, "No supports needed - powder acts as support"),
        otherwise: None,
    },
    Rule {
        when: |f| f.complexity_score > 0.5,
        then: pro(0.2, "Excellent for complex geometries"),
        otherwise: None,
    },
    Rule {
        when: |f| f.has_internal_features(),
        then: pro(0.15, "Can produce internal features without supports"),
        otherwise: None,
    },
    Rule {
        when: |f| f.min_wall_thickness >= 0.8,
        then: pro(0.1, "Wall thickness suitable for SLS"),
        otherwise: con(-0.1, "Very thin walls may be fragile"),
    },
    Rule {
        when: |f| f.complexity_score > 0.4,
        then: pro(0.1, "Good mechanical properties for functional testing"),
        otherwise: None,
    },
];

static CFC_RULES: &[Rule] = &[
    Rule {
        when: |f| f.complexity_score > 0.6 && f.surface_area > 10_000.0,
        then: pro(
            0.2,
            "Complex geometry with high surface area - ideal for fiber reinforcement",
        ),
        otherwise: None,
    },
    Rule {
        when: |f| f.tolerance == Tolerance::Tight,
        then: pro(0.15, "CFC can achieve tight tolerances with proper planning"),
        otherwise: None,
    },
    Rule {
        when: |f| f.min_wall_thickness >= 1.5,
        then: pro(0.1, "Wall thickness allows for fiber layers"),
        otherwise: con(-0.15, "Thin walls challenging for fiber reinforcement"),
    },
];

static CNC_RULES: &[Rule] = &[
    Rule {
        when: |f| f.tolerance == Tolerance::Tight,
        then: pro(0.25, "CNC excels at tight tolerances (±0.01mm possible)"),
        otherwise: None,
    },
    Rule {
        when: |f| f.surface_roughness == SurfaceFinish::High,
        then: pro(0.15, "Excellent surface finish capabilities"),
        otherwise: None,
    },
    Rule {
        when: |f| f.complexity_score > 0.7,
        then: con(-0.15, "High complexity increases machining time and cost"),
        otherwise: None,
    },
    Rule {
        when: |f| f.has_internal_cavities,
        then: con(-0.1, "Internal cavities require special tooling"),
        otherwise: None,
    },
    Rule {
        when: |f| f.complexity_score < 0.5,
        then: pro(0.15, "Simple geometry well-suited for CNC"),
        otherwise: None,
    },
];

pub static FDM_PROFILE: MethodProfile = MethodProfile {
    method: Method::Fdm,
    base_confidence: 0.5,
    envelope: [250.0, 210.0, 210.0],
    fits: Effect {
        delta: 0.1,
        note: Note::Pro("Fits within FDM build volume"),
    },
    exceeds: Effect {
        delta: -0.3,
        note: Note::Con("Exceeds FDM build volume"),
    },
    short_circuit: None,
    rules: FDM_RULES,
    always_pros: &["Fastest turnaround (same day)", "Most cost-effective option"],
    always_cons: &[],
    base_fee: 10.0,
    rate_per_cm3: 0.05,
    turnaround: "4-8 hours (same day)",
    material: "PLA or PETG",
};

pub static SLS_PROFILE: MethodProfile = MethodProfile {
    method: Method::Sls,
    base_confidence: 0.5,
    envelope: [350.0, 350.0, 600.0],
    fits: Effect {
        delta: 0.1,
        note: Note::Pro("Fits within SLS build volume"),
    },
    exceeds: Effect {
        delta: -0.3,
        note: Note::Con("Exceeds SLS build volume"),
    },
    short_circuit: None,
    rules: SLS_RULES,
    always_pros: &["No support structures needed", "Good surface finish"],
    always_cons: &[
        "Longer turnaround than FDM (1-2 days)",
        "Requires depowdering post-processing",
    ],
    base_fee: 30.0,
    rate_per_cm3: 0.15,
    turnaround: "1-2 days",
    material: "PA12 (Nylon)",
};

pub static CFC_PROFILE: MethodProfile = MethodProfile {
    method: Method::Cfc,
    base_confidence: 0.4,
    envelope: [320.0, 132.0, 154.0],
    fits: Effect {
        delta: 0.1,
        note: Note::Pro("Fits within CFC build volume"),
    },
    exceeds: Effect {
        delta: -0.4,
        note: Note::Con("Exceeds CFC build volume"),
    },
    short_circuit: Some(EnvelopeShortCircuit {
        confidence: 0.1,
        reasoning: "Part exceeds CFC build volume (320 × 132 × 154 mm); not suitable for fiber reinforcement",
        pro: "Highest strength possible",
    }),
    rules: CFC_RULES,
    always_pros: &["Highest strength-to-weight ratio", "End-use part quality"],
    always_cons: &[
        "Requires STEP file refinement and fiber planning",
        "Longest turnaround (2-3 days)",
        "Highest cost",
    ],
    base_fee: 80.0,
    rate_per_cm3: 0.40,
    turnaround: "2-3 days (includes fiber planning)",
    material: "Onyx + Carbon Fiber",
};

pub static CNC_PROFILE: MethodProfile = MethodProfile {
    method: Method::Cnc,
    base_confidence: 0.4,
    envelope: [400.0, 300.0, 200.0],
    fits: Effect {
        delta: 0.1,
        note: Note::Pro("Fits within CNC work envelope"),
    },
    exceeds: Effect {
        delta: -0.4,
        note: Note::Con("Exceeds CNC work envelope"),
    },
    short_circuit: Some(EnvelopeShortCircuit {
        confidence: 0.1,
        reasoning: "Part exceeds CNC work envelope (400 × 300 × 200 mm); not suitable for CNC machining",
        pro: "Best accuracy",
    }),
    rules: CNC_RULES,
    always_pros: &["Best dimensional accuracy", "Wide material selection"],
    always_cons: &["Requires CAM planning", "Higher cost than FDM/SLS"],
    base_fee: 100.0,
    rate_per_cm3: 0.50,
    turnaround: "1-2 days (includes CAM planning)",
    material: "Aluminum 6061 or ABS stock",
};

/// Profiles in method tie-break order.
pub static PROFILES: [&MethodProfile; 4] =
    [&FDM_PROFILE, &SLS_PROFILE, &CFC_PROFILE, &CNC_PROFILE];

pub fn profile(method: Method) -> &'static MethodProfile {
    match method {
        Method::Fdm => &FDM_PROFILE,
        Method::Sls => &SLS_PROFILE,
        Method::Cfc => &CFC_PROFILE,
        Method::Cnc => &CNC_PROFILE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_follow_method_order() {
        for (profile, method) in PROFILES.iter().zip(Method::ALL) {
            assert_eq!(profile.method, method);
        }
    }

    #[test]
    fn test_only_specialist_methods_short_circuit() {
        assert!(FDM_PROFILE.short_circuit.is_none());
        assert!(SLS_PROFILE.short_circuit.is_none());
        assert!(CFC_PROFILE.short_circuit.is_some());
        assert!(CNC_PROFILE.short_circuit.is_some());
    }

    #[test]
    fn test_fdm_tolerance_rules_ignore_standard() {
        let features = GeometryFeatureSet::default();
        let tolerance_effects: Vec<Effect> = FDM_RULES[3..]
            .iter()
            .filter_map(|rule| rule.effect(&features))
            .collect();
        assert!(tolerance_effects.is_empty());
    }

    #[test]
    fn test_rule_effect_branches() {
        let rule = &FDM_RULES[0];
        let flat = GeometryFeatureSet::default();
        let overhanging = GeometryFeatureSet {
            has_overhangs: true,
            ..Default::default()
        };
        assert_eq!(rule.effect(&flat).map(|e| e.delta), Some(0.15));
        assert_eq!(rule.effect(&overhanging).map(|e| e.delta), Some(-0.1));
    }
}
