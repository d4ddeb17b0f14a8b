//! Incremental conflict detector
//!
//! Findings are indexed by `(normalized entity, normalized aspect)`. Each call
//! to [`ConflictDetector::detect_conflicts`] compares only the *new* findings
//! against their own bucket, so a pass costs O(new × bucket) rather than a
//! full pairwise recomputation.

use super::entities::{Conflict, ConflictHandling, ConflictId, ConflictType, ResolutionStrategy};
use crate::finding::entities::{Finding, FindingId};
use crate::finding::value::{ClaimValue, normalize_aspect, normalize_entity, relative_difference};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_numeric_tolerance() -> f64 {
    0.05
}

fn default_date_tolerance_days() -> i64 {
    1
}

fn default_reliability_gap() -> f64 {
    0.4
}

/// Tolerances and handling mode for the conflict detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetectorConfig {
    /// Relative difference above which two numbers disagree
    #[serde(default = "default_numeric_tolerance")]
    pub numeric_tolerance: f64,
    /// Dates further apart than this many days disagree
    #[serde(default = "default_date_tolerance_days")]
    pub date_tolerance_days: i64,
    /// Source reliability gap that turns a disagreement into `SourceReliability`
    #[serde(default = "default_reliability_gap")]
    pub reliability_gap: f64,
    /// Required; there is no implicit default
    pub handling: ConflictHandling,
}

impl ConflictDetectorConfig {
    pub fn new(handling: ConflictHandling) -> Self {
        Self {
            numeric_tolerance: default_numeric_tolerance(),
            date_tolerance_days: default_date_tolerance_days(),
            reliability_gap: default_reliability_gap(),
            handling,
        }
    }

    pub fn with_numeric_tolerance(mut self, tolerance: f64) -> Self {
        self.numeric_tolerance = tolerance;
        self
    }

    pub fn with_date_tolerance_days(mut self, days: i64) -> Self {
        self.date_tolerance_days = days;
        self
    }

    pub fn with_reliability_gap(mut self, gap: f64) -> Self {
        self.reliability_gap = gap;
        self
    }
}

type BucketKey = (String, String);

/// Stateful detector holding the index of every finding seen so far.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    config: ConflictDetectorConfig,
    index: HashMap<BucketKey, Vec<Finding>>,
    indexed: HashSet<FindingId>,
    reported: HashSet<ConflictId>,
}

impl ConflictDetector {
    pub fn new(config: ConflictDetectorConfig) -> Self {
        Self {
            config,
            index: HashMap::new(),
            indexed: HashSet::new(),
            reported: HashSet::new(),
        }
    }

    /// Rebuild the index from a restored session without re-reporting its
    /// existing conflicts.
    pub fn with_history(
        config: ConflictDetectorConfig,
        findings: &[Finding],
        conflicts: &[Conflict],
    ) -> Self {
        let mut detector = Self::new(config);
        for finding in findings {
            detector.insert(finding.clone());
        }
        detector
            .reported
            .extend(conflicts.iter().map(|c| c.id.clone()));
        detector
    }

    pub fn config(&self) -> &ConflictDetectorConfig {
        &self.config
    }

    /// Number of findings indexed so far.
    pub fn indexed_len(&self) -> usize {
        self.indexed.len()
    }

    /// Compare `new_findings` against everything seen before (and each other)
    /// and return conflicts not reported earlier.
    pub fn detect_conflicts(&mut self, new_findings: &[Finding]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for finding in new_findings {
            if self.indexed.contains(&finding.id) {
                continue;
            }

            let key = bucket_key(finding);
            if let Some(bucket) = self.index.get(&key) {
                for existing in bucket {
                    if let Some(conflict) = compare(&self.config, existing, finding)
                        && self.reported.insert(conflict.id.clone())
                    {
                        conflicts.push(conflict);
                    }
                }
            }
            self.insert(finding.clone());
        }

        conflicts
    }

    fn insert(&mut self, finding: Finding) {
        if self.indexed.insert(finding.id) {
            self.index.entry(bucket_key(&finding)).or_default().push(finding);
        }
    }
}

/// One-shot detection over a complete set of findings.
pub fn detect_conflicts(config: &ConflictDetectorConfig, findings: &[Finding]) -> Vec<Conflict> {
    ConflictDetector::new(config.clone()).detect_conflicts(findings)
}

fn bucket_key(finding: &Finding) -> BucketKey {
    (normalize_entity(&finding.entity), normalize_aspect(&finding.aspect))
}

/// Compare two findings assumed to share an entity and aspect.
///
/// The pair is ordered by finding id first, so the result does not depend on
/// argument order.
pub fn compare(config: &ConflictDetectorConfig, a: &Finding, b: &Finding) -> Option<Conflict> {
    if a.id == b.id {
        return None;
    }
    let (first, second) = if a.id <= b.id { (a, b) } else { (b, a) };

    let conflict_type = classify(
        config,
        &ClaimValue::parse(&first.content),
        &ClaimValue::parse(&second.content),
        reliability_gap(first, second),
    )?;

    let severity = first.confidence.min(second.confidence) * conflict_type.severity_weight();
    let resolution_strategy = match config.handling {
        ConflictHandling::AutoLabel => conflict_type.default_strategy(),
        ConflictHandling::ReviewAll => ResolutionStrategy::PresentBoth,
    };
    let (entity, aspect) = bucket_key(first);

    Some(Conflict {
        id: ConflictId::for_pair(&first.id, &second.id),
        findings: [first.id, second.id],
        entity,
        aspect,
        conflict_type,
        severity: severity.clamp(0.0, 1.0),
        resolution_strategy,
        resolved: false,
    })
}

fn reliability_gap(a: &Finding, b: &Finding) -> Option<f64> {
    Some((a.source.reliability? - b.source.reliability?).abs())
}

fn classify(
    config: &ConflictDetectorConfig,
    a: &ClaimValue,
    b: &ClaimValue,
    reliability_gap: Option<f64>,
) -> Option<ConflictType> {
    let disagreement = match (a, b) {
        (ClaimValue::Date(x), ClaimValue::Date(y)) => {
            let days = (*x - *y).num_days().abs();
            return (days > config.date_tolerance_days).then_some(ConflictType::InconsistentDates);
        }
        (ClaimValue::Number(x), ClaimValue::Number(y)) => {
            (relative_difference(*x, *y) > config.numeric_tolerance)
                .then_some(ConflictType::Contradictory)
        }
        (ClaimValue::Text(x), ClaimValue::Text(y)) => {
            (x != y).then_some(ConflictType::Contradictory)
        }
        _ => Some(ConflictType::DifferentValues),
    }?;

    if reliability_gap.is_some_and(|gap| gap >= config.reliability_gap) {
        Some(ConflictType::SourceReliability)
    } else {
        Some(disagreement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::entities::SourceCitation;
    use proptest::prelude::*;

    fn auto() -> ConflictDetectorConfig {
        ConflictDetectorConfig::new(ConflictHandling::AutoLabel)
    }

    fn finding(entity: &str, aspect: &str, content: &str, confidence: f64) -> Finding {
        Finding::new("agent", entity, aspect, content, confidence)
    }

    #[test]
    fn test_registration_date_scenario() {
        let a = finding("Acme Corp", "registration_date", "2018-03-15", 0.95);
        let b = finding("Acme Corp", "registration_date", "2018-03-12", 0.78);

        let conflicts = detect_conflicts(&auto(), &[a, b]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::InconsistentDates);
        assert_eq!(conflict.resolution_strategy, ResolutionStrategy::Temporal);
        assert!(!conflict.resolved);
        assert!((conflict.severity - 0.78 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_dates_within_tolerance_agree() {
        let a = finding("Acme", "founded", "2018-03-15", 0.9);
        let b = finding("Acme", "founded", "March 14, 2018", 0.9);
        assert!(detect_conflicts(&auto(), &[a, b]).is_empty());
    }

    #[test]
    fn test_numeric_tolerance() {
        let a = finding("Acme", "revenue", "$10.0M", 0.9);
        let close = finding("Acme", "revenue", "10,300,000", 0.9);
        let far = finding("Acme", "revenue", "$12M", 0.6);

        let conflicts = detect_conflicts(&auto(), &[a.clone(), close.clone()]);
        assert!(conflicts.is_empty());

        let conflicts = detect_conflicts(&auto(), &[a, close, far]);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().all(|c| c.conflict_type == ConflictType::Contradictory));
        assert!(conflicts.iter().all(|c| (c.severity - 0.6).abs() < 1e-9));
    }

    #[test]
    fn test_entity_and_aspect_normalized_into_one_bucket() {
        let a = finding("Acme Corp.", "Headquarters", "Delaware", 0.9);
        let b = finding("ACME inc", "headquarters", "Nevada", 0.8);
        let other_aspect = finding("Acme", "ceo", "Nevada", 0.8);

        let conflicts = detect_conflicts(&auto(), &[a, b, other_aspect]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity, "acme");
        assert_eq!(conflicts[0].aspect, "headquarters");
    }

    #[test]
    fn test_source_reliability_gap() {
        let a = finding("Acme", "ceo", "Jane Roe", 0.9)
            .with_source(SourceCitation::new("registry").with_reliability(0.95));
        let b = finding("Acme", "ceo", "John Doe", 0.7)
            .with_source(SourceCitation::new("forum").with_reliability(0.3));

        let conflicts = detect_conflicts(&auto(), &[a, b]);
        assert_eq!(conflicts[0].conflict_type, ConflictType::SourceReliability);
        assert_eq!(
            conflicts[0].resolution_strategy,
            ResolutionStrategy::SourceReliability
        );
    }

    #[test]
    fn test_mixed_kinds_are_different_values() {
        let a = finding("Acme", "employees", "1200", 0.9);
        let b = finding("Acme", "employees", "about a thousand", 0.5);
        let conflicts = detect_conflicts(&auto(), &[a, b]);
        assert_eq!(conflicts[0].conflict_type, ConflictType::DifferentValues);
        assert_eq!(conflicts[0].resolution_strategy, ResolutionStrategy::PresentBoth);
    }

    #[test]
    fn test_review_all_labels_everything_present_both() {
        let config = ConflictDetectorConfig::new(ConflictHandling::ReviewAll);
        let a = finding("Acme", "revenue", "5M", 0.9);
        let b = finding("Acme", "revenue", "9M", 0.9);
        let conflicts = detect_conflicts(&config, &[a, b]);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Contradictory);
        assert_eq!(conflicts[0].resolution_strategy, ResolutionStrategy::PresentBoth);
    }

    #[test]
    fn test_incremental_detection_reports_once() {
        let mut detector = ConflictDetector::new(auto());
        let a = finding("Acme", "revenue", "5M", 0.9);
        let b = finding("Acme", "revenue", "9M", 0.9);

        assert!(detector.detect_conflicts(std::slice::from_ref(&a)).is_empty());
        assert_eq!(detector.detect_conflicts(std::slice::from_ref(&b)).len(), 1);
        // Re-submitting already indexed findings yields nothing new.
        assert!(detector.detect_conflicts(&[a, b]).is_empty());
        assert_eq!(detector.indexed_len(), 2);
    }

    #[test]
    fn test_with_history_does_not_repeat() {
        let a = finding("Acme", "revenue", "5M", 0.9);
        let b = finding("Acme", "revenue", "9M", 0.9);
        let existing = detect_conflicts(&auto(), &[a.clone(), b.clone()]);

        let mut detector = ConflictDetector::with_history(auto(), &[a.clone(), b], &existing);
        let c = finding("Acme", "revenue", "20M", 0.5);
        let fresh = detector.detect_conflicts(&[c]);
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|x| !existing.iter().any(|e| e.id == x.id)));
    }

    fn arb_content() -> impl Strategy<Value = String> {
        prop_oneof![
            (2000i32..2025, 1u32..13, 1u32..29).prop_map(|(y, m, d)| format!("{y:04}-{m:02}-{d:02}")),
            (0u32..5_000_000).prop_map(|n| n.to_string()),
            "[a-z]{1,8}( [a-z]{1,8})?",
        ]
    }

    proptest! {
        #[test]
        fn prop_detection_is_symmetric(
            c1 in arb_content(),
            c2 in arb_content(),
            conf1 in 0.0f64..=1.0,
            conf2 in 0.0f64..=1.0,
            rel1 in proptest::option::of(0.0f64..=1.0),
            rel2 in proptest::option::of(0.0f64..=1.0),
        ) {
            let mut f1 = finding("Acme", "aspect", &c1, conf1);
            let mut f2 = finding("Acme", "aspect", &c2, conf2);
            f1.source.reliability = rel1;
            f2.source.reliability = rel2;

            let forward = detect_conflicts(&auto(), &[f1.clone(), f2.clone()]);
            let backward = detect_conflicts(&auto(), &[f2, f1]);
            prop_assert_eq!(forward, backward);
        }
    }
}
