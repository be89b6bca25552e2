// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Risk Scoring Tests
 * Known-value scenarios and monotonicity properties
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use shieldeye::risk::{
    calculate_advanced_library_risk, calculate_global_risk, calculate_library_risk, get_risk_level,
};
use shieldeye::types::{FindingType, RiskLevel, Severity, Vulnerability};

fn advisory(id: &str, severity: Severity, cvss: f64) -> Vulnerability {
    Vulnerability {
        id: id.to_string(),
        title: format!("{} advisory", id),
        description: String::new(),
        severity,
        cvss_score: Some(cvss),
        references: Vec::new(),
    }
}

#[test]
fn jquery_with_one_critical_advisory_scores_93() {
    // jquery@1.12.4, one critical advisory (CVSS 9.8), confidence 80:
    // 9.8*10 * 0.8 + 15*1 = 93.4 -> 93 (+-1 for rounding)
    let vulns = vec![advisory("GHSA-critical", Severity::Critical, 9.8)];
    let score = calculate_library_risk(&vulns, 80, false);
    assert!((92..=94).contains(&score), "expected ~93, got {}", score);
}

#[test]
fn adding_any_vulnerability_never_lowers_library_risk() {
    let severities = [
        Severity::Low,
        Severity::Moderate,
        Severity::High,
        Severity::Critical,
    ];
    let cvss = [1.0, 5.0, 7.5, 9.9];

    let mut vulns = vec![advisory("base", Severity::Moderate, 5.5)];
    let mut previous = calculate_library_risk(&vulns, 85, false);

    for (index, (severity, score)) in severities.iter().zip(cvss.iter()).enumerate() {
        vulns.push(advisory(&format!("extra-{}", index), *severity, *score));
        let current = calculate_library_risk(&vulns, 85, false);
        assert!(
            current >= previous,
            "risk dropped from {} to {} after adding {:?}",
            previous,
            current,
            severity
        );
        previous = current;
    }
}

#[test]
fn adding_critical_findings_never_lowers_global_risk() {
    let risks = vec![35, 62, 78];
    let mut previous = calculate_global_risk(&risks, 0);
    for criticals in 1..=5 {
        let current = calculate_global_risk(&risks, criticals);
        assert!(current >= previous);
        previous = current;
    }
}

#[test]
fn global_risk_known_value() {
    // max=80, avg=(80+20)/2=50, one library >=70:
    // 0.4*80 + 0.3*50 + 5*1 = 52
    assert_eq!(calculate_global_risk(&[80, 20], 0), 52);
}

#[test]
fn global_risk_clamps_at_100() {
    assert_eq!(calculate_global_risk(&[100, 100], 12), 100);
}

#[test]
fn empty_inputs_score_zero() {
    assert_eq!(calculate_library_risk(&[], 100, true), 0);
    assert_eq!(calculate_global_risk(&[], 0), 0);
}

#[test]
fn risk_level_boundaries() {
    assert_eq!(get_risk_level(100), RiskLevel::Critical);
    assert_eq!(get_risk_level(80), RiskLevel::Critical);
    assert_eq!(get_risk_level(79), RiskLevel::High);
    assert_eq!(get_risk_level(60), RiskLevel::High);
    assert_eq!(get_risk_level(59), RiskLevel::Moderate);
    assert_eq!(get_risk_level(30), RiskLevel::Moderate);
    assert_eq!(get_risk_level(29), RiskLevel::Low);
    assert_eq!(get_risk_level(0), RiskLevel::Low);
}

#[test]
fn advanced_scoring_orders_by_exposure() {
    let vulns = vec![advisory("GHSA-high", Severity::High, 7.5)];

    let clean = calculate_advanced_library_risk("customlib", &vulns, 90, &[], None);
    let with_eval = calculate_advanced_library_risk(
        "customlib",
        &vulns,
        90,
        &[FindingType::EvalUsage],
        None,
    );
    let with_eval_and_token = calculate_advanced_library_risk(
        "customlib",
        &vulns,
        90,
        &[FindingType::EvalUsage, FindingType::HardcodedToken],
        None,
    );

    assert!(with_eval > clean);
    assert!(with_eval_and_token > with_eval);
}

#[test]
fn advanced_scoring_discounts_popular_and_inflates_stale() {
    let vulns = vec![advisory("GHSA-x", Severity::High, 8.0)];

    let popular = calculate_advanced_library_risk("react", &vulns, 100, &[], None);
    let unknown = calculate_advanced_library_risk("unmaintained-widget", &vulns, 100, &[], None);
    assert!(popular < unknown);

    let fresh = calculate_advanced_library_risk("lib", &vulns, 100, &[], Some(100));
    let stale = calculate_advanced_library_risk("lib", &vulns, 100, &[], Some(400));
    assert!(stale > fresh);
}

#[test]
fn low_confidence_discounts_advanced_score() {
    let vulns = vec![advisory("GHSA-y", Severity::High, 7.0)];
    let confident = calculate_advanced_library_risk("lib", &vulns, 100, &[], None);
    let unsure = calculate_advanced_library_risk("lib", &vulns, 40, &[], None);
    assert!(unsure < confident);
}
