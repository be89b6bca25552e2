// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Risk Scoring
 * Pure scoring functions for libraries and whole scans
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::types::{FindingType, RiskLevel, Severity, Vulnerability};

/// Library names with broad deployment and active maintenance; their scores
/// are discounted because exploitation windows close faster.
const POPULAR_LIBRARIES: &[&str] = &[
    "react", "react-dom", "vue", "angular", "jquery", "lodash", "axios", "moment", "bootstrap",
    "d3", "next", "nuxt", "svelte", "ember",
];

fn clamp_round(score: f64) -> i32 {
    (score.clamp(0.0, 100.0) + 0.5).floor() as i32
}

fn max_cvss(vulns: &[Vulnerability]) -> f64 {
    vulns
        .iter()
        .filter_map(|v| v.cvss_score)
        .fold(0.0_f64, f64::max)
}

fn count_severity(vulns: &[Vulnerability], severity: Severity) -> usize {
    vulns.iter().filter(|v| v.severity == severity).count()
}

/// Base library risk: CVSS-driven, scaled by detection confidence.
///
/// `confidence` is 0-100. Adding a vulnerability of any severity never
/// lowers the result.
pub fn calculate_library_risk(
    vulns: &[Vulnerability],
    confidence: i32,
    has_public_exploit: bool,
) -> i32 {
    if vulns.is_empty() {
        return 0;
    }

    let mut score = max_cvss(vulns) * 10.0;
    score *= (confidence as f64 / 100.0).clamp(0.0, 1.0);
    score += 15.0 * count_severity(vulns, Severity::Critical) as f64;

    if has_public_exploit {
        score *= 1.5;
    }

    clamp_round(score)
}

/// Per-finding penalty applied by the advanced scorer when the finding was
/// observed in a script related to the library.
fn finding_penalty(finding_type: FindingType) -> f64 {
    match finding_type {
        FindingType::EvalUsage => 25.0,
        FindingType::HardcodedToken => 30.0,
        FindingType::DynamicImport => 15.0,
        FindingType::RemoteCode => 35.0,
        FindingType::Webassembly => 20.0,
        _ => 0.0,
    }
}

/// Advanced library scoring used by the analyze worker.
///
/// Starts from the CVSS ceiling plus severity weights, discounts detection
/// uncertainty, penalizes co-located risky-JS findings, discounts popular
/// libraries and inflates stale versions.
pub fn calculate_advanced_library_risk(
    name: &str,
    vulns: &[Vulnerability],
    confidence: i32,
    co_located_findings: &[FindingType],
    version_age_days: Option<i64>,
) -> i32 {
    let mut score = max_cvss(vulns) * 10.0
        + 20.0 * count_severity(vulns, Severity::Critical) as f64
        + 10.0 * count_severity(vulns, Severity::High) as f64;

    score -= 0.3 * (100.0 - confidence as f64).clamp(0.0, 100.0);
    score = score.max(0.0);

    for ft in co_located_findings {
        score += finding_penalty(*ft);
    }

    if POPULAR_LIBRARIES.contains(&name.to_lowercase().as_str()) {
        score *= 0.8;
    }

    match version_age_days {
        Some(age) if age > 365 => score *= 1.3,
        Some(age) if age > 180 => score *= 1.1,
        _ => {}
    }

    clamp_round(score)
}

/// Global scan risk from per-library scores and the count of critical findings.
pub fn calculate_global_risk(library_risks: &[i32], critical_findings: usize) -> i32 {
    if library_risks.is_empty() && critical_findings == 0 {
        return 0;
    }

    let max = library_risks.iter().copied().max().unwrap_or(0) as f64;
    let avg = if library_risks.is_empty() {
        0.0
    } else {
        library_risks.iter().copied().sum::<i32>() as f64 / library_risks.len() as f64
    };
    let high_risk_count = library_risks.iter().filter(|&&r| r >= 70).count() as f64;

    let score = 0.4 * max + 0.3 * avg + 5.0 * high_risk_count + 10.0 * critical_findings as f64;
    clamp_round(score)
}

/// Bucket a 0-100 score.
pub fn get_risk_level(score: i32) -> RiskLevel {
    if score >= 80 {
        RiskLevel::Critical
    } else if score >= 60 {
        RiskLevel::High
    } else if score >= 30 {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vuln(severity: Severity, cvss: Option<f64>) -> Vulnerability {
        Vulnerability {
            id: "GHSA-test".to_string(),
            title: "test advisory".to_string(),
            description: "test".to_string(),
            severity,
            cvss_score: cvss,
            references: Vec::new(),
        }
    }

    #[test]
    fn test_empty_vulns_score_zero() {
        assert_eq!(calculate_library_risk(&[], 100, false), 0);
    }

    #[test]
    fn test_jquery_critical_scenario() {
        // One critical advisory (cvss 9.8), confidence 80:
        // 9.8 * 10 * 0.8 + 15 * 1 = 93.4 -> 93
        let vulns = vec![vuln(Severity::Critical, Some(9.8))];
        let score = calculate_library_risk(&vulns, 80, false);
        assert!((92..=94).contains(&score), "score was {}", score);
    }

    #[test]
    fn test_public_exploit_multiplier() {
        let vulns = vec![vuln(Severity::High, Some(7.0))];
        let plain = calculate_library_risk(&vulns, 100, false);
        let exploited = calculate_library_risk(&vulns, 100, true);
        assert!(exploited > plain);
    }

    #[test]
    fn test_risk_monotonic_in_vulnerabilities() {
        let mut vulns = vec![vuln(Severity::Moderate, Some(5.0))];
        let before = calculate_library_risk(&vulns, 90, false);
        vulns.push(vuln(Severity::Low, Some(2.0)));
        let after = calculate_library_risk(&vulns, 90, false);
        assert!(after >= before);

        vulns.push(vuln(Severity::Critical, Some(9.9)));
        let critical = calculate_library_risk(&vulns, 90, false);
        assert!(critical >= after);
    }

    #[test]
    fn test_global_risk_monotonic_in_critical_findings() {
        let risks = vec![40, 70, 20];
        let base = calculate_global_risk(&risks, 0);
        let one = calculate_global_risk(&risks, 1);
        let two = calculate_global_risk(&risks, 2);
        assert!(one >= base);
        assert!(two >= one);
    }

    #[test]
    fn test_global_risk_components() {
        // max=80, avg=50, one >=70, no critical findings:
        // 0.4*80 + 0.3*50 + 5 = 52
        let score = calculate_global_risk(&[80, 20], 0);
        assert_eq!(score, 52);
    }

    #[test]
    fn test_global_risk_clamped() {
        let score = calculate_global_risk(&[100, 100, 100], 10);
        assert_eq!(score, 100);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(get_risk_level(85), RiskLevel::Critical);
        assert_eq!(get_risk_level(80), RiskLevel::Critical);
        assert_eq!(get_risk_level(65), RiskLevel::High);
        assert_eq!(get_risk_level(45), RiskLevel::Moderate);
        assert_eq!(get_risk_level(10), RiskLevel::Low);
    }

    #[test]
    fn test_advanced_scoring_popular_discount() {
        let vulns = vec![vuln(Severity::High, Some(7.5))];
        let popular = calculate_advanced_library_risk("jquery", &vulns, 100, &[], None);
        let obscure = calculate_advanced_library_risk("leftpad-ng", &vulns, 100, &[], None);
        assert!(popular < obscure);
    }

    #[test]
    fn test_advanced_scoring_finding_penalties() {
        let vulns = vec![vuln(Severity::Moderate, Some(5.0))];
        let base = calculate_advanced_library_risk("somelib", &vulns, 100, &[], None);
        let with_eval = calculate_advanced_library_risk(
            "somelib",
            &vulns,
            100,
            &[FindingType::EvalUsage],
            None,
        );
        assert_eq!(with_eval - base, 25);
    }

    #[test]
    fn test_advanced_scoring_stale_version() {
        let vulns = vec![vuln(Severity::High, Some(7.0))];
        let fresh = calculate_advanced_library_risk("somelib", &vulns, 100, &[], Some(30));
        let aging = calculate_advanced_library_risk("somelib", &vulns, 100, &[], Some(200));
        let stale = calculate_advanced_library_risk("somelib", &vulns, 100, &[], Some(400));
        assert!(aging > fresh);
        assert!(stale > aging);
    }
}
