// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Risky JavaScript Pattern Scanner
 * Line-by-line regex scan for dangerous client-side constructs
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Finding, FindingType, Severity};

static EVAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\beval\s*\(").expect("Invalid EVAL_REGEX"));

static HARDCODED_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:token|key|secret|password)\s*[:=]\s*['"][A-Za-z0-9+/]{20,}['"]"#)
        .expect("Invalid HARDCODED_TOKEN_REGEX")
});

static DYNAMIC_IMPORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bimport\s*\(").expect("Invalid DYNAMIC_IMPORT_REGEX"));

static WEBASSEMBLY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"WebAssembly\.instantiate").expect("Invalid WEBASSEMBLY_REGEX"));

static DOM_SINK_ASSIGN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(innerHTML|outerHTML)\s*=").expect("Invalid DOM_SINK_ASSIGN_REGEX"));

static INSERT_ADJACENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"insertAdjacentHTML\s*\(").expect("Invalid INSERT_ADJACENT_REGEX"));

static DOCUMENT_WRITE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"document\.write(?:ln)?\s*\(").expect("Invalid DOCUMENT_WRITE_REGEX"));

/// One pattern match with its evidence line.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternHit {
    pub finding_type: FindingType,
    pub severity: Severity,
    /// 1-based line number of the match.
    pub line: usize,
    /// The matching source line, trimmed.
    pub evidence: String,
}

fn title_for(finding_type: FindingType) -> &'static str {
    match finding_type {
        FindingType::EvalUsage => "eval() usage detected",
        FindingType::HardcodedToken => "Hardcoded credential detected",
        FindingType::DynamicImport => "Dynamic import() detected",
        FindingType::Webassembly => "WebAssembly instantiation detected",
        FindingType::DomXssSink => "DOM XSS sink usage detected",
        _ => "Risky JavaScript pattern detected",
    }
}

fn description_for(finding_type: FindingType) -> &'static str {
    match finding_type {
        FindingType::EvalUsage => {
            "Script evaluates strings as code with eval(), which enables code injection \
             when any part of the input is attacker-influenced."
        }
        FindingType::HardcodedToken => {
            "Script contains what appears to be a hardcoded token, key or password. \
             Credentials shipped to the client are public."
        }
        FindingType::DynamicImport => {
            "Script loads additional modules at runtime with import(). Dynamically \
             resolved module URLs widen the supply-chain surface."
        }
        FindingType::Webassembly => {
            "Script instantiates WebAssembly modules at runtime; the module bytes are \
             not inspected by this scan."
        }
        FindingType::DomXssSink => {
            "Script writes into a DOM XSS sink (innerHTML/outerHTML/insertAdjacentHTML/\
             document.write). Unsanitized input reaching this sink executes as markup."
        }
        _ => "A risky JavaScript construct was observed.",
    }
}

/// Scan script content line by line and report every risky-pattern match.
///
/// Deterministic: hits are ordered by line number, then by pattern table order
/// within the line.
pub fn detect_risky_patterns(content: &str) -> Vec<PatternHit> {
    let mut hits = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        let checks: [(&Lazy<Regex>, FindingType, Severity); 7] = [
            (&EVAL_REGEX, FindingType::EvalUsage, Severity::High),
            (
                &HARDCODED_TOKEN_REGEX,
                FindingType::HardcodedToken,
                Severity::Critical,
            ),
            (
                &DYNAMIC_IMPORT_REGEX,
                FindingType::DynamicImport,
                Severity::Moderate,
            ),
            (
                &WEBASSEMBLY_REGEX,
                FindingType::Webassembly,
                Severity::Moderate,
            ),
            (&DOM_SINK_ASSIGN_REGEX, FindingType::DomXssSink, Severity::High),
            (&INSERT_ADJACENT_REGEX, FindingType::DomXssSink, Severity::High),
            (&DOCUMENT_WRITE_REGEX, FindingType::DomXssSink, Severity::High),
        ];

        for (regex, finding_type, severity) in checks {
            if regex.is_match(line) {
                hits.push(PatternHit {
                    finding_type,
                    severity,
                    line: line_no,
                    evidence: trimmed.to_string(),
                });
            }
        }
    }

    hits
}

/// Materialize findings from pattern hits for one script location.
pub fn findings_from_pattern_hits(
    scan_id: &str,
    location: &str,
    hits: &[PatternHit],
) -> Vec<Finding> {
    hits.iter()
        .map(|hit| {
            Finding::new(
                scan_id,
                hit.finding_type,
                title_for(hit.finding_type),
                description_for(hit.finding_type),
                hit.severity,
                location,
                Some(format!("line {}: {}", hit.line, hit.evidence)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_detection() {
        let hits = detect_risky_patterns("var x = 1;\neval(userInput);\n");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].finding_type, FindingType::EvalUsage);
        assert_eq!(hits[0].severity, Severity::High);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].evidence, "eval(userInput);");
    }

    #[test]
    fn test_eval_word_boundary() {
        let hits = detect_risky_patterns("medieval(castle);");
        assert!(hits.is_empty());
    }

    #[test]
    fn test_hardcoded_token() {
        let js = r#"const apiKey = "AbCdEfGhIjKlMnOpQrStUvWxYz012345";"#;
        let hits = detect_risky_patterns(js);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].finding_type, FindingType::HardcodedToken);
        assert_eq!(hits[0].severity, Severity::Critical);
    }

    #[test]
    fn test_short_values_not_flagged_as_tokens() {
        let hits = detect_risky_patterns(r#"var token = "abc123";"#);
        assert!(!hits
            .iter()
            .any(|h| h.finding_type == FindingType::HardcodedToken));
    }

    #[test]
    fn test_dynamic_import_and_wasm() {
        let js = "import('./chunk.js');\nWebAssembly.instantiate(bytes);";
        let hits = detect_risky_patterns(js);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].finding_type, FindingType::DynamicImport);
        assert_eq!(hits[0].severity, Severity::Moderate);
        assert_eq!(hits[1].finding_type, FindingType::Webassembly);
    }

    #[test]
    fn test_dom_sinks() {
        let js = "el.innerHTML = data;\nel.insertAdjacentHTML('beforeend', x);\ndocument.writeln(y);";
        let hits = detect_risky_patterns(js);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.finding_type == FindingType::DomXssSink));
        assert!(hits.iter().all(|h| h.severity == Severity::High));
    }

    #[test]
    fn test_determinism() {
        let js = "eval(a);\nel.innerHTML = b;\nimport('./m.js');";
        let first = detect_risky_patterns(js);
        let second = detect_risky_patterns(js);
        assert_eq!(first, second);
    }

    #[test]
    fn test_findings_carry_line_evidence() {
        let hits = detect_risky_patterns("  eval(x); ");
        let findings = findings_from_pattern_hits("scan-1", "inline-script#0", &hits);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location, "inline-script#0");
        assert_eq!(
            findings[0].evidence.as_deref(),
            Some("line 1: eval(x);")
        );
    }
}
