// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Surface Analyzer Tests
 * Golden-fixture coverage for every finding kind the analyzer emits
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;

use shieldeye::analyzer::{
    analyze_headers, analyze_html_surface, detect_risky_patterns, findings_from_pattern_hits,
};
use shieldeye::types::{Finding, FindingType, Severity};

const SCAN_ID: &str = "test-scan";

fn headers_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn find<'a>(findings: &'a [Finding], title: &str) -> Option<&'a Finding> {
    findings.iter().find(|f| f.title == title)
}

#[test]
fn get_form_with_password_over_http_emits_both_form_findings() {
    // Scenario: a login form using GET served over plain HTTP.
    let html = r#"<html><body>
        <form method="GET" action="/login">
            <input type="text" name="user">
            <input type="password" name="pass">
        </form>
    </body></html>"#;

    let findings = analyze_html_surface(SCAN_ID, "http://shop.example.com/login", html);

    let get_form = find(&findings, "Forms using GET method detected").expect("GET form finding");
    assert_eq!(get_form.severity, Severity::Moderate);
    assert_eq!(get_form.finding_type, FindingType::FormSecurity);

    let password = find(&findings, "Password field on a non-HTTPS page").expect("password finding");
    assert_eq!(password.severity, Severity::High);
}

#[test]
fn wildcard_cors_with_credentials_is_high() {
    // Scenario: ACAO * combined with credentials.
    let headers = headers_of(&[
        ("access-control-allow-origin", "*"),
        ("access-control-allow-credentials", "true"),
    ]);

    let findings = analyze_headers(SCAN_ID, true, &headers, &[]);
    let cors = find(
        &findings,
        "Insecure CORS configuration: wildcard origin with credentials",
    )
    .expect("CORS finding");
    assert_eq!(cors.severity, Severity::High);
}

#[test]
fn http_script_on_https_page_is_high_mixed_content() {
    // Scenario: HTTPS page loading a script over plain HTTP.
    let html = r#"<html><head><script src="http://cdn.example.net/foo.js"></script></head></html>"#;
    let findings = analyze_html_surface(SCAN_ID, "https://secure.example.com/", html);

    let mixed = find(&findings, "Mixed content detected on HTTPS page").expect("mixed content");
    assert_eq!(mixed.severity, Severity::High);
    assert_eq!(mixed.finding_type, FindingType::SecurityHeader);
}

#[test]
fn passive_mixed_content_is_moderate() {
    let html = r#"<img src="http://img.example.net/banner.png">"#;
    let findings = analyze_html_surface(SCAN_ID, "https://secure.example.com/", html);
    let mixed = find(&findings, "Mixed content detected on HTTPS page").unwrap();
    assert_eq!(mixed.severity, Severity::Moderate);
}

#[test]
fn every_risky_js_pattern_kind_is_detected() {
    let script = r#"eval(userData);
const apiToken = "AbCdEfGhIjKlMnOpQrStUvWx1234";
import('./lazy-module.js');
WebAssembly.instantiate(wasmBytes);
container.innerHTML = remoteHtml;
node.insertAdjacentHTML('afterbegin', chunk);
document.write(banner);"#;

    let hits = detect_risky_patterns(script);
    let kinds: Vec<FindingType> = hits.iter().map(|h| h.finding_type).collect();

    assert!(kinds.contains(&FindingType::EvalUsage));
    assert!(kinds.contains(&FindingType::HardcodedToken));
    assert!(kinds.contains(&FindingType::DynamicImport));
    assert!(kinds.contains(&FindingType::Webassembly));
    assert!(kinds.contains(&FindingType::DomXssSink));

    // Three distinct DOM sink shapes on three lines.
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == FindingType::DomXssSink)
            .count(),
        3
    );

    let findings = findings_from_pattern_hits(SCAN_ID, "inline-script#0", &hits);
    assert_eq!(findings.len(), hits.len());
    let eval = findings
        .iter()
        .find(|f| f.finding_type == FindingType::EvalUsage)
        .unwrap();
    assert_eq!(eval.evidence.as_deref(), Some("line 1: eval(userData);"));
}

#[test]
fn inline_handlers_iframes_and_sri_are_reported() {
    let html = r#"<html><body>
        <button onclick="trackClick()">buy</button>
        <a onmouseover="eval(payload)">offer</a>
        <iframe src="https://widgets.example.net/chat"></iframe>
        <iframe src="http://legacy.example.org/frame"></iframe>
        <script src="https://cdn.example.net/analytics.js"></script>
    </body></html>"#;

    let findings = analyze_html_surface(SCAN_ID, "https://store.example.com/", html);

    let handlers = find(&findings, "Inline event handlers detected").expect("handler finding");
    assert_eq!(handlers.severity, Severity::High); // escalated by eval(

    assert!(find(&findings, "Third-party iframes embedded").is_some());
    let insecure_iframe =
        find(&findings, "Insecure iframe loaded over HTTP").expect("insecure iframe");
    assert_eq!(insecure_iframe.severity, Severity::High);

    let sri = find(&findings, "External scripts without Subresource Integrity")
        .expect("SRI finding");
    assert_eq!(sri.finding_type, FindingType::ScriptIntegrity);
    assert_eq!(sri.severity, Severity::Moderate);
}

#[test]
fn header_findings_cover_the_full_checklist() {
    // A bare HTTPS response triggers each missing-header check.
    let findings = analyze_headers(SCAN_ID, true, &HashMap::new(), &[]);
    let titles: Vec<&str> = findings.iter().map(|f| f.title.as_str()).collect();

    for expected in [
        "Content-Security-Policy header missing",
        "Strict-Transport-Security header missing",
        "X-Frame-Options header missing",
        "X-Content-Type-Options header missing or invalid",
        "Referrer-Policy header missing",
        "Permissions-Policy header missing",
        "Cross-Origin-Opener-Policy header missing or weak",
        "Cross-Origin-Embedder-Policy header missing",
        "Cross-Origin-Resource-Policy header missing",
    ] {
        assert!(titles.contains(&expected), "missing: {}", expected);
    }
}

#[test]
fn unsafe_csp_and_weak_referrer_policy() {
    let headers = headers_of(&[
        ("content-security-policy", "script-src 'self' 'unsafe-eval'"),
        ("referrer-policy", "no-referrer-when-downgrade"),
    ]);
    let findings = analyze_headers(SCAN_ID, false, &headers, &[]);

    let csp = find(&findings, "Content-Security-Policy allows unsafe directives").unwrap();
    assert_eq!(csp.severity, Severity::High);
    assert!(find(&findings, "Referrer-Policy allows downgrade").is_some());
}

#[test]
fn cookie_findings_cap_at_one_per_class() {
    let cookies = vec![
        "session=aaa; Path=/".to_string(),
        "auth_token=bbb".to_string(),
        "theme=dark".to_string(),
        "locale=fi".to_string(),
    ];
    let findings = analyze_headers(SCAN_ID, true, &HashMap::new(), &cookies);

    let cookie_findings: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.finding_type == FindingType::SecurityCookie)
        .collect();
    assert_eq!(cookie_findings.len(), 2);

    let sensitive = find(&findings, "Sensitive cookie missing security flags").unwrap();
    assert_eq!(sensitive.severity, Severity::High);
    let generic = find(&findings, "Cookie missing security flags").unwrap();
    assert_eq!(generic.severity, Severity::Moderate);
}

#[test]
fn identical_inputs_produce_identical_finding_multisets() {
    let html = r#"<html><body>
        <form method="get"><input type="password"></form>
        <div onclick="go()"></div>
        <iframe src="http://a.example.net/f"></iframe>
        <script src="https://cdn.example.net/x.js"></script>
    </body></html>"#;
    let headers = headers_of(&[("access-control-allow-origin", "*")]);
    let cookies = vec!["jwt=abc".to_string()];

    let collect = || {
        let mut all = analyze_html_surface(SCAN_ID, "https://example.com/", html);
        all.extend(analyze_headers(SCAN_ID, true, &headers, &cookies));
        let mut multiset: Vec<(String, Severity, Option<String>)> = all
            .into_iter()
            .map(|f| (f.title, f.severity, f.evidence))
            .collect();
        multiset.sort();
        multiset
    };

    assert_eq!(collect(), collect());
}
