// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTML Surface Analyzer
 * Forms, inline handlers, iframes, mixed content and SRI checks over the
 * rendered top-level document
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::types::{Finding, FindingType, Severity};

static CSRF_INDICATOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)csrf|xsrf|_token|authenticity_token").expect("Invalid CSRF regex"));

static INLINE_HANDLER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\son(\w+)\s*=\s*("[^"]*"|'[^']*')"#).expect("Invalid inline handler regex")
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid CSS selector")
}

fn is_http_absolute(value: &str) -> bool {
    value.trim_start().to_ascii_lowercase().starts_with("http://")
}

fn host_of(raw: &str, base: &Url) -> Option<String> {
    base.join(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Analyze the rendered top-level HTML for surface findings.
///
/// Pure and deterministic: the same document and page URL always produce the
/// same multiset of findings.
pub fn analyze_html_surface(scan_id: &str, page_url: &str, html: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    let base = match Url::parse(page_url) {
        Ok(u) => u,
        Err(_) => return findings,
    };
    let page_https = base.scheme() == "https";
    let page_host = base.host_str().map(|h| h.to_ascii_lowercase());

    let document = Html::parse_document(html);

    analyze_forms(scan_id, page_https, &document, &mut findings);
    analyze_inline_handlers(scan_id, html, &mut findings);
    analyze_iframes(scan_id, &base, page_host.as_deref(), &document, &mut findings);
    if page_https {
        analyze_mixed_content(scan_id, &base, &document, &mut findings);
    }
    analyze_script_integrity(scan_id, &base, page_host.as_deref(), &document, &mut findings);

    findings
}

fn analyze_forms(scan_id: &str, page_https: bool, document: &Html, findings: &mut Vec<Finding>) {
    let form_sel = selector("form");
    let input_sel = selector("input");

    let mut form_count = 0usize;
    let mut get_forms = 0usize;
    let mut password_fields = 0usize;
    let mut any_csrf_indicator = false;

    for form in document.select(&form_sel) {
        form_count += 1;

        if form
            .value()
            .attr("method")
            .map(|m| m.trim().eq_ignore_ascii_case("get"))
            .unwrap_or(false)
        {
            get_forms += 1;
        }

        for input in form.select(&input_sel) {
            if input
                .value()
                .attr("type")
                .map(|t| t.trim().eq_ignore_ascii_case("password"))
                .unwrap_or(false)
            {
                password_fields += 1;
            }
        }

        if CSRF_INDICATOR_REGEX.is_match(&form.html()) {
            any_csrf_indicator = true;
        }
    }

    if get_forms > 0 {
        findings.push(Finding::new(
            scan_id,
            FindingType::FormSecurity,
            "Forms using GET method detected",
            "Form submissions with method=GET place field values in the URL, where they \
             leak into logs, referrers and browser history.",
            Severity::Moderate,
            "html",
            Some(format!("{} of {} forms use method=GET", get_forms, form_count)),
        ));
    }

    if password_fields > 0 && !page_https {
        findings.push(Finding::new(
            scan_id,
            FindingType::FormSecurity,
            "Password field on a non-HTTPS page",
            "The page collects passwords but is not served over HTTPS; credentials \
             transit the network in cleartext.",
            Severity::High,
            "html",
            Some(format!("{} password field(s) on an http page", password_fields)),
        ));
    }

    if form_count > 0 && !any_csrf_indicator {
        findings.push(Finding::new(
            scan_id,
            FindingType::FormSecurity,
            "Forms without CSRF protection indicators",
            "No CSRF token field (csrf/xsrf/_token/authenticity_token) was found in any \
             form on the page.",
            Severity::Moderate,
            "html",
            Some(format!("{} form(s) without a recognizable CSRF token", form_count)),
        ));
    }
}

fn analyze_inline_handlers(scan_id: &str, html: &str, findings: &mut Vec<Finding>) {
    let mut examples: Vec<String> = Vec::new();
    let mut dangerous = false;

    for caps in INLINE_HANDLER_REGEX.captures_iter(html) {
        let event = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let lowered = value.to_ascii_lowercase();

        if lowered.contains("eval(") || lowered.contains("javascript:") {
            dangerous = true;
        }

        if examples.len() < 5 {
            examples.push(format!("on{}={}", event, value));
        }
    }

    if examples.is_empty() {
        return;
    }

    let severity = if dangerous {
        Severity::High
    } else {
        Severity::Moderate
    };

    findings.push(Finding::new(
        scan_id,
        FindingType::InlineEventHandler,
        "Inline event handlers detected",
        "HTML attributes execute inline JavaScript, which defeats strict \
         Content-Security-Policy and mixes markup with code.",
        severity,
        "html",
        Some(examples.join("; ")),
    ));
}

fn analyze_iframes(
    scan_id: &str,
    base: &Url,
    page_host: Option<&str>,
    document: &Html,
    findings: &mut Vec<Finding>,
) {
    let iframe_sel = selector("iframe[src]");

    let mut third_party: Vec<String> = Vec::new();
    let mut insecure: Vec<String> = Vec::new();

    for iframe in document.select(&iframe_sel) {
        let src = match iframe.value().attr("src") {
            Some(s) if !s.trim().is_empty() => s.trim(),
            _ => continue,
        };

        if is_http_absolute(src) {
            insecure.push(src.to_string());
        }

        if let (Some(frame_host), Some(page_host)) = (host_of(src, base), page_host) {
            if frame_host != page_host {
                third_party.push(src.to_string());
            }
        }
    }

    if !third_party.is_empty() {
        findings.push(Finding::new(
            scan_id,
            FindingType::IframeSecurity,
            "Third-party iframes embedded",
            "The page embeds frames from foreign origins; embedded content runs with \
             its own origin but controls part of the visible page.",
            Severity::Moderate,
            "html",
            Some(third_party.iter().take(5).cloned().collect::<Vec<_>>().join("; ")),
        ));
    }

    if !insecure.is_empty() {
        findings.push(Finding::new(
            scan_id,
            FindingType::IframeSecurity,
            "Insecure iframe loaded over HTTP",
            "Frames loaded over plain HTTP can be modified in transit by a network \
             attacker.",
            Severity::High,
            "html",
            Some(insecure.iter().take(5).cloned().collect::<Vec<_>>().join("; ")),
        ));
    }
}

fn analyze_mixed_content(scan_id: &str, _base: &Url, document: &Html, findings: &mut Vec<Finding>) {
    let script_sel = selector("script[src]");
    let link_sel = selector("link[href]");
    let img_sel = selector("img[src]");
    let iframe_sel = selector("iframe[src]");

    let http_scripts = document
        .select(&script_sel)
        .filter(|e| e.value().attr("src").map(is_http_absolute).unwrap_or(false))
        .count();
    let http_links = document
        .select(&link_sel)
        .filter(|e| e.value().attr("href").map(is_http_absolute).unwrap_or(false))
        .count();
    let http_images = document
        .select(&img_sel)
        .filter(|e| e.value().attr("src").map(is_http_absolute).unwrap_or(false))
        .count();
    let insecure_iframes = document
        .select(&iframe_sel)
        .filter(|e| e.value().attr("src").map(is_http_absolute).unwrap_or(false))
        .count();

    let total = http_scripts + http_links + http_images + insecure_iframes;
    if total == 0 {
        return;
    }

    // Active mixed content (scripts, frames) is worse than passive (images, links).
    let severity = if http_scripts > 0 || insecure_iframes > 0 {
        Severity::High
    } else {
        Severity::Moderate
    };

    findings.push(Finding::new(
        scan_id,
        FindingType::SecurityHeader,
        "Mixed content detected on HTTPS page",
        "An HTTPS page loads subresources over plain HTTP, which browsers may block \
         and attackers can tamper with.",
        severity,
        "html",
        Some(format!(
            "{} script(s), {} link(s), {} image(s), {} iframe(s) over http",
            http_scripts, http_links, http_images, insecure_iframes
        )),
    ));
}

fn analyze_script_integrity(
    scan_id: &str,
    base: &Url,
    page_host: Option<&str>,
    document: &Html,
    findings: &mut Vec<Finding>,
) {
    let script_sel = selector("script[src]");

    let mut missing: Vec<String> = Vec::new();

    for script in document.select(&script_sel) {
        let src = match script.value().attr("src") {
            Some(s) if !s.trim().is_empty() => s.trim(),
            _ => continue,
        };

        if !src.to_ascii_lowercase().starts_with("https://") {
            continue;
        }

        let third_party = match (host_of(src, base), page_host) {
            (Some(script_host), Some(page_host)) => script_host != page_host,
            _ => false,
        };

        if third_party && script.value().attr("integrity").is_none() {
            missing.push(src.to_string());
        }
    }

    if !missing.is_empty() {
        findings.push(Finding::new(
            scan_id,
            FindingType::ScriptIntegrity,
            "External scripts without Subresource Integrity",
            "Third-party scripts are loaded without integrity attributes; a compromised \
             CDN can serve arbitrary code to every visitor.",
            Severity::Moderate,
            "html",
            Some(format!(
                "{} script(s): {}",
                missing.len(),
                missing.iter().take(5).cloned().collect::<Vec<_>>().join("; ")
            )),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.title.as_str()).collect()
    }

    #[test]
    fn test_get_form_with_password_on_http() {
        let html = r#"<html><body>
            <form method="GET" action="/login">
              <input type="password" name="pw">
            </form>
        </body></html>"#;

        let findings = analyze_html_surface("scan-1", "http://example.com/login", html);
        let t = titles(&findings);
        assert!(t.contains(&"Forms using GET method detected"));
        assert!(t.contains(&"Password field on a non-HTTPS page"));
        assert!(t.contains(&"Forms without CSRF protection indicators"));

        let pw = findings
            .iter()
            .find(|f| f.title == "Password field on a non-HTTPS page")
            .unwrap();
        assert_eq!(pw.severity, Severity::High);
        let get = findings
            .iter()
            .find(|f| f.title == "Forms using GET method detected")
            .unwrap();
        assert_eq!(get.severity, Severity::Moderate);
    }

    #[test]
    fn test_csrf_indicator_suppresses_finding() {
        let html = r#"<form method="post">
            <input type="hidden" name="csrf_token" value="abc">
            <input type="text" name="q">
        </form>"#;

        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        assert!(!titles(&findings).contains(&"Forms without CSRF protection indicators"));
    }

    #[test]
    fn test_inline_handlers_escalate_on_eval() {
        let html = r#"<div onclick="doThing()"></div><a onmouseover="eval(x)">hi</a>"#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let handler = findings
            .iter()
            .find(|f| f.finding_type == FindingType::InlineEventHandler)
            .unwrap();
        assert_eq!(handler.severity, Severity::High);
        assert!(handler.evidence.as_ref().unwrap().contains("onclick"));
    }

    #[test]
    fn test_inline_handlers_moderate_without_eval() {
        let html = r#"<button onclick="submitForm()">go</button>"#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let handler = findings
            .iter()
            .find(|f| f.finding_type == FindingType::InlineEventHandler)
            .unwrap();
        assert_eq!(handler.severity, Severity::Moderate);
    }

    #[test]
    fn test_iframe_classification() {
        let html = r#"
            <iframe src="https://ads.example.net/frame"></iframe>
            <iframe src="http://widgets.example.org/w"></iframe>
            <iframe src="/local"></iframe>
        "#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let t = titles(&findings);
        assert!(t.contains(&"Third-party iframes embedded"));
        assert!(t.contains(&"Insecure iframe loaded over HTTP"));
    }

    #[test]
    fn test_mixed_content_high_for_scripts() {
        let html = r#"<script src="http://cdn.example.net/foo.js"></script>"#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let mixed = findings
            .iter()
            .find(|f| f.title == "Mixed content detected on HTTPS page")
            .unwrap();
        assert_eq!(mixed.severity, Severity::High);
    }

    #[test]
    fn test_mixed_content_moderate_for_images_only() {
        let html = r#"<img src="http://img.example.net/logo.png">"#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let mixed = findings
            .iter()
            .find(|f| f.title == "Mixed content detected on HTTPS page")
            .unwrap();
        assert_eq!(mixed.severity, Severity::Moderate);
    }

    #[test]
    fn test_mixed_content_skipped_on_http_pages() {
        let html = r#"<script src="http://cdn.example.net/foo.js"></script>"#;
        let findings = analyze_html_surface("scan-1", "http://example.com/", html);
        assert!(!titles(&findings).contains(&"Mixed content detected on HTTPS page"));
    }

    #[test]
    fn test_sri_missing_for_third_party() {
        let html = r#"
            <script src="https://cdn.example.net/lib.js"></script>
            <script src="https://cdn.other.net/ok.js" integrity="sha384-abc"></script>
            <script src="https://example.com/own.js"></script>
        "#;
        let findings = analyze_html_surface("scan-1", "https://example.com/", html);
        let sri = findings
            .iter()
            .find(|f| f.finding_type == FindingType::ScriptIntegrity)
            .unwrap();
        assert!(sri.evidence.as_ref().unwrap().contains("cdn.example.net/lib.js"));
        assert!(!sri.evidence.as_ref().unwrap().contains("ok.js"));
        assert!(!sri.evidence.as_ref().unwrap().contains("own.js"));
    }

    #[test]
    fn test_determinism_same_multiset() {
        let html = r#"
            <form method="get"><input type="text" name="q"></form>
            <div onclick="x()"></div>
            <script src="http://cdn.example.net/a.js"></script>
        "#;
        let a = analyze_html_surface("scan-1", "https://example.com/", html);
        let b = analyze_html_surface("scan-1", "https://example.com/", html);
        let mut ta: Vec<_> = a.iter().map(|f| (f.title.clone(), f.severity)).collect();
        let mut tb: Vec<_> = b.iter().map(|f| (f.title.clone(), f.severity)).collect();
        ta.sort();
        tb.sort();
        assert_eq!(ta, tb);
    }
}
