// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Client-Side Library Detector
 * URL shapes, banner comments, source maps, symbol signatures and version
 * string disclosures, consolidated per library
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::types::Detection;

/// Source maps larger than this are ignored rather than parsed.
const MAX_SOURCE_MAP_BYTES: usize = 20 * 1024 * 1024;

/// Banner comments are only searched in the leading lines of a script.
const COMMENT_SCAN_LINES: usize = 50;

const CONFIDENCE_URL_WITH_VERSION: i32 = 80;
const CONFIDENCE_URL_NAME_ONLY: i32 = 40;
const CONFIDENCE_COMMENT: i32 = 60;
const CONFIDENCE_SOURCE_MAP: i32 = 85;
const CONFIDENCE_SYMBOL: i32 = 65;
const CONFIDENCE_VERSION_STRING: i32 = 95;

// CDN and npm-style path shapes. Order matters: the first match wins per URL.
static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // jsDelivr/unpkg: /npm/name@1.2.3/ or /name@1.2.3/
        r"/(?:npm/)?(@?[a-z0-9][a-z0-9._-]*(?:/[a-z0-9][a-z0-9._-]*)?)@(\d+\.\d+\.\d+[^/]*)/",
        // cdnjs / Google hosted: /ajax/libs/name/1.2.3/
        r"/ajax/libs/([a-z0-9][a-z0-9._-]*)/(\d+\.\d+\.\d+[^/]*)/",
        // Generic: name-1.2.3(.min).js
        r"/([a-z0-9][a-z0-9._-]*?)-(\d+\.\d+\.\d+[^/]*?)(?:\.min)?\.js(?:\?|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid URL_PATTERNS entry"))
    .collect()
});

// Filename without a version still names the library: /jquery.min.js
static URL_NAME_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/([a-z][a-z0-9._-]{2,}?)(?:\.min|\.prod|\.umd)?\.js(?:\?|$)")
        .expect("Invalid URL_NAME_ONLY")
});

// Banner comment shapes found in the first lines of distributed bundles.
static BANNER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/\*!?\s*([A-Za-z][A-Za-z0-9 ._-]{1,40}?)\s+v?(\d+\.\d+\.\d+[\w.-]*)")
        .expect("Invalid BANNER_REGEX")
});

static VERSION_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@version\s+v?(\d+\.\d+\.\d+[\w.-]*)").expect("Invalid VERSION_TAG_REGEX")
});

static VERSION_COLON_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bversion:?\s+v?(\d+\.\d+\.\d+[\w.-]*)").expect("Invalid VERSION_COLON_REGEX")
});

// "jQuery JavaScript Library" style banners that name the library but leave
// the version for a later @version tag.
static BANNER_NAME_ONLY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/\*!?\s*([A-Za-z][A-Za-z0-9._-]{2,30})\s+(?:JavaScript Library|JS Library|Library|Plugin)")
        .expect("Invalid BANNER_NAME_ONLY_REGEX")
});

// node_modules/<name>/... and node_modules/<name>@1.2.3/... source-map entries.
static SOURCE_MAP_PACKAGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"node_modules/(@?[a-z0-9][a-z0-9._-]*(?:/[a-z0-9][a-z0-9._-]*)?)(?:@(\d+\.\d+\.\d+[\w.-]*))?/")
        .expect("Invalid SOURCE_MAP_PACKAGE_REGEX")
});

/// Symbol-level signatures: call expressions, member accesses and string
/// literals characteristic of one library.
static SYMBOL_SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"React\.createElement\s*\(", "react"),
        (r"ReactDOM\.(?:render|createRoot)\s*\(", "react-dom"),
        (r"jQuery\.fn\.jquery", "jquery"),
        (r"\bjQuery\s*\(|\$\.ajax\s*\(", "jquery"),
        (r"Vue\.component\s*\(|Vue\.createApp\s*\(", "vue"),
        (r"angular\.module\s*\(", "angular"),
        (r"_\.(?:chunk|debounce|cloneDeep)\s*\(", "lodash"),
        (r"axios\.(?:get|post|create)\s*\(", "axios"),
        (r"moment\s*\(\s*\)\.format\s*\(", "moment"),
        (r"d3\.(?:select|scaleLinear)\s*\(", "d3"),
    ]
    .iter()
    .map(|(p, name)| (Regex::new(p).expect("Invalid SYMBOL_SIGNATURES entry"), *name))
    .collect()
});

/// `<Lib>.version = "x.y.z"` style runtime disclosures.
static VERSION_STRING_SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r#"React\.version\s*=\s*["'](\d+\.\d+\.\d+[\w.-]*)["']"#, "react"),
        (r#"Vue\.version\s*=\s*["'](\d+\.\d+\.\d+[\w.-]*)["']"#, "vue"),
        (
            r#"jQuery\.fn\.jquery\s*=\s*["'](\d+\.\d+\.\d+[\w.-]*)["']"#,
            "jquery",
        ),
        (
            r#"angular\.version\s*=\s*\{\s*full:\s*["'](\d+\.\d+\.\d+[\w.-]*)["']"#,
            "angular",
        ),
        (r#"\.VERSION\s*=\s*["'](\d+\.\d+\.\d+[\w.-]*)["']"#, ""),
    ]
    .iter()
    .map(|(p, name)| {
        (
            Regex::new(p).expect("Invalid VERSION_STRING_SIGNATURES entry"),
            *name,
        )
    })
    .collect()
});

// Generic filenames that are bundles, not libraries.
const NOT_LIBRARIES: &[&str] = &[
    "main", "index", "bundle", "app", "vendor", "vendors", "chunk", "runtime", "polyfills",
    "common", "script", "scripts", "custom",
];

fn plausible_library_name(name: &str) -> bool {
    !NOT_LIBRARIES.contains(&name) && name.len() >= 2
}

/// Detect libraries referenced by the script URL's path shape.
fn detect_from_url(url: &str) -> Vec<Detection> {
    let lowered = url.to_ascii_lowercase();
    let mut detections = Vec::new();

    for pattern in URL_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&lowered) {
            let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let version = caps.get(2).map(|m| m.as_str().to_string());
            if plausible_library_name(&name) {
                detections.push(Detection {
                    name,
                    version,
                    confidence: CONFIDENCE_URL_WITH_VERSION,
                    detection_method: "url-pattern".to_string(),
                    evidence: url.to_string(),
                });
                return detections;
            }
        }
    }

    if let Some(caps) = URL_NAME_ONLY.captures(&lowered) {
        let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        if plausible_library_name(&name) {
            detections.push(Detection {
                name,
                version: None,
                confidence: CONFIDENCE_URL_NAME_ONLY,
                detection_method: "url-pattern".to_string(),
                evidence: url.to_string(),
            });
        }
    }

    detections
}

/// Scan the leading lines for release banners and version tags. A banner that
/// names the library without a version picks one up from a later
/// `@version x.y.z` / `Version: x.y.z` line in the same header comment.
fn detect_from_comments(content: &str) -> Vec<Detection> {
    let mut detections: Vec<Detection> = Vec::new();
    let mut pending_name: Option<(String, String)> = None;

    for line in content.lines().take(COMMENT_SCAN_LINES) {
        if let Some(caps) = BANNER_REGEX.captures(line) {
            let raw_name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let version = caps.get(2).map(|m| m.as_str().to_string());
            // "jQuery JavaScript Library v3.6.0" -> "jquery"
            let name = raw_name
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            if plausible_library_name(&name) {
                detections.push(Detection {
                    name,
                    version,
                    confidence: CONFIDENCE_COMMENT,
                    detection_method: "comment-banner".to_string(),
                    evidence: line.trim().chars().take(120).collect(),
                });
                pending_name = None;
            }
            continue;
        }

        if let Some(caps) = BANNER_NAME_ONLY_REGEX.captures(line) {
            let name = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            if plausible_library_name(&name) {
                pending_name = Some((name, line.trim().chars().take(120).collect()));
            }
            continue;
        }

        let tag_version = VERSION_TAG_REGEX
            .captures(line)
            .or_else(|| VERSION_COLON_REGEX.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(version) = tag_version {
            if let Some((name, evidence)) = pending_name.take() {
                detections.push(Detection {
                    name,
                    version: Some(version),
                    confidence: CONFIDENCE_COMMENT,
                    detection_method: "comment-banner".to_string(),
                    evidence,
                });
            }
        }
    }

    detections
}

/// Parse a source map and surface every node_modules package it bundles.
fn detect_from_source_map(source_map: &str) -> Vec<Detection> {
    if source_map.len() > MAX_SOURCE_MAP_BYTES {
        debug!(
            size = source_map.len(),
            "Source map exceeds size bound, skipping"
        );
        return Vec::new();
    }

    let parsed: serde_json::Value = match serde_json::from_str(source_map) {
        Ok(v) => v,
        Err(e) => {
            debug!("Source map parse failed: {}", e);
            return Vec::new();
        }
    };

    let sources = match parsed.get("sources").and_then(|s| s.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    let mut seen: HashMap<String, Detection> = HashMap::new();
    for source in sources {
        let path = match source.as_str() {
            Some(s) => s,
            None => continue,
        };
        if let Some(caps) = SOURCE_MAP_PACKAGE_REGEX.captures(path) {
            let name = caps
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let version = caps.get(2).map(|m| m.as_str().to_string());
            if !plausible_library_name(&name) {
                continue;
            }
            let entry = seen.entry(name.clone()).or_insert_with(|| Detection {
                name,
                version: None,
                confidence: CONFIDENCE_SOURCE_MAP,
                detection_method: "source-map".to_string(),
                evidence: path.to_string(),
            });
            if entry.version.is_none() && version.is_some() {
                entry.version = version;
                entry.evidence = path.to_string();
            }
        }
    }

    let mut detections: Vec<Detection> = seen.into_values().collect();
    detections.sort_by(|a, b| a.name.cmp(&b.name));
    detections
}

/// Match characteristic call/member/string symbols against the body.
fn detect_from_symbols(content: &str) -> Vec<Detection> {
    let mut detections = Vec::new();
    for (regex, name) in SYMBOL_SIGNATURES.iter() {
        if let Some(m) = regex.find(content) {
            detections.push(Detection {
                name: name.to_string(),
                version: None,
                confidence: CONFIDENCE_SYMBOL,
                detection_method: "symbol-signature".to_string(),
                evidence: m.as_str().to_string(),
            });
        }
    }
    detections
}

/// Match runtime version-string disclosures.
fn detect_from_version_strings(content: &str) -> Vec<Detection> {
    let mut detections = Vec::new();
    for (regex, name) in VERSION_STRING_SIGNATURES.iter() {
        if name.is_empty() {
            continue; // generic .VERSION shape needs a named owner; skipped
        }
        if let Some(caps) = regex.captures(content) {
            let version = caps.get(1).map(|m| m.as_str().to_string());
            detections.push(Detection {
                name: name.to_string(),
                version,
                confidence: CONFIDENCE_VERSION_STRING,
                detection_method: "version-string".to_string(),
                evidence: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            });
        }
    }
    detections
}

/// Consolidate raw detections by library name: keep the highest confidence,
/// prefer any non-empty version, concatenate methods and union evidence.
pub fn consolidate(detections: Vec<Detection>) -> Vec<Detection> {
    let mut by_name: HashMap<String, Detection> = HashMap::new();

    for detection in detections {
        match by_name.get_mut(&detection.name) {
            None => {
                by_name.insert(detection.name.clone(), detection);
            }
            Some(existing) => {
                if detection.confidence > existing.confidence {
                    existing.confidence = detection.confidence;
                }
                if existing.version.is_none() && detection.version.is_some() {
                    existing.version = detection.version;
                }
                if !existing
                    .detection_method
                    .split('+')
                    .any(|m| m == detection.detection_method)
                {
                    existing.detection_method =
                        format!("{}+{}", existing.detection_method, detection.detection_method);
                }
                if !existing.evidence.contains(&detection.evidence) {
                    existing.evidence =
                        format!("{}; {}", existing.evidence, detection.evidence);
                }
            }
        }
    }

    let mut consolidated: Vec<Detection> = by_name.into_values().collect();
    consolidated.sort_by(|a, b| b.confidence.cmp(&a.confidence).then(a.name.cmp(&b.name)));
    consolidated
}

/// Run every detection method over one script and consolidate the result.
///
/// Any individual method failing (bad source map, parse trouble) contributes
/// zero detections; the task never aborts.
pub fn detect_libraries(
    url: Option<&str>,
    content: &str,
    source_map: Option<&str>,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    if let Some(url) = url {
        detections.extend(detect_from_url(url));
    }
    detections.extend(detect_from_comments(content));
    if let Some(map) = source_map {
        detections.extend(detect_from_source_map(map));
    }
    detections.extend(detect_from_symbols(content));
    detections.extend(detect_from_version_strings(content));

    consolidate(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdn_url_with_version() {
        let detections =
            detect_libraries(Some("https://cdn.jsdelivr.net/npm/vue@3.4.21/dist/vue.global.js"), "", None);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].name, "vue");
        assert_eq!(detections[0].version.as_deref(), Some("3.4.21"));
        assert_eq!(detections[0].confidence, CONFIDENCE_URL_WITH_VERSION);
    }

    #[test]
    fn test_cdnjs_path_shape() {
        let detections = detect_libraries(
            Some("https://cdnjs.cloudflare.com/ajax/libs/jquery/1.12.4/jquery.min.js"),
            "",
            None,
        );
        assert_eq!(detections[0].name, "jquery");
        assert_eq!(detections[0].version.as_deref(), Some("1.12.4"));
    }

    #[test]
    fn test_versioned_filename() {
        let detections = detect_libraries(Some("https://example.com/js/lodash-4.17.21.min.js"), "", None);
        assert_eq!(detections[0].name, "lodash");
        assert_eq!(detections[0].version.as_deref(), Some("4.17.21"));
    }

    #[test]
    fn test_name_only_url_is_low_confidence() {
        let detections = detect_libraries(Some("https://example.com/assets/jquery.min.js"), "", None);
        assert_eq!(detections[0].name, "jquery");
        assert!(detections[0].version.is_none());
        assert_eq!(detections[0].confidence, CONFIDENCE_URL_NAME_ONLY);
    }

    #[test]
    fn test_generic_bundle_names_skipped() {
        let detections = detect_libraries(Some("https://example.com/js/main.min.js"), "", None);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_banner_comment() {
        let content = "/*! jQuery v3.6.0 | (c) OpenJS Foundation */\nvar x = 1;";
        let detections = detect_libraries(None, content, None);
        assert!(detections
            .iter()
            .any(|d| d.name == "jquery" && d.version.as_deref() == Some("3.6.0")));
    }

    #[test]
    fn test_banner_beyond_scan_window_ignored() {
        let mut content = "var x = 1;\n".repeat(60);
        content.push_str("/*! jQuery v3.6.0 */\n");
        let detections = detect_from_comments(&content);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_source_map_detection() {
        let map = r#"{
            "version": 3,
            "sources": [
                "webpack:///./node_modules/react/index.js",
                "webpack:///./node_modules/react-dom@18.2.0/client.js",
                "webpack:///./src/app.js"
            ]
        }"#;
        let detections = detect_from_source_map(map);
        assert_eq!(detections.len(), 2);
        let react_dom = detections.iter().find(|d| d.name == "react-dom").unwrap();
        assert_eq!(react_dom.version.as_deref(), Some("18.2.0"));
        assert_eq!(react_dom.confidence, CONFIDENCE_SOURCE_MAP);
    }

    #[test]
    fn test_malformed_source_map_degrades() {
        assert!(detect_from_source_map("{not json").is_empty());
        assert!(detect_from_source_map(r#"{"version":3}"#).is_empty());
    }

    #[test]
    fn test_symbol_signatures() {
        let content = "React.createElement('div', null); angular.module('app', []);";
        let detections = detect_libraries(None, content, None);
        let names: Vec<&str> = detections.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"react"));
        assert!(names.contains(&"angular"));
    }

    #[test]
    fn test_version_string_wins_consolidation() {
        let content = r#"jQuery.fn.jquery = "1.12.4"; $.ajax({});"#;
        let detections = detect_libraries(Some("https://example.com/jquery.min.js"), content, None);
        assert_eq!(detections.len(), 1);
        let jquery = &detections[0];
        assert_eq!(jquery.name, "jquery");
        assert_eq!(jquery.version.as_deref(), Some("1.12.4"));
        assert_eq!(jquery.confidence, CONFIDENCE_VERSION_STRING);
        assert!(jquery.detection_method.contains("url-pattern"));
        assert!(jquery.detection_method.contains("version-string"));
    }

    #[test]
    fn test_ordered_by_confidence_desc() {
        let content = r#"React.version = "18.2.0"; angular.module('a', []);"#;
        let detections = detect_libraries(None, content, None);
        assert!(detections.len() >= 2);
        assert!(detections.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }
}
