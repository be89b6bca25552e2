// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Library Detector Tests
 * URL shapes, banners, source maps, symbols and consolidation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use shieldeye::detector::{consolidate, detect_libraries};
use shieldeye::types::Detection;

#[test]
fn jsdelivr_url_yields_name_and_version() {
    let detections = detect_libraries(
        Some("https://cdn.jsdelivr.net/npm/jquery@1.12.4/dist/jquery.min.js"),
        "",
        None,
    );
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].name, "jquery");
    assert_eq!(detections[0].version.as_deref(), Some("1.12.4"));
    assert!(detections[0].confidence >= 80);
}

#[test]
fn banner_comment_supplies_version() {
    let body = "/*! Bootstrap v5.3.2 (https://getbootstrap.com/) */\n!function(){}();";
    let detections = detect_libraries(None, body, None);
    let bootstrap = detections.iter().find(|d| d.name == "bootstrap").unwrap();
    assert_eq!(bootstrap.version.as_deref(), Some("5.3.2"));
}

#[test]
fn name_only_banner_picks_up_version_tag() {
    let body = "/*! Chart Library\n * @version 4.4.1\n */\n!function(){}();";
    let detections = detect_libraries(None, body, None);
    let chart = detections.iter().find(|d| d.name == "chart").unwrap();
    assert_eq!(chart.version.as_deref(), Some("4.4.1"));
    assert!(chart.detection_method.contains("comment-banner"));
}

#[test]
fn source_map_names_bundled_packages() {
    let map = r#"{
        "version": 3,
        "file": "bundle.js",
        "sources": [
            "webpack:///./node_modules/react/cjs/react.production.min.js",
            "webpack:///./node_modules/lodash@4.17.21/lodash.js",
            "webpack:///./src/index.js"
        ],
        "mappings": "AAAA"
    }"#;

    let detections = detect_libraries(Some("https://app.example.com/static/bundle.js"), "", Some(map));
    let names: Vec<&str> = detections.iter().map(|d| d.name.as_str()).collect();
    assert!(names.contains(&"react"));
    assert!(names.contains(&"lodash"));

    let lodash = detections.iter().find(|d| d.name == "lodash").unwrap();
    assert_eq!(lodash.version.as_deref(), Some("4.17.21"));
    assert!(lodash.detection_method.contains("source-map"));
}

#[test]
fn corrupt_source_map_degrades_to_other_methods() {
    let body = "jQuery.fn.jquery = \"3.6.4\";";
    let detections = detect_libraries(
        Some("https://example.com/assets/jquery.min.js"),
        body,
        Some("{{{ not json"),
    );
    // The bad map contributes nothing; URL + version string still detect.
    let jquery = detections.iter().find(|d| d.name == "jquery").unwrap();
    assert_eq!(jquery.version.as_deref(), Some("3.6.4"));
}

#[test]
fn symbol_signatures_detect_frameworks_without_urls() {
    let body = r#"
        var el = React.createElement('div', props);
        angular.module('shop', ['ngRoute']);
        _.debounce(update, 250);
    "#;
    let detections = detect_libraries(None, body, None);
    let names: Vec<&str> = detections.iter().map(|d| d.name.as_str()).collect();
    assert!(names.contains(&"react"));
    assert!(names.contains(&"angular"));
    assert!(names.contains(&"lodash"));
}

#[test]
fn consolidation_keeps_best_of_each_method() {
    let detections = vec![
        Detection {
            name: "vue".to_string(),
            version: None,
            confidence: 40,
            detection_method: "url-pattern".to_string(),
            evidence: "https://example.com/vue.min.js".to_string(),
        },
        Detection {
            name: "vue".to_string(),
            version: Some("3.4.21".to_string()),
            confidence: 95,
            detection_method: "version-string".to_string(),
            evidence: "Vue.version = \"3.4.21\"".to_string(),
        },
        Detection {
            name: "vue".to_string(),
            version: None,
            confidence: 65,
            detection_method: "symbol-signature".to_string(),
            evidence: "Vue.createApp(".to_string(),
        },
    ];

    let consolidated = consolidate(detections);
    assert_eq!(consolidated.len(), 1);
    let vue = &consolidated[0];
    assert_eq!(vue.confidence, 95);
    assert_eq!(vue.version.as_deref(), Some("3.4.21"));
    for method in ["url-pattern", "version-string", "symbol-signature"] {
        assert!(
            vue.detection_method.contains(method),
            "missing method {} in {}",
            method,
            vue.detection_method
        );
    }
}

#[test]
fn detections_are_ordered_by_confidence() {
    let body = r#"
        jQuery.fn.jquery = "3.5.1";
        angular.module('app', []);
    "#;
    let detections = detect_libraries(None, body, None);
    assert!(detections.len() >= 2);
    for window in detections.windows(2) {
        assert!(window[0].confidence >= window[1].confidence);
    }
    assert_eq!(detections[0].name, "jquery");
}

#[test]
fn bundle_filenames_are_not_libraries() {
    for url in [
        "https://example.com/js/main.min.js",
        "https://example.com/static/bundle.js",
        "https://example.com/app.js",
        "https://example.com/vendor.min.js",
    ] {
        let detections = detect_libraries(Some(url), "", None);
        assert!(detections.is_empty(), "{} produced {:?}", url, detections);
    }
}
