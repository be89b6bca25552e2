// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Pattern & surface analyzer: pure deterministic functions over HTML bodies,
//! script contents and response headers. Same inputs always produce the same
//! multiset of findings.

pub mod headers;
pub mod patterns;
pub mod surface;

pub use headers::analyze_headers;
pub use patterns::{detect_risky_patterns, findings_from_pattern_hits, PatternHit};
pub use surface::analyze_html_surface;
