// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - PostgreSQL Database Layer
 * Scan persistence, atomic analysis commits and the vulnerability cache
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::{DatabaseError, ScannerError, ScannerResult};
use crate::types::{
    Finding, FindingType, LibraryRecord, Scan, ScanParameters, ScanStatus, ScriptRecord, Severity,
    Vulnerability, VulnerabilityCacheEntry,
};

/// Scan row plus the script/library counts the diagnostics need.
#[derive(Debug, Clone)]
pub struct ScanWithCounts {
    pub scan: Scan,
    pub script_count: i64,
    pub library_count: i64,
}

/// Aggregate dashboard metrics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyticsSummary {
    pub total_scans: i64,
    pub active_threats: i64,
    pub total_vulnerabilities: i64,
    pub average_risk_score: f64,
    pub average_scan_duration_seconds: f64,
    pub risk_distribution: RiskDistribution,
    pub vulnerability_trends: Vec<DateCount>,
    pub recent_scans: Vec<DateCount>,
    pub libraries_analyzed: i64,
    pub top_vulnerabilities: Vec<TopVulnerability>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RiskDistribution {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DateCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TopVulnerability {
    pub name: String,
    pub severity: Severity,
    pub count: i64,
}

/// PostgreSQL client with connection pooling.
pub struct Database {
    pool: Pool,
    query_timeout: Duration,
}

impl Database {
    /// Create the pool and verify connectivity.
    pub async fn new(config: &DatabaseConfig) -> ScannerResult<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.url = Some(config.database_url.clone());
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(config.max_connections));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                ScannerError::Database(DatabaseError::ConnectionFailed {
                    reason: e.to_string(),
                })
            })?;

        let client = tokio::time::timeout(config.connect_timeout, pool.get())
            .await
            .map_err(|_| {
                ScannerError::Database(DatabaseError::ConnectionFailed {
                    reason: format!("connect timeout after {:?}", config.connect_timeout),
                })
            })??;
        client.query_one("SELECT 1", &[]).await?;

        info!(
            pool_size = config.max_connections,
            "PostgreSQL connected"
        );

        Ok(Self {
            pool,
            query_timeout: config.query_timeout,
        })
    }

    async fn client(&self) -> ScannerResult<deadpool_postgres::Object> {
        Ok(self.pool.get().await?)
    }

    /// Bound a database future by the configured query timeout.
    async fn bounded<T, F>(&self, fut: F) -> ScannerResult<T>
    where
        F: std::future::Future<Output = ScannerResult<T>>,
    {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| {
                ScannerError::Database(DatabaseError::QueryTimeout {
                    timeout: self.query_timeout,
                })
            })?
    }

    /// Pool statistics for health reporting: (size, available).
    pub fn pool_status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the schema if it does not exist yet. Idempotent.
    pub async fn init_schema(&self) -> ScannerResult<()> {
        let client = self.client().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS scans (
                    id TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    parameters JSONB NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    started_at TIMESTAMPTZ,
                    completed_at TIMESTAMPTZ,
                    global_risk_score INT NOT NULL DEFAULT 0,
                    artifact_paths JSONB NOT NULL DEFAULT '{}',
                    error TEXT
                );

                CREATE TABLE IF NOT EXISTS scripts (
                    id TEXT PRIMARY KEY,
                    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
                    source_url TEXT,
                    is_inline BOOLEAN NOT NULL,
                    artifact_path TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    detected_patterns JSONB NOT NULL DEFAULT '[]',
                    estimated_version TEXT,
                    confidence INT NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS libraries (
                    id TEXT PRIMARY KEY,
                    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    detected_version TEXT,
                    related_scripts JSONB NOT NULL DEFAULT '[]',
                    detection_method TEXT NOT NULL DEFAULT '',
                    vulnerabilities JSONB NOT NULL DEFAULT '[]',
                    risk_score INT NOT NULL DEFAULT 0,
                    confidence INT NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS findings (
                    id TEXT PRIMARY KEY,
                    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
                    finding_type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    location TEXT NOT NULL,
                    evidence TEXT
                );

                CREATE TABLE IF NOT EXISTS vulnerability_cache (
                    package_name TEXT NOT NULL,
                    version TEXT NOT NULL DEFAULT '',
                    vulnerabilities JSONB NOT NULL DEFAULT '[]',
                    last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    ttl_seconds BIGINT NOT NULL DEFAULT 86400,
                    PRIMARY KEY (package_name, version)
                );

                CREATE INDEX IF NOT EXISTS idx_scans_url_created ON scans(url, created_at DESC);
                CREATE INDEX IF NOT EXISTS idx_scans_created ON scans(created_at DESC, id DESC);
                CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
                CREATE INDEX IF NOT EXISTS idx_scripts_scan ON scripts(scan_id);
                CREATE INDEX IF NOT EXISTS idx_libraries_scan ON libraries(scan_id);
                CREATE INDEX IF NOT EXISTS idx_findings_scan ON findings(scan_id);
                CREATE INDEX IF NOT EXISTS idx_findings_severity ON findings(severity);
                "#,
            )
            .await?;

        info!("Database schema initialized");
        Ok(())
    }

    fn row_to_scan(row: &tokio_postgres::Row) -> ScannerResult<Scan> {
        let parameters: Value = row.get("parameters");
        let artifact_paths: Value = row.get("artifact_paths");
        let status: String = row.get("status");

        Ok(Scan {
            id: row.get("id"),
            url: row.get("url"),
            parameters: serde_json::from_value::<ScanParameters>(parameters)
                .unwrap_or_default(),
            status: ScanStatus::parse(&status).ok_or_else(|| {
                ScannerError::Database(DatabaseError::Other(format!(
                    "unknown scan status '{}'",
                    status
                )))
            })?,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            global_risk_score: row.get("global_risk_score"),
            artifact_paths: serde_json::from_value::<HashMap<String, String>>(artifact_paths)
                .unwrap_or_default(),
            error: row.get("error"),
        })
    }

    // ------------------------------------------------------------------
    // Scan CRUD
    // ------------------------------------------------------------------

    pub async fn create_scan(&self, scan: &Scan) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            client
                .execute(
                    r#"
                    INSERT INTO scans (id, url, parameters, status, created_at, global_risk_score, artifact_paths)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                    &[
                        &scan.id,
                        &scan.url,
                        &serde_json::to_value(&scan.parameters)?,
                        &scan.status.as_str(),
                        &scan.created_at,
                        &scan.global_risk_score,
                        &serde_json::to_value(&scan.artifact_paths)?,
                    ],
                )
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn get_scan(&self, scan_id: &str) -> ScannerResult<Option<Scan>> {
        let client = self.client().await?;
        self.bounded(async {
            let row = client
                .query_opt("SELECT * FROM scans WHERE id = $1", &[&scan_id])
                .await?;
            row.as_ref().map(Self::row_to_scan).transpose()
        })
        .await
    }

    /// List scans ordered `created_at DESC, id DESC`; limit clamped to 100.
    pub async fn list_scans(&self, limit: i64, offset: i64) -> ScannerResult<(Vec<Scan>, i64)> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);
        let client = self.client().await?;
        self.bounded(async {
            let total: i64 = client
                .query_one("SELECT COUNT(*) FROM scans", &[])
                .await?
                .get(0);

            let rows = client
                .query(
                    "SELECT * FROM scans ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
                    &[&limit, &offset],
                )
                .await?;

            let scans = rows
                .iter()
                .map(Self::row_to_scan)
                .collect::<ScannerResult<Vec<_>>>()?;
            Ok((scans, total))
        })
        .await
    }

    /// Most recent scan for a URL regardless of status. Used by the cooldown check.
    pub async fn latest_scan_for_url(&self, url: &str) -> ScannerResult<Option<Scan>> {
        let client = self.client().await?;
        self.bounded(async {
            let row = client
                .query_opt(
                    "SELECT * FROM scans WHERE url = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
                    &[&url],
                )
                .await?;
            row.as_ref().map(Self::row_to_scan).transpose()
        })
        .await
    }

    /// Recent completed scans for a URL with script/library counts, newest first.
    pub async fn completed_scans_for_url(
        &self,
        url: &str,
        limit: i64,
    ) -> ScannerResult<Vec<ScanWithCounts>> {
        let client = self.client().await?;
        self.bounded(async {
            let rows = client
                .query(
                    r#"
                    SELECT s.*,
                        (SELECT COUNT(*) FROM scripts sc WHERE sc.scan_id = s.id) AS script_count,
                        (SELECT COUNT(*) FROM libraries l WHERE l.scan_id = s.id) AS library_count
                    FROM scans s
                    WHERE s.url = $1 AND s.status = 'completed'
                    ORDER BY s.created_at DESC, s.id DESC
                    LIMIT $2
                    "#,
                    &[&url, &limit],
                )
                .await?;

            rows.iter()
                .map(|row| {
                    Ok(ScanWithCounts {
                        scan: Self::row_to_scan(row)?,
                        script_count: row.get("script_count"),
                        library_count: row.get("library_count"),
                    })
                })
                .collect()
        })
        .await
    }

    /// Mark a scan running; sets `started_at` only on the first transition.
    pub async fn mark_scan_running(&self, scan_id: &str) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            client
                .execute(
                    r#"
                    UPDATE scans
                    SET status = 'running',
                        started_at = COALESCE(started_at, NOW()),
                        error = NULL
                    WHERE id = $1 AND status IN ('pending', 'running')
                    "#,
                    &[&scan_id],
                )
                .await?;
            Ok(())
        })
        .await
    }

    /// Terminal failure; immutable once `completed_at` is set.
    pub async fn mark_scan_failed(&self, scan_id: &str, error: &str) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            let updated = client
                .execute(
                    r#"
                    UPDATE scans
                    SET status = 'failed', completed_at = NOW(), error = $2
                    WHERE id = $1 AND completed_at IS NULL
                    "#,
                    &[&scan_id, &error],
                )
                .await?;
            if updated == 0 {
                debug!(scan_id, "Scan already terminal, failure not recorded");
            }
            Ok(())
        })
        .await
    }

    /// Compare-and-set status update used by API-side reconciliation so a
    /// concurrent worker write is never clobbered.
    pub async fn cas_scan_status(
        &self,
        scan_id: &str,
        from: ScanStatus,
        to: ScanStatus,
        error: Option<&str>,
    ) -> ScannerResult<bool> {
        let client = self.client().await?;
        self.bounded(async {
            let updated = client
                .execute(
                    r#"
                    UPDATE scans
                    SET status = $3,
                        started_at = CASE WHEN $3 IN ('running','completed','failed')
                                          THEN COALESCE(started_at, NOW()) ELSE started_at END,
                        completed_at = CASE WHEN $3 IN ('completed','failed')
                                            THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
                        error = COALESCE($4, error)
                    WHERE id = $1 AND status = $2
                    "#,
                    &[&scan_id, &from.as_str(), &to.as_str(), &error],
                )
                .await?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn set_artifact_paths(
        &self,
        scan_id: &str,
        paths: &HashMap<String, String>,
    ) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            client
                .execute(
                    "UPDATE scans SET artifact_paths = $2 WHERE id = $1",
                    &[&scan_id, &serde_json::to_value(paths)?],
                )
                .await?;
            Ok(())
        })
        .await
    }

    /// Delete a scan; scripts/libraries/findings cascade. Returns false when
    /// the scan did not exist.
    pub async fn delete_scan(&self, scan_id: &str) -> ScannerResult<bool> {
        let client = self.client().await?;
        self.bounded(async {
            let deleted = client
                .execute("DELETE FROM scans WHERE id = $1", &[&scan_id])
                .await?;
            Ok(deleted > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Analysis commit
    // ------------------------------------------------------------------

    /// True when the scan already has persisted analysis rows.
    pub async fn scan_has_results(&self, scan_id: &str) -> ScannerResult<bool> {
        let client = self.client().await?;
        self.bounded(async {
            let row = client
                .query_one(
                    r#"
                    SELECT
                        (SELECT COUNT(*) FROM libraries WHERE scan_id = $1) +
                        (SELECT COUNT(*) FROM findings WHERE scan_id = $1) AS n
                    "#,
                    &[&scan_id],
                )
                .await?;
            let n: i64 = row.get("n");
            Ok(n > 0)
        })
        .await
    }

    /// Commit the complete analysis result in one transaction: all scripts,
    /// libraries and findings plus the scan's risk score and terminal status.
    pub async fn commit_analysis(
        &self,
        scan_id: &str,
        scripts: &[ScriptRecord],
        libraries: &[LibraryRecord],
        findings: &[Finding],
        global_risk_score: i32,
    ) -> ScannerResult<()> {
        let mut client = self.client().await?;
        self.bounded(async {
            let transaction = client.transaction().await.map_err(|e| {
                ScannerError::Database(DatabaseError::TransactionFailed {
                    reason: e.to_string(),
                })
            })?;

            for script in scripts {
                transaction
                    .execute(
                        r#"
                        INSERT INTO scripts
                            (id, scan_id, source_url, is_inline, artifact_path, fingerprint,
                             detected_patterns, estimated_version, confidence)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#,
                        &[
                            &script.id,
                            &script.scan_id,
                            &script.source_url,
                            &script.is_inline,
                            &script.artifact_path,
                            &script.fingerprint,
                            &serde_json::to_value(&script.detected_patterns)?,
                            &script.estimated_version,
                            &script.confidence,
                        ],
                    )
                    .await?;
            }

            for library in libraries {
                transaction
                    .execute(
                        r#"
                        INSERT INTO libraries
                            (id, scan_id, name, detected_version, related_scripts,
                             detection_method, vulnerabilities, risk_score, confidence)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#,
                        &[
                            &library.id,
                            &library.scan_id,
                            &library.name,
                            &library.detected_version,
                            &serde_json::to_value(&library.related_scripts)?,
                            &library.detection_method,
                            &serde_json::to_value(&library.vulnerabilities)?,
                            &library.risk_score,
                            &library.confidence,
                        ],
                    )
                    .await?;
            }

            for finding in findings {
                transaction
                    .execute(
                        r#"
                        INSERT INTO findings
                            (id, scan_id, finding_type, title, description, severity,
                             location, evidence)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        "#,
                        &[
                            &finding.id,
                            &finding.scan_id,
                            &finding.finding_type.as_str(),
                            &finding.title,
                            &finding.description,
                            &finding.severity.as_str(),
                            &finding.location,
                            &finding.evidence,
                        ],
                    )
                    .await?;
            }

            transaction
                .execute(
                    r#"
                    UPDATE scans
                    SET status = 'completed',
                        completed_at = NOW(),
                        global_risk_score = $2,
                        error = NULL
                    WHERE id = $1
                    "#,
                    &[&scan_id, &global_risk_score],
                )
                .await?;

            transaction.commit().await.map_err(|e| {
                ScannerError::Database(DatabaseError::TransactionFailed {
                    reason: e.to_string(),
                })
            })?;

            info!(
                scan_id,
                scripts = scripts.len(),
                libraries = libraries.len(),
                findings = findings.len(),
                risk = global_risk_score,
                "Analysis committed"
            );
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Result reads
    // ------------------------------------------------------------------

    pub async fn get_scripts(&self, scan_id: &str) -> ScannerResult<Vec<ScriptRecord>> {
        let client = self.client().await?;
        self.bounded(async {
            let rows = client
                .query(
                    "SELECT * FROM scripts WHERE scan_id = $1 ORDER BY id",
                    &[&scan_id],
                )
                .await?;
            rows.iter()
                .map(|row| {
                    let patterns: Value = row.get("detected_patterns");
                    Ok(ScriptRecord {
                        id: row.get("id"),
                        scan_id: row.get("scan_id"),
                        source_url: row.get("source_url"),
                        is_inline: row.get("is_inline"),
                        artifact_path: row.get("artifact_path"),
                        fingerprint: row.get("fingerprint"),
                        detected_patterns: serde_json::from_value(patterns).unwrap_or_default(),
                        estimated_version: row.get("estimated_version"),
                        confidence: row.get("confidence"),
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn get_libraries(&self, scan_id: &str) -> ScannerResult<Vec<LibraryRecord>> {
        let client = self.client().await?;
        self.bounded(async {
            let rows = client
                .query(
                    "SELECT * FROM libraries WHERE scan_id = $1 ORDER BY risk_score DESC, name",
                    &[&scan_id],
                )
                .await?;
            rows.iter()
                .map(|row| {
                    let related: Value = row.get("related_scripts");
                    let vulns: Value = row.get("vulnerabilities");
                    Ok(LibraryRecord {
                        id: row.get("id"),
                        scan_id: row.get("scan_id"),
                        name: row.get("name"),
                        detected_version: row.get("detected_version"),
                        related_scripts: serde_json::from_value(related).unwrap_or_default(),
                        detection_method: row.get("detection_method"),
                        vulnerabilities: serde_json::from_value(vulns).unwrap_or_default(),
                        risk_score: row.get("risk_score"),
                        confidence: row.get("confidence"),
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn get_findings(&self, scan_id: &str) -> ScannerResult<Vec<Finding>> {
        let client = self.client().await?;
        self.bounded(async {
            let rows = client
                .query(
                    "SELECT * FROM findings WHERE scan_id = $1 ORDER BY severity DESC, title",
                    &[&scan_id],
                )
                .await?;
            rows.iter()
                .map(|row| {
                    let type_str: String = row.get("finding_type");
                    let severity_str: String = row.get("severity");
                    let finding_type = serde_json::from_value::<FindingType>(Value::String(
                        type_str.clone(),
                    ))
                    .unwrap_or(FindingType::Info);
                    Ok(Finding {
                        id: row.get("id"),
                        scan_id: row.get("scan_id"),
                        finding_type,
                        title: row.get("title"),
                        description: row.get("description"),
                        severity: Severity::parse(&severity_str).unwrap_or(Severity::Low),
                        location: row.get("location"),
                        evidence: row.get("evidence"),
                    })
                })
                .collect()
        })
        .await
    }

    /// Script/library counts for diagnostics on one scan.
    pub async fn result_counts(&self, scan_id: &str) -> ScannerResult<(i64, i64)> {
        let client = self.client().await?;
        self.bounded(async {
            let row = client
                .query_one(
                    r#"
                    SELECT
                        (SELECT COUNT(*) FROM scripts WHERE scan_id = $1) AS scripts,
                        (SELECT COUNT(*) FROM libraries WHERE scan_id = $1) AS libraries
                    "#,
                    &[&scan_id],
                )
                .await?;
            Ok((row.get("scripts"), row.get("libraries")))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Vulnerability cache
    // ------------------------------------------------------------------

    pub async fn get_vulnerability_cache(
        &self,
        package_name: &str,
        version: Option<&str>,
    ) -> ScannerResult<Option<VulnerabilityCacheEntry>> {
        let version = version.unwrap_or("");
        let client = self.client().await?;
        self.bounded(async {
            let row = client
                .query_opt(
                    "SELECT * FROM vulnerability_cache WHERE package_name = $1 AND version = $2",
                    &[&package_name, &version],
                )
                .await?;
            row.map(|row| {
                let vulns: Value = row.get("vulnerabilities");
                Ok(VulnerabilityCacheEntry {
                    package_name: row.get("package_name"),
                    version: row.get("version"),
                    vulnerabilities: serde_json::from_value::<Vec<Vulnerability>>(vulns)
                        .unwrap_or_default(),
                    last_updated: row.get("last_updated"),
                    ttl_seconds: row.get("ttl_seconds"),
                })
            })
            .transpose()
        })
        .await
    }

    /// Last-writer-wins upsert keyed `(package_name, version)`.
    pub async fn upsert_vulnerability_cache(
        &self,
        entry: &VulnerabilityCacheEntry,
    ) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            client
                .execute(
                    r#"
                    INSERT INTO vulnerability_cache
                        (package_name, version, vulnerabilities, last_updated, ttl_seconds)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (package_name, version) DO UPDATE SET
                        vulnerabilities = EXCLUDED.vulnerabilities,
                        last_updated = EXCLUDED.last_updated,
                        ttl_seconds = EXCLUDED.ttl_seconds
                    "#,
                    &[
                        &entry.package_name,
                        &entry.version,
                        &serde_json::to_value(&entry.vulnerabilities)?,
                        &entry.last_updated,
                        &entry.ttl_seconds,
                    ],
                )
                .await?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------

    pub async fn analytics_summary(&self) -> ScannerResult<AnalyticsSummary> {
        let client = self.client().await?;
        self.bounded(async {
            let totals = client
                .query_one(
                    r#"
                    SELECT
                        (SELECT COUNT(*) FROM scans) AS total_scans,
                        (SELECT COUNT(*) FROM libraries) AS libraries_analyzed,
                        (SELECT COALESCE(SUM(jsonb_array_length(vulnerabilities)), 0)
                         FROM libraries) AS total_vulnerabilities,
                        (SELECT COUNT(*)
                         FROM libraries l, jsonb_array_elements(l.vulnerabilities) v
                         WHERE v->>'severity' = 'critical') AS active_threats,
                        (SELECT COALESCE(AVG(global_risk_score), 0)::double precision
                         FROM scans WHERE status = 'completed') AS average_risk,
                        (SELECT COALESCE(AVG(EXTRACT(EPOCH FROM completed_at - started_at)), 0)::double precision
                         FROM scans
                         WHERE status = 'completed'
                           AND started_at IS NOT NULL
                           AND completed_at IS NOT NULL) AS average_duration
                    "#,
                    &[],
                )
                .await?;

            let distribution_row = client
                .query_one(
                    r#"
                    SELECT
                        COUNT(*) FILTER (WHERE global_risk_score >= 80) AS critical,
                        COUNT(*) FILTER (WHERE global_risk_score >= 60 AND global_risk_score < 80) AS high,
                        COUNT(*) FILTER (WHERE global_risk_score >= 30 AND global_risk_score < 60) AS medium,
                        COUNT(*) FILTER (WHERE global_risk_score < 30) AS low
                    FROM scans WHERE status = 'completed'
                    "#,
                    &[],
                )
                .await?;

            let trend_rows = client
                .query(
                    r#"
                    SELECT TO_CHAR(s.created_at::date, 'YYYY-MM-DD') AS date,
                           COALESCE(SUM(jsonb_array_length(l.vulnerabilities)), 0) AS count
                    FROM scans s
                    JOIN libraries l ON l.scan_id = s.id
                    WHERE s.created_at >= NOW() - INTERVAL '30 days'
                    GROUP BY s.created_at::date
                    ORDER BY s.created_at::date
                    "#,
                    &[],
                )
                .await?;

            let recent_rows = client
                .query(
                    r#"
                    SELECT TO_CHAR(created_at::date, 'YYYY-MM-DD') AS date,
                           COUNT(*) AS count
                    FROM scans
                    WHERE created_at >= NOW() - INTERVAL '7 days'
                    GROUP BY created_at::date
                    ORDER BY created_at::date
                    "#,
                    &[],
                )
                .await?;

            let top_rows = client
                .query(
                    r#"
                    SELECT v->>'id' AS name,
                           MAX(CASE v->>'severity'
                               WHEN 'critical' THEN 4
                               WHEN 'high' THEN 3
                               WHEN 'moderate' THEN 2
                               ELSE 1 END) AS severity_rank,
                           COUNT(*) AS count
                    FROM libraries l, jsonb_array_elements(l.vulnerabilities) v
                    GROUP BY v->>'id'
                    ORDER BY count DESC, name
                    LIMIT 5
                    "#,
                    &[],
                )
                .await?;

            Ok(AnalyticsSummary {
                total_scans: totals.get("total_scans"),
                active_threats: totals.get("active_threats"),
                total_vulnerabilities: totals.get("total_vulnerabilities"),
                average_risk_score: totals.get("average_risk"),
                average_scan_duration_seconds: totals.get("average_duration"),
                risk_distribution: RiskDistribution {
                    critical: distribution_row.get("critical"),
                    high: distribution_row.get("high"),
                    medium: distribution_row.get("medium"),
                    low: distribution_row.get("low"),
                },
                vulnerability_trends: trend_rows
                    .iter()
                    .map(|row| DateCount {
                        date: row.get("date"),
                        count: row.get("count"),
                    })
                    .collect(),
                recent_scans: recent_rows
                    .iter()
                    .map(|row| DateCount {
                        date: row.get("date"),
                        count: row.get("count"),
                    })
                    .collect(),
                libraries_analyzed: totals.get("libraries_analyzed"),
                top_vulnerabilities: top_rows
                    .iter()
                    .map(|row| {
                        let rank: i32 = row.get("severity_rank");
                        TopVulnerability {
                            name: row.get::<_, Option<String>>("name").unwrap_or_default(),
                            severity: match rank {
                                4 => Severity::Critical,
                                3 => Severity::High,
                                2 => Severity::Moderate,
                                _ => Severity::Low,
                            },
                            count: row.get("count"),
                        }
                    })
                    .collect(),
            })
        })
        .await
    }

    /// Ping used by the health checker.
    pub async fn ping(&self) -> ScannerResult<()> {
        let client = self.client().await?;
        self.bounded(async {
            client.query_one("SELECT 1", &[]).await?;
            Ok(())
        })
        .await
    }

    /// Reconcile expiry: delete cache rows whose TTL elapsed. Best-effort.
    pub async fn prune_vulnerability_cache(&self) -> ScannerResult<u64> {
        let client = self.client().await?;
        self.bounded(async {
            let pruned = client
                .execute(
                    "DELETE FROM vulnerability_cache \
                     WHERE last_updated + (ttl_seconds || ' seconds')::interval < NOW()",
                    &[],
                )
                .await?;
            if pruned > 0 {
                debug!(pruned, "Expired vulnerability cache entries removed");
            }
            Ok(pruned)
        })
        .await
    }
}

/// Time since a scan was created, in whole seconds. Used by the cooldown check.
pub fn seconds_since(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_seconds()
}

/// Remaining cooldown seconds for the most recent scan of a URL, or None when
/// the window has passed.
pub fn cooldown_remaining(
    latest_created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Option<i64> {
    let elapsed = seconds_since(latest_created_at, now);
    let window = cooldown.as_secs() as i64;
    if elapsed < window {
        Some(window - elapsed)
    } else {
        None
    }
}
