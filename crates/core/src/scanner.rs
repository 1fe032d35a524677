//! Risk-scoring client for sensitive-content leakage checks.
//!
//! Every evaluated turn is sent to an external detection service that scores
//! the exchange against a battery of checks (PII, secrets, evasion, ...).
//! The scanner is strictly advisory: any failure here is logged and swallowed
//! so a scanner outage never blocks challenge evaluation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Structured result of one detection request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub blocking_score: f64,
    pub monitoring_score: f64,
    /// Per-check scores, grouped by category ("blocking" / "monitoring").
    pub detections: HashMap<String, HashMap<String, f64>>,
}

impl ScanReport {
    /// Combined risk across both categories; anything above zero is flagged.
    pub fn combined_score(&self) -> f64 {
        self.blocking_score + self.monitoring_score
    }

    /// All checks that scored above zero, highest first.
    pub fn flagged_checks(&self) -> Vec<(String, f64)> {
        let mut flagged: Vec<(String, f64)> = self
            .detections
            .values()
            .flat_map(|checks| checks.iter())
            .filter(|(_, score)| **score > 0.0)
            .map(|(check, score)| (check.clone(), *score))
            .collect();
        flagged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        flagged
    }
}

/// The detection capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn detect(
        &self,
        prompt: &str,
        response: &str,
        session_key: &str,
        context: &str,
    ) -> Result<ScanReport>;
}

/// HTTP client for the detection API.
pub struct HttpScanner {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    user_name: String,
}

impl HttpScanner {
    pub fn new(base_url: String, api_key: String, user_name: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            user_name,
        }
    }
}

#[async_trait]
impl SecurityScanner for HttpScanner {
    async fn detect(
        &self,
        prompt: &str,
        response: &str,
        session_key: &str,
        context: &str,
    ) -> Result<ScanReport> {
        let payload = json!({
            "user_name": self.user_name,
            "user_role": "student",
            "session_id": session_key,
            "prompt": prompt,
            "rag_content": context,
            "app_response": response,
        });

        let reply = self
            .http
            .post(format!("{}/api/v1/detect", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("detection request failed")?
            .error_for_status()
            .context("detection request rejected")?
            .json::<DetectResponse>()
            .await
            .context("invalid detection response")?;

        Ok(reply.into_report())
    }
}

/// Scanner used when no API key is configured: reports zero risk for every
/// turn, which disables the security-lesson feature without special-casing
/// callers.
pub struct NoopScanner;

#[async_trait]
impl SecurityScanner for NoopScanner {
    async fn detect(&self, _: &str, _: &str, _: &str, _: &str) -> Result<ScanReport> {
        Ok(ScanReport::default())
    }
}

// Wire shape of the detection API response. Scores live under a `debug`
// envelope; every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    debug: DetectDebug,
}

#[derive(Debug, Default, Deserialize)]
struct DetectDebug {
    #[serde(default)]
    score_blocking: f64,
    #[serde(default)]
    score_detect: f64,
    #[serde(default)]
    detections: RawDetections,
}

#[derive(Debug, Default, Deserialize)]
struct RawDetections {
    #[serde(default)]
    block: HashMap<String, f64>,
    #[serde(default)]
    detect: HashMap<String, f64>,
}

impl DetectResponse {
    fn into_report(self) -> ScanReport {
        let mut detections = HashMap::new();
        detections.insert("blocking".to_string(), self.debug.detections.block);
        detections.insert("monitoring".to_string(), self.debug.detections.detect);
        ScanReport {
            blocking_score: self.debug.score_blocking,
            monitoring_score: self.debug.score_detect,
            detections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(blocking: f64, monitoring: f64, checks: &[(&str, &str, f64)]) -> ScanReport {
        let mut detections: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for (category, check, score) in checks {
            detections
                .entry((*category).to_string())
                .or_default()
                .insert((*check).to_string(), *score);
        }
        ScanReport {
            blocking_score: blocking,
            monitoring_score: monitoring,
            detections,
        }
    }

    #[test]
    fn combined_score_sums_both_categories() {
        let report = report_with(0.4, 0.2, &[]);
        assert!((report.combined_score() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn flagged_checks_drop_zero_scores_and_sort_descending() {
        let report = report_with(
            0.5,
            0.0,
            &[
                ("blocking", "input:secret:aws_key", 0.5),
                ("blocking", "input:pii:email", 0.0),
                ("monitoring", "output:llm_evasion:roleplay", 0.9),
            ],
        );
        let flagged = report.flagged_checks();
        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].0, "output:llm_evasion:roleplay");
        assert_eq!(flagged[1].0, "input:secret:aws_key");
    }

    #[test]
    fn wire_response_maps_into_report() {
        let raw = r#"{
            "turn_id": "t-1",
            "score": 0.7,
            "debug": {
                "score_blocking": 0.5,
                "score_detect": 0.2,
                "detections": {
                    "block": { "input:secret:aws_key": 0.5 },
                    "detect": { "output:pii:email": 0.2 },
                    "disabled": []
                }
            }
        }"#;
        let response: DetectResponse = serde_json::from_str(raw).unwrap();
        let report = response.into_report();
        assert!((report.blocking_score - 0.5).abs() < f64::EPSILON);
        assert!((report.monitoring_score - 0.2).abs() < f64::EPSILON);
        assert_eq!(report.detections["blocking"]["input:secret:aws_key"], 0.5);
        assert_eq!(report.detections["monitoring"]["output:pii:email"], 0.2);
    }

    #[test]
    fn missing_debug_envelope_yields_zero_report() {
        let response: DetectResponse = serde_json::from_str(r#"{"turn_id": "t-2"}"#).unwrap();
        let report = response.into_report();
        assert_eq!(report.combined_score(), 0.0);
        assert!(report.flagged_checks().is_empty());
    }

    #[tokio::test]
    async fn noop_scanner_reports_zero_risk() {
        let report = NoopScanner.detect("p", "r", "s", "c").await.unwrap();
        assert_eq!(report, ScanReport::default());
    }
}
