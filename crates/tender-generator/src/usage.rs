/// Generation statistics kept in a Redis hash: document outcomes, per-section outcomes and
/// attempts, and upstream generation calls with their token totals.
///
/// Hash fields:
/// - `documents:COMPLETE` / `documents:PARTIAL`
/// - `section:<SECTION_ID>:success` / `:failed` / `:attempts`
/// - `generation:requests`, `generation:tokens`, `generation:tokens_unknown`
///
/// Every operation is a no-op without Redis.
use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tender_common::openai::ChatCompletionUsage;
use tender_common::redis::RedisCache;

use crate::model::{DocumentStatus, SectionId, SectionStatus, TenderDocument, SECTIONS};

const USAGE_KEY: &str = "tender:v1:usage";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UsageStats {
    pub redis_available: bool,
    pub documents_complete: u64,
    pub documents_partial: u64,
    /// One entry per section, in canonical order.
    pub sections: Vec<SectionUsage>,
    pub generation_requests: u64,
    /// Sum of `total_tokens` over the requests where upstream reported it.
    pub total_tokens: u64,
    pub requests_without_token_counts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionUsage {
    pub section: String,
    pub succeeded: u64,
    pub failed: u64,
    /// Generation attempts spent on this section, retries included.
    pub attempts: u64,
}

#[derive(Clone)]
pub struct UsageTracker {
    redis: RedisCache,
}

impl UsageTracker {
    pub fn new(redis: RedisCache) -> Self {
        Self { redis }
    }

    /// Count one upstream generation call.
    pub async fn record_generation(&self, usage: Option<&ChatCompletionUsage>) {
        self.redis
            .hincr_all(USAGE_KEY, &generation_increments(usage))
            .await;
    }

    /// Count the outcome of a finished document and each of its sections.
    pub async fn record_document(&self, document: &TenderDocument) {
        self.redis
            .hincr_all(USAGE_KEY, &document_increments(document))
            .await;
    }

    pub async fn get_usage_stats(&self) -> UsageStats {
        let redis_available = self.redis.is_available().await;
        let entries = self.redis.hgetall(USAGE_KEY).await.unwrap_or_default();
        UsageStats {
            redis_available,
            ..aggregate(&entries)
        }
    }
}

fn generation_increments(usage: Option<&ChatCompletionUsage>) -> Vec<(String, i64)> {
    let mut increments = vec![("generation:requests".to_string(), 1)];
    match usage.and_then(|u| u.total_tokens) {
        Some(total) => increments.push(("generation:tokens".to_string(), total as i64)),
        None => increments.push(("generation:tokens_unknown".to_string(), 1)),
    }
    increments
}

fn document_increments(document: &TenderDocument) -> Vec<(String, i64)> {
    let outcome = match document.overall_status() {
        DocumentStatus::Complete => "documents:COMPLETE",
        DocumentStatus::Partial => "documents:PARTIAL",
    };
    let mut increments = vec![(outcome.to_string(), 1)];

    for section in document.sections() {
        let id = section.section().as_str();
        let status = match section.status() {
            SectionStatus::Success => "success",
            SectionStatus::Failed => "failed",
        };
        increments.push((format!("section:{id}:{status}"), 1));
        if section.attempts() > 0 {
            increments.push((format!("section:{id}:attempts"), i64::from(section.attempts())));
        }
    }
    increments
}

fn aggregate(entries: &HashMap<String, String>) -> UsageStats {
    let count = |field: &str| {
        entries
            .get(field)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    let section_usage = |id: SectionId| SectionUsage {
        section: id.as_str().to_string(),
        succeeded: count(&format!("section:{id}:success")),
        failed: count(&format!("section:{id}:failed")),
        attempts: count(&format!("section:{id}:attempts")),
    };

    UsageStats {
        redis_available: false,
        documents_complete: count("documents:COMPLETE"),
        documents_partial: count("documents:PARTIAL"),
        sections: SECTIONS.iter().map(|s| section_usage(s.id)).collect(),
        generation_requests: count("generation:requests"),
        total_tokens: count("generation:tokens"),
        requests_without_token_counts: count("generation:tokens_unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectBrief, SectionResult};

    fn document() -> TenderDocument {
        let brief = ProjectBrief::new(
            "Municipal Road Resurfacing",
            "Springfield",
            "6 months",
            "Resurface 12km of arterial road including drainage upgrades.",
        );
        let results = SECTIONS
            .iter()
            .map(|s| match s.id {
                SectionId::PriceBid => SectionResult::failed(s.id, "rate limited", 3),
                SectionId::TermsAndConditions => {
                    SectionResult::failed(s.id, "generation cancelled before this section started", 0)
                }
                _ => SectionResult::success(s.id, format!("Body of {}.", s.display_name), 1),
            })
            .collect();
        TenderDocument::assemble(brief, results)
    }

    #[test]
    fn document_outcomes_become_section_counters() {
        let increments: HashMap<String, i64> = document_increments(&document()).into_iter().collect();

        assert_eq!(increments.get("documents:PARTIAL"), Some(&1));
        assert!(!increments.contains_key("documents:COMPLETE"));
        assert_eq!(increments.get("section:SCOPE_OF_WORK:success"), Some(&1));
        assert_eq!(increments.get("section:SCOPE_OF_WORK:attempts"), Some(&1));
        assert_eq!(increments.get("section:PRICE_BID:failed"), Some(&1));
        assert_eq!(increments.get("section:PRICE_BID:attempts"), Some(&3));
        assert_eq!(increments.get("section:TERMS_AND_CONDITIONS:failed"), Some(&1));
        assert!(!increments.contains_key("section:TERMS_AND_CONDITIONS:attempts"));
    }

    #[test]
    fn generation_counts_tokens_when_reported() {
        let usage = ChatCompletionUsage {
            prompt_tokens: Some(900),
            completion_tokens: Some(600),
            total_tokens: Some(1500),
        };
        assert_eq!(
            generation_increments(Some(&usage)),
            vec![
                ("generation:requests".to_string(), 1),
                ("generation:tokens".to_string(), 1500)
            ]
        );
        assert_eq!(
            generation_increments(None),
            vec![
                ("generation:requests".to_string(), 1),
                ("generation:tokens_unknown".to_string(), 1)
            ]
        );
    }

    #[test]
    fn aggregate_reports_every_section_in_order() {
        let entries: HashMap<String, String> = [
            ("documents:COMPLETE", "4"),
            ("documents:PARTIAL", "1"),
            ("section:PRICE_BID:success", "4"),
            ("section:PRICE_BID:failed", "1"),
            ("section:PRICE_BID:attempts", "8"),
            ("generation:requests", "33"),
            ("generation:tokens", "51000"),
            ("generation:tokens_unknown", "2"),
            ("garbage", "x"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let stats = aggregate(&entries);
        assert_eq!(stats.documents_complete, 4);
        assert_eq!(stats.documents_partial, 1);
        assert_eq!(stats.generation_requests, 33);
        assert_eq!(stats.total_tokens, 51000);
        assert_eq!(stats.requests_without_token_counts, 2);

        let ids: Vec<&str> = stats.sections.iter().map(|s| s.section.as_str()).collect();
        let canonical: Vec<&str> = SECTIONS.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, canonical);
        let price_bid = &stats.sections[5];
        assert_eq!((price_bid.succeeded, price_bid.failed, price_bid.attempts), (4, 1, 8));
        assert_eq!(stats.sections[0].succeeded, 0);
    }

    #[tokio::test]
    async fn stats_without_redis_are_zeroed() {
        let tracker = UsageTracker::new(RedisCache::disabled());
        tracker.record_generation(None).await;
        tracker.record_document(&document()).await;

        let stats = tracker.get_usage_stats().await;
        assert!(!stats.redis_available);
        assert_eq!(stats.documents_partial, 0);
        assert_eq!(stats.generation_requests, 0);
        assert_eq!(stats.sections.len(), 6);
        assert!(stats.sections.iter().all(|s| s.succeeded == 0 && s.failed == 0));
    }
}
