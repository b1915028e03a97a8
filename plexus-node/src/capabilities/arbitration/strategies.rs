// Arbitration strategies
//
// Each constructor returns an `ArbitrationStrategy` usable in a DiscoveryQos.

use anyhow::anyhow;
use std::sync::Arc;

use crate::types::{ArbitrationStrategy, DiscoveryEntryWithMetaInfo};

/// Custom parameter consulted by [`keyword`]
pub const KEYWORD_PARAMETER: &str = "keyword";

/// Accept every candidate unchanged
pub fn nothing() -> ArbitrationStrategy {
    Arc::new(|candidates: &[DiscoveryEntryWithMetaInfo]| Ok(candidates.to_vec()))
}

/// Candidates ordered by provider priority, highest first
pub fn highest_priority() -> ArbitrationStrategy {
    Arc::new(|candidates: &[DiscoveryEntryWithMetaInfo]| {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| b.entry.qos.priority.cmp(&a.entry.qos.priority));
        Ok(sorted)
    })
}

/// Candidates whose "keyword" custom parameter equals `keyword`
pub fn keyword(keyword: impl Into<String>) -> ArbitrationStrategy {
    let keyword = keyword.into();
    Arc::new(move |candidates: &[DiscoveryEntryWithMetaInfo]| {
        Ok(candidates
            .iter()
            .filter(|c| c.entry.qos.custom_parameter(KEYWORD_PARAMETER) == Some(keyword.as_str()))
            .cloned()
            .collect())
    })
}

/// Most recently seen provider first
pub fn last_seen() -> ArbitrationStrategy {
    Arc::new(|candidates: &[DiscoveryEntryWithMetaInfo]| {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| b.entry.last_seen_date_ms.cmp(&a.entry.last_seen_date_ms));
        Ok(sorted)
    })
}

/// Expects at most one candidate (the participant was fixed by the caller)
pub fn fixed_participant() -> ArbitrationStrategy {
    Arc::new(|candidates: &[DiscoveryEntryWithMetaInfo]| {
        if candidates.len() > 1 {
            return Err(anyhow!(
                "fixed participant arbitration expects at most one candidate, got {}",
                candidates.len()
            ));
        }
        Ok(candidates.to_vec())
    })
}
