//! Bulk proxy import
//!
//! Pulls anything that looks like `ipv4<separator>port` out of free text, such as
//! a pasted proxy list, and admits each address.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Result, RotorError};
use crate::proxy::health::HealthChecker;

/// Four dotted octets, at most one non-digit separator, then a 2-5 digit port
fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3})[^\d.]?(\d{2,5})\b")
            .expect("address pattern is a valid regex")
    })
}

/// Candidate addresses in order of first appearance, normalized to `ip:port`.
/// Candidates are not validated; out-of-range octets are reported by the import.
pub fn extract_addresses(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    address_pattern()
        .captures_iter(text)
        .map(|caps| format!("{}:{}", &caps[1], &caps[2]))
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Outcome of a bulk import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Distinct candidates found in the text
    pub found: usize,
    /// Newly registered
    pub added: usize,
    /// Already in the ledger
    pub duplicates: usize,
    /// Rejected by address validation
    pub invalid: usize,
    /// Newly registered and passed their first probe
    pub working: usize,
}

/// Admits proxies in batches of bounded concurrency
pub struct ProxyImporter {
    checker: Arc<HealthChecker>,
    batch_size: usize,
}

impl ProxyImporter {
    pub fn new(checker: Arc<HealthChecker>, batch_size: usize) -> Self {
        Self {
            checker,
            batch_size: batch_size.max(1),
        }
    }

    #[instrument(skip(self, text), fields(bytes = text.len()))]
    pub async fn import(&self, text: &str) -> Result<ImportSummary> {
        let addresses = extract_addresses(text);
        let mut summary = ImportSummary {
            found: addresses.len(),
            ..Default::default()
        };

        let batches = addresses.chunks(self.batch_size).count();
        info!(
            "Importing {} proxies in batches of {}",
            addresses.len(),
            self.batch_size
        );

        for (index, batch) in addresses.chunks(self.batch_size).enumerate() {
            let results = futures::future::join_all(
                batch.iter().map(|address| self.checker.admit(address)),
            )
            .await;

            for (address, result) in batch.iter().zip(results) {
                match result {
                    Ok(record) => {
                        summary.added += 1;
                        if record.working {
                            summary.working += 1;
                        }
                    }
                    Err(RotorError::DuplicateProxy(_)) => summary.duplicates += 1,
                    Err(RotorError::InvalidAddress(_)) => summary.invalid += 1,
                    Err(e) => warn!("Failed to import {}: {}", address, e),
                }
            }

            info!("Batch {}/{} done", index + 1, batches);
        }

        if summary.working > 0 {
            self.checker.context().pool().rebuild().await?;
        }

        info!(
            found = summary.found,
            added = summary.added,
            working = summary.working,
            "Import complete"
        );
        Ok(summary)
    }

    pub async fn import_file(&self, path: impl AsRef<Path>) -> Result<ImportSummary> {
        let text = tokio::fs::read_to_string(path).await?;
        self.import(&text).await
    }
}
