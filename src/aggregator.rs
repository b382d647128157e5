//! Workspace aggregation across linked emails.
//!
//! One fetch per email, issued concurrently, collected only after every fetch
//! has settled. Results are keyed by email as they come back; delivery order
//! is never assumed. A failing email is recorded as failed and omitted from
//! the mapping, so its siblings still publish.

use std::sync::Arc;

use futures::future::join_all;

use crate::api::DeckBackend;
use crate::snapshot::{AggregationSnapshot, SnapshotBuilder};
use crate::types::LinkedEmail;

pub struct WorkspaceAggregator {
    backend: Arc<dyn DeckBackend>,
}

impl WorkspaceAggregator {
    pub fn new(backend: Arc<dyn DeckBackend>) -> Self {
        Self { backend }
    }

    /// Fan out one `list_workspaces` per email, fan in to a single snapshot.
    pub async fn aggregate(&self, emails: &[LinkedEmail], generation: u64) -> AggregationSnapshot {
        log::info!(
            "Aggregator: fetching workspaces for {} linked email(s) (generation {})",
            emails.len(),
            generation
        );

        let fetches = emails.iter().map(|email| {
            let backend = self.backend.clone();
            async move {
                let result = backend.list_workspaces(email).await;
                (email.clone(), result)
            }
        });
        let results = join_all(fetches).await;

        let mut builder = SnapshotBuilder::new(generation);
        let mut failures = 0usize;
        for (email, result) in results {
            match result {
                Ok(workspaces) => builder.insert(email, workspaces),
                Err(e) => {
                    failures += 1;
                    log::warn!("Aggregator: fetch for {} failed: {}", email, e);
                    builder.mark_failed(email);
                }
            }
        }

        let snapshot = builder.build();
        log::info!(
            "Aggregator: generation {} complete ({} ok, {} failed)",
            generation,
            emails.len() - failures,
            failures
        );
        snapshot
    }

    /// Re-fetch only the emails that failed in `previous`, carrying the
    /// successful entries over into a new snapshot.
    pub async fn retry_failed(
        &self,
        previous: &AggregationSnapshot,
        generation: u64,
    ) -> AggregationSnapshot {
        let failed = previous.failed_emails().to_vec();
        if failed.is_empty() {
            let mut builder = SnapshotBuilder::new(generation);
            for (email, workspaces) in previous.iter() {
                builder.insert(email.clone(), workspaces.to_vec());
            }
            return builder.build();
        }

        log::info!("Aggregator: retrying {} failed email(s)", failed.len());
        let retried = self.aggregate(&failed, generation).await;

        let mut builder = SnapshotBuilder::new(generation);
        for (email, workspaces) in previous.iter() {
            builder.insert(email.clone(), workspaces.to_vec());
        }
        for (email, workspaces) in retried.iter() {
            builder.insert(email.clone(), workspaces.to_vec());
        }
        for email in retried.failed_emails() {
            builder.mark_failed(email.clone());
        }
        builder.build()
    }
}
