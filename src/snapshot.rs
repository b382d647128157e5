//! Immutable email → workspaces snapshot.
//!
//! A snapshot is built once per fetch cycle and shared as
//! `Arc<AggregationSnapshot>`. Nothing patches it afterwards; a newer cycle
//! produces a new snapshot that replaces the old one wholesale.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::{LinkedEmail, Workspace, WorkspaceId};

/// A workspace id that appeared under more than one linked email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipAnomaly {
    pub workspace_id: WorkspaceId,
    pub emails: Vec<LinkedEmail>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationSnapshot {
    generation: u64,
    /// Successful fetches, in registry order.
    entries: Vec<(LinkedEmail, Vec<Workspace>)>,
    failed: Vec<LinkedEmail>,
    anomalies: Vec<OwnershipAnomaly>,
}

impl AggregationSnapshot {
    /// The pre-load state: no email is known yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// No emails known, stamped with `generation` (signed out, or no linked emails).
    pub fn empty_at(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.failed.is_empty()
    }

    /// `None` means "not yet known", never "has no workspaces".
    pub fn workspaces_for(&self, email: &LinkedEmail) -> Option<&[Workspace]> {
        self.entries
            .iter()
            .find(|(e, _)| e == email)
            .map(|(_, ws)| ws.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkedEmail, &[Workspace])> {
        self.entries.iter().map(|(e, ws)| (e, ws.as_slice()))
    }

    /// Emails whose fetch succeeded.
    pub fn emails(&self) -> impl Iterator<Item = &LinkedEmail> {
        self.entries.iter().map(|(e, _)| e)
    }

    pub fn failed_emails(&self) -> &[LinkedEmail] {
        &self.failed
    }

    pub fn anomalies(&self) -> &[OwnershipAnomaly] {
        &self.anomalies
    }

    /// First (email, workspace) pair carrying `workspace_id`, in registry order.
    pub fn locate(&self, workspace_id: WorkspaceId) -> Option<(&LinkedEmail, &Workspace)> {
        self.entries.iter().find_map(|(email, ws)| {
            ws.iter()
                .find(|w| w.id == workspace_id)
                .map(|w| (email, w))
        })
    }

    pub fn workspace(&self, workspace_id: WorkspaceId) -> Option<&Workspace> {
        self.locate(workspace_id).map(|(_, ws)| ws)
    }

    pub fn anomaly_for(&self, workspace_id: WorkspaceId) -> Option<&OwnershipAnomaly> {
        self.anomalies.iter().find(|a| a.workspace_id == workspace_id)
    }

    /// Plain mapping view, for comparisons that should ignore generation and order.
    pub fn mapping(&self) -> HashMap<LinkedEmail, Vec<Workspace>> {
        self.entries.iter().cloned().collect()
    }
}

/// Collects fan-in results, then freezes them into a snapshot.
pub struct SnapshotBuilder {
    generation: u64,
    entries: Vec<(LinkedEmail, Vec<Workspace>)>,
    failed: Vec<LinkedEmail>,
}

impl SnapshotBuilder {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            entries: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Later results for the same email replace earlier ones.
    pub fn insert(&mut self, email: LinkedEmail, workspaces: Vec<Workspace>) {
        self.failed.retain(|e| e != &email);
        match self.entries.iter_mut().find(|(e, _)| e == &email) {
            Some(entry) => entry.1 = workspaces,
            None => self.entries.push((email, workspaces)),
        }
    }

    pub fn mark_failed(&mut self, email: LinkedEmail) {
        self.entries.retain(|(e, _)| e != &email);
        if !self.failed.contains(&email) {
            self.failed.push(email);
        }
    }

    pub fn build(self) -> AggregationSnapshot {
        let anomalies = find_anomalies(&self.entries);
        for anomaly in &anomalies {
            log::warn!(
                "Snapshot: workspace {} is visible under {} linked emails ({})",
                anomaly.workspace_id,
                anomaly.emails.len(),
                anomaly
                    .emails
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        AggregationSnapshot {
            generation: self.generation,
            entries: self.entries,
            failed: self.failed,
            anomalies,
        }
    }
}

fn find_anomalies(entries: &[(LinkedEmail, Vec<Workspace>)]) -> Vec<OwnershipAnomaly> {
    let mut owners: HashMap<WorkspaceId, Vec<LinkedEmail>> = HashMap::new();
    let mut order: Vec<WorkspaceId> = Vec::new();

    for (email, workspaces) in entries {
        let mut seen_here = HashSet::new();
        for ws in workspaces {
            if !seen_here.insert(ws.id) {
                continue;
            }
            let list = owners.entry(ws.id).or_insert_with(|| {
                order.push(ws.id);
                Vec::new()
            });
            list.push(email.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            owners
                .remove(&id)
                .filter(|emails| emails.len() > 1)
                .map(|emails| OwnershipAnomaly {
                    workspace_id: id,
                    emails,
                })
        })
        .collect()
}
