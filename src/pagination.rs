//! Per-email filter → sort → paginate pipeline.
//!
//! `run_pipeline` is a pure function of its inputs. `PaginationFilterEngine`
//! holds only the user's choices (filter, sort, page per email) and re-runs
//! the pipeline against whatever snapshot it is given.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::snapshot::AggregationSnapshot;
use crate::types::{LinkedEmail, Workspace};

pub const PAGE_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Type,
    Email,
    #[default]
    Name,
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "type" => Ok(FilterMode::Type),
            "email" => Ok(FilterMode::Email),
            "name" => Ok(FilterMode::Name),
            other => Err(format!("unknown filter mode '{other}' (expected type, email or name)")),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterMode::Type => "type",
            FilterMode::Email => "email",
            FilterMode::Name => "name",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    /// Workspace ids are assigned in creation order.
    CreatedAt,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "created_at" | "created-at" | "created" => Ok(SortKey::CreatedAt),
            other => Err(format!("unknown sort key '{other}' (expected name or created_at)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// The user's current filter and sort choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    mode: FilterMode,
    value: String,
    sort: Option<SortKey>,
    direction: SortDirection,
}

impl ViewQuery {
    pub fn new(mode: FilterMode, value: &str) -> Self {
        Self {
            mode,
            value: value.to_string(),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Switching to a different mode clears the filter value.
    pub fn set_mode(&mut self, mode: FilterMode) {
        if self.mode != mode {
            self.mode = mode;
            self.value.clear();
        }
    }

    pub fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }

    pub fn set_sort(&mut self, sort: Option<SortKey>, direction: SortDirection) {
        self.sort = sort;
        self.direction = direction;
    }

    fn matches(&self, workspace: &Workspace, group_email: &LinkedEmail) -> bool {
        let needle = self.value.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::Type => workspace.kind.as_str() == needle,
            FilterMode::Email => group_email.as_str().contains(&needle),
            FilterMode::Name => workspace.title.to_lowercase().contains(&needle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageWindow {
    pub items: Vec<Workspace>,
    pub current_page: usize,
    pub total_pages: usize,
    pub filtered_len: usize,
}

pub fn total_pages(filtered_len: usize) -> usize {
    filtered_len.div_ceil(PAGE_SIZE)
}

/// Clamp into `[1, max(1, total_pages)]`.
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

fn collation_key(s: &str) -> String {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn compare_names(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}

pub fn run_pipeline(
    raw: &[Workspace],
    group_email: &LinkedEmail,
    query: &ViewQuery,
    current_page: usize,
) -> PageWindow {
    let mut filtered: Vec<&Workspace> = raw
        .iter()
        .filter(|w| query.matches(w, group_email))
        .collect();

    if let Some(key) = query.sort {
        filtered.sort_by(|a, b| {
            let ord = match key {
                SortKey::Name => compare_names(&a.title, &b.title),
                SortKey::CreatedAt => a.id.cmp(&b.id),
            };
            match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    let filtered_len = filtered.len();
    let total = total_pages(filtered_len);
    let page = clamp_page(current_page, total);
    let items = filtered
        .into_iter()
        .skip((page - 1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .cloned()
        .collect();

    PageWindow {
        items,
        current_page: page,
        total_pages: total,
        filtered_len,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMove {
    Prev,
    Next,
    To(usize),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub email: LinkedEmail,
    /// The fetch for this email failed; its workspaces are unknown.
    pub failed: bool,
    #[serde(flatten)]
    pub window: PageWindow,
}

#[derive(Debug, Default)]
pub struct PaginationFilterEngine {
    query: ViewQuery,
    pages: HashMap<LinkedEmail, usize>,
}

impl PaginationFilterEngine {
    pub fn new(query: ViewQuery) -> Self {
        Self {
            query,
            pages: HashMap::new(),
        }
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.query.set_mode(mode);
    }

    pub fn set_filter(&mut self, value: &str) {
        self.query.set_value(value);
    }

    pub fn set_sort(&mut self, sort: Option<SortKey>, direction: SortDirection) {
        self.query.set_sort(sort, direction);
    }

    pub fn page(&self, email: &LinkedEmail) -> usize {
        self.pages.get(email).copied().unwrap_or(1)
    }

    /// Move one email's page, clamped against the current filtered length.
    pub fn change_page(
        &mut self,
        snapshot: &AggregationSnapshot,
        email: &LinkedEmail,
        mv: PageMove,
    ) -> usize {
        let raw = snapshot.workspaces_for(email).unwrap_or(&[]);
        let current = run_pipeline(raw, email, &self.query, self.page(email));
        let requested = match mv {
            PageMove::Prev => current.current_page.saturating_sub(1),
            PageMove::Next => current.current_page + 1,
            PageMove::To(n) => n,
        };
        let page = clamp_page(requested, current.total_pages);
        self.pages.insert(email.clone(), page);
        page
    }

    /// Run the pipeline for every email in `snapshot`, storing the clamped
    /// page back so state never points past the last page.
    pub fn render(&mut self, snapshot: &AggregationSnapshot) -> Vec<GroupView> {
        let mut groups = Vec::new();
        for (email, workspaces) in snapshot.iter() {
            let window = run_pipeline(workspaces, email, &self.query, self.page(email));
            self.pages.insert(email.clone(), window.current_page);
            groups.push(GroupView {
                email: email.clone(),
                failed: false,
                window,
            });
        }
        for email in snapshot.failed_emails() {
            groups.push(GroupView {
                email: email.clone(),
                failed: true,
                window: run_pipeline(&[], email, &self.query, 1),
            });
        }
        // Emails that left the registry take their page with them.
        let live: Vec<&LinkedEmail> = snapshot.emails().collect();
        self.pages.retain(|email, _| live.contains(&email));
        groups
    }

    pub fn reset(&mut self) {
        self.query = ViewQuery::default();
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotBuilder;
    use crate::test_support::{email, typed_workspace, workspace};
    use crate::types::WorkspaceType;

    fn titled(titles: &[&str]) -> Vec<Workspace> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| workspace(i as i64 + 1, t))
            .collect()
    }

    fn titles(window: &PageWindow) -> Vec<&str> {
        window.items.iter().map(|w| w.title.as_str()).collect()
    }

    #[test]
    fn test_page_math() {
        let group = email("a@x.io");
        for len in 0..=10usize {
            let raw: Vec<Workspace> = (0..len).map(|i| workspace(i as i64, "W")).collect();
            let window = run_pipeline(&raw, &group, &ViewQuery::default(), 1);
            assert!(window.items.len() <= PAGE_SIZE);
            assert_eq!(window.total_pages, len.div_ceil(3));
        }
        let empty = run_pipeline(&[], &group, &ViewQuery::default(), 4);
        assert_eq!(empty.total_pages, 0);
        assert_eq!(empty.current_page, 1);
    }

    #[test]
    fn test_name_filter_preserves_order() {
        let raw = titled(&["Project A", "Ops", "Project B"]);
        let query = ViewQuery::new(FilterMode::Name, "proj");
        let window = run_pipeline(&raw, &email("a@x.io"), &query, 1);
        assert_eq!(titles(&window), vec!["Project A", "Project B"]);
    }

    #[test]
    fn test_type_and_email_filters() {
        let raw = vec![
            typed_workspace(1, "Mine", WorkspaceType::Personal),
            typed_workspace(2, "Team", WorkspaceType::Workspace),
        ];
        let group = email("alice@corp.io");

        let window = run_pipeline(&raw, &group, &ViewQuery::new(FilterMode::Type, "Personal"), 1);
        assert_eq!(titles(&window), vec!["Mine"]);

        let window = run_pipeline(&raw, &group, &ViewQuery::new(FilterMode::Email, "CORP"), 1);
        assert_eq!(window.filtered_len, 2);
        let window = run_pipeline(&raw, &group, &ViewQuery::new(FilterMode::Email, "bob"), 1);
        assert_eq!(window.filtered_len, 0);
    }

    #[test]
    fn test_sort_by_name_ignores_case_and_accents() {
        let raw = titled(&["beta", "Émile", "alpha", "Zulu"]);
        let mut query = ViewQuery::default();
        query.set_sort(Some(SortKey::Name), SortDirection::Asc);
        let group = email("a@x.io");

        let first = run_pipeline(&raw, &group, &query, 1);
        let second = run_pipeline(&raw, &group, &query, 2);
        assert_eq!(titles(&first), vec!["alpha", "beta", "Émile"]);
        assert_eq!(titles(&second), vec!["Zulu"]);

        query.set_sort(Some(SortKey::CreatedAt), SortDirection::Desc);
        let window = run_pipeline(&raw, &group, &query, 1);
        assert_eq!(titles(&window), vec!["Zulu", "alpha", "Émile"]);
    }

    #[test]
    fn test_set_mode_resets_value_only_on_change() {
        let mut query = ViewQuery::new(FilterMode::Name, "proj");
        query.set_mode(FilterMode::Name);
        assert_eq!(query.value(), "proj");
        query.set_mode(FilterMode::Type);
        assert_eq!(query.value(), "");
    }

    #[test]
    fn test_render_preserves_page_in_range_and_clamps_otherwise() {
        let a = email("a@x.io");
        let mut builder = SnapshotBuilder::new(1);
        builder.insert(a.clone(), titled(&["P1", "P2", "P3", "P4", "P5", "P6", "P7", "Other"]));
        let snapshot = builder.build();

        let mut engine = PaginationFilterEngine::default();
        assert_eq!(engine.change_page(&snapshot, &a, PageMove::Next), 2);
        assert_eq!(engine.change_page(&snapshot, &a, PageMove::Next), 3);
        assert_eq!(engine.change_page(&snapshot, &a, PageMove::Next), 3);

        // 7 matches: page 3 still exists.
        engine.set_filter("p");
        let groups = engine.render(&snapshot);
        assert_eq!(groups[0].window.current_page, 3);
        assert_eq!(titles(&groups[0].window), vec!["P7"]);

        // 1 match: clamp to the last page.
        engine.set_filter("other");
        let groups = engine.render(&snapshot);
        assert_eq!(groups[0].window.current_page, 1);
        assert_eq!(engine.page(&a), 1);
    }

    #[test]
    fn test_render_marks_failed_groups() {
        let mut builder = SnapshotBuilder::new(1);
        builder.insert(email("a@x.io"), titled(&["Ops"]));
        builder.mark_failed(email("b@x.io"));
        let snapshot = builder.build();

        let mut engine = PaginationFilterEngine::default();
        let groups = engine.render(&snapshot);
        assert_eq!(groups.len(), 2);
        assert!(!groups[0].failed);
        assert!(groups[1].failed);
        assert_eq!(groups[1].window.total_pages, 0);
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!("Type".parse::<FilterMode>().unwrap(), FilterMode::Type);
        assert_eq!("created_at".parse::<SortKey>().unwrap(), SortKey::CreatedAt);
        assert!("colour".parse::<FilterMode>().is_err());
    }
}
