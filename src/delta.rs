//! Detection of items that arrived since the last poll of a tracked user.
//!
//! Pages are newest-first. The high-water mark is the id of the newest item
//! already emitted (or baselined) for the user; everything above it in the
//! page is new. When the mark has scrolled out of the page, the items in
//! between are unrecoverable and are dropped rather than back-filled.

use crate::fetcher::Document;

/// Outcome of comparing a freshly fetched page against a high-water mark.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    /// The page was empty, or nothing is newer than the mark.
    Unchanged,
    /// First poll: the mark is set without emitting anything.
    Baseline { mark: String },
    /// First poll with backlog delivery: the whole page is emitted.
    Backlog { items: Vec<Document>, mark: String },
    /// Items newer than the mark, oldest first.
    New { items: Vec<Document>, mark: String },
    /// The mark is no longer in the page. Nothing is emitted.
    Gap { mark: String },
}

impl Delta {
    /// The high-water mark to store after this delta, if it changes.
    pub fn mark(&self) -> Option<&str> {
        match self {
            Delta::Unchanged => None,
            Delta::Baseline { mark }
            | Delta::Backlog { mark, .. }
            | Delta::New { mark, .. }
            | Delta::Gap { mark } => Some(mark),
        }
    }

    /// Items to emit, in chronological order.
    pub fn items(&self) -> &[Document] {
        match self {
            Delta::Backlog { items, .. } | Delta::New { items, .. } => items,
            _ => &[],
        }
    }

    pub fn into_items(self) -> Vec<Document> {
        match self {
            Delta::Backlog { items, .. } | Delta::New { items, .. } => items,
            _ => Vec::new(),
        }
    }
}

/// Computes which items of `page` are new relative to `mark`.
pub fn detect(page: Vec<Document>, mark: Option<&str>, deliver_backlog: bool) -> Delta {
    let Some(newest_id) = page.iter().find_map(Document::id) else {
        return Delta::Unchanged;
    };

    let Some(mark) = mark else {
        if deliver_backlog {
            let mut items = page;
            items.reverse();
            return Delta::Backlog {
                items,
                mark: newest_id,
            };
        }
        return Delta::Baseline { mark: newest_id };
    };

    let mut collected = Vec::new();
    let mut found = false;
    for item in page {
        let Some(id) = item.id() else {
            continue;
        };
        if id == mark {
            found = true;
            break;
        }
        collected.push(item);
    }

    if !found {
        return Delta::Gap { mark: newest_id };
    }
    if collected.is_empty() {
        return Delta::Unchanged;
    }

    collected.reverse();
    Delta::New {
        items: collected,
        mark: newest_id,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn page(ids: &[&str]) -> Vec<Document> {
        ids.iter()
            .map(|id| Document::new(json!({ "id": id, "text": format!("tweet {id}") })))
            .collect()
    }

    fn ids(items: &[Document]) -> Vec<String> {
        items.iter().filter_map(Document::id).collect()
    }

    #[test]
    fn test_bootstrap_sets_baseline() {
        let delta = detect(page(&["5", "4", "3"]), None, false);
        assert_eq!(
            delta,
            Delta::Baseline {
                mark: "5".to_string()
            }
        );
        assert!(delta.items().is_empty());
    }

    #[test]
    fn test_bootstrap_with_backlog_emits_page_oldest_first() {
        let delta = detect(page(&["5", "4", "3"]), None, true);
        assert_eq!(ids(delta.items()), vec!["3", "4", "5"]);
        assert_eq!(delta.mark(), Some("5"));
    }

    #[test]
    fn test_steady_state_emits_newer_items_in_order() {
        let delta = detect(page(&["7", "6", "5", "4"]), Some("5"), false);
        assert_eq!(ids(delta.items()), vec!["6", "7"]);
        assert_eq!(delta.mark(), Some("7"));
    }

    #[test]
    fn test_no_new_items() {
        let delta = detect(page(&["5", "4", "3"]), Some("5"), true);
        assert_eq!(delta, Delta::Unchanged);
        assert_eq!(delta.mark(), None);
    }

    #[test]
    fn test_gap_drops_items_and_advances_mark() {
        let delta = detect(page(&["9", "8", "7"]), Some("5"), false);
        assert_eq!(
            delta,
            Delta::Gap {
                mark: "9".to_string()
            }
        );
        assert!(delta.items().is_empty());
    }

    #[test]
    fn test_empty_page_keeps_mark() {
        assert_eq!(detect(Vec::new(), Some("5"), false), Delta::Unchanged);
        assert_eq!(detect(Vec::new(), None, true), Delta::Unchanged);
    }

    #[test]
    fn test_items_without_id_are_skipped() {
        let mut items = vec![Document::new(json!({ "text": "promoted" }))];
        items.extend(page(&["6", "5"]));

        let delta = detect(items.clone(), Some("5"), false);
        assert_eq!(ids(delta.items()), vec!["6"]);
        assert_eq!(delta.mark(), Some("6"));

        let delta = detect(items, None, false);
        assert_eq!(delta.mark(), Some("6"));
    }

    #[test]
    fn test_emitted_items_pass_through_untouched() {
        let raw = json!({ "rest_id": "11", "legacy": { "full_text": "hi" }, "extra": [1, 2] });
        let items = vec![Document::new(raw.clone()), Document::new(json!({ "id": "10" }))];

        let delta = detect(items, Some("10"), false);
        assert_eq!(delta.into_items(), vec![Document::new(raw)]);
    }
}
