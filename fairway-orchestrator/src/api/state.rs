//! Sequence state inspection API handler
//!
//! Paginated listing of sequence states for operators and tests. One state
//! item summarizes a whole causal context: its current lifecycle state and,
//! per stage the run has touched, the latest observed event.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use fairway_core::dto::state::{
    LatestEventSummary, SequenceStateItem, SequenceStates, StageStateSummary,
};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::store::StateStore;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub project: String,
    /// Optional filter on the root sequence name.
    pub name: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<usize>,
    #[serde(rename = "nextPageKey")]
    pub next_page_key: Option<String>,
}

/// GET /sequence/state
/// List sequence states for a project, newest first
pub async fn get_states(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> ApiResult<Json<SequenceStates>> {
    tracing::debug!("Listing sequence states for project {}", query.project);

    let offset = match &query.next_page_key {
        Some(key) => key
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest(format!("invalid nextPageKey: {}", key)))?,
        None => 0,
    };
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);

    Ok(Json(collect_states(
        &state.store,
        &query.project,
        query.name.as_deref(),
        page_size,
        offset,
    )))
}

/// Builds the paginated state listing from the store's live instances.
///
/// Instances sharing a causal context are folded into one item; the item's
/// state is the most recently updated instance's state, and each touched
/// stage reports its latest observed event.
pub fn collect_states(
    store: &StateStore,
    project: &str,
    sequence_filter: Option<&str>,
    page_size: usize,
    offset: usize,
) -> SequenceStates {
    let mut by_context: HashMap<Uuid, Vec<_>> = HashMap::new();
    for instance in store.list_by_project(project) {
        by_context.entry(instance.context_id).or_default().push(instance);
    }

    let mut items: Vec<(chrono::DateTime<chrono::Utc>, SequenceStateItem)> = Vec::new();
    for (context_id, mut instances) in by_context {
        instances.sort_by_key(|i| i.created_at);
        let root = &instances[0];

        if let Some(filter) = sequence_filter {
            if root.sequence != filter {
                continue;
            }
        }

        let latest = instances
            .iter()
            .max_by_key(|i| i.updated_at)
            .unwrap_or(root);

        // One summary per stage, taken from the most recent instance that
        // ran in it.
        let mut stages: Vec<StageStateSummary> = Vec::new();
        for instance in &instances {
            let summary = StageStateSummary {
                name: instance.stage.clone(),
                latest_event: instance.outcomes.last().map(|o| LatestEventSummary {
                    event_type: o.latest_event_type.clone(),
                    result: o.result,
                }),
            };
            match stages.iter_mut().find(|s| s.name == instance.stage) {
                Some(existing) => *existing = summary,
                None => stages.push(summary),
            }
        }

        items.push((
            root.created_at,
            SequenceStateItem {
                project: root.project.clone(),
                service: root.service.clone(),
                sequence: root.sequence.clone(),
                context_id,
                state: latest.state,
                stages,
            },
        ));
    }

    // Newest contexts first; context id breaks creation-time ties.
    items.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.context_id.cmp(&a.1.context_id))
    });
    let items: Vec<SequenceStateItem> = items.into_iter().map(|(_, item)| item).collect();

    let total_count = items.len() as u64;
    let end = (offset + page_size).min(items.len());
    let page: Vec<SequenceStateItem> = if offset < items.len() {
        items[offset..end].to_vec()
    } else {
        Vec::new()
    };
    let next_page_key = (end < items.len()).then(|| end.to_string());

    SequenceStates {
        states: page,
        total_count,
        next_page_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_core::domain::sequence::SequenceInstance;
    use serde_json::Value;

    fn store_with_instances(count: usize) -> StateStore {
        let store = StateStore::new();
        for _ in 0..count {
            store
                .create(SequenceInstance::new(
                    Uuid::new_v4(),
                    "sockshop",
                    "dev",
                    "carts",
                    "delivery",
                    Value::Null,
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_pagination_contract() {
        let store = store_with_instances(3);

        let first = collect_states(&store, "sockshop", None, 1, 0);
        assert_eq!(first.states.len(), 1);
        assert_eq!(first.total_count, 3);
        let key = first.next_page_key.unwrap();

        let second = collect_states(&store, "sockshop", None, 1, key.parse().unwrap());
        assert_eq!(second.states.len(), 1);
        assert_eq!(second.total_count, 3);
        assert_ne!(first.states[0].context_id, second.states[0].context_id);

        let key = second.next_page_key.unwrap();
        let last = collect_states(&store, "sockshop", None, 1, key.parse().unwrap());
        assert_eq!(last.states.len(), 1);
        assert!(last.next_page_key.is_none());
    }

    #[test]
    fn test_sequence_name_filter() {
        let store = store_with_instances(2);
        store
            .create(SequenceInstance::new(
                Uuid::new_v4(),
                "sockshop",
                "dev",
                "carts",
                "rollback",
                Value::Null,
            ))
            .unwrap();

        let all = collect_states(&store, "sockshop", None, 20, 0);
        assert_eq!(all.total_count, 3);

        let filtered = collect_states(&store, "sockshop", Some("rollback"), 20, 0);
        assert_eq!(filtered.total_count, 1);
        assert_eq!(filtered.states[0].sequence, "rollback");
    }

    #[test]
    fn test_listing_orders_newest_context_first() {
        let store = StateStore::new();
        let mut ids = Vec::new();
        for age_minutes in [30i64, 20, 10] {
            let mut instance = SequenceInstance::new(
                Uuid::new_v4(),
                "sockshop",
                "dev",
                "carts",
                "delivery",
                Value::Null,
            );
            instance.created_at = chrono::Utc::now() - chrono::Duration::minutes(age_minutes);
            ids.push(instance.context_id);
            store.create(instance).unwrap();
        }

        let states = collect_states(&store, "sockshop", None, 20, 0);
        let listed: Vec<Uuid> = states.states.iter().map(|s| s.context_id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_unknown_project_is_empty() {
        let store = store_with_instances(1);
        let states = collect_states(&store, "other", None, 20, 0);
        assert_eq!(states.total_count, 0);
        assert!(states.states.is_empty());
        assert!(states.next_page_key.is_none());
    }
}
