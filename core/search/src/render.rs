//! Plain-text rendering of search results and scope summaries for hosts
//! that hand them straight to a reader.

use chrono::{DateTime, Utc};
use memory_vault_store::{GlobalSummary, ScopeSummary, WorkItemCounts};

use crate::engine::{SearchHit, SearchResults};

pub fn render_results(results: &SearchResults) -> String {
    render_results_at(results, Utc::now())
}

/// Same as [`render_results`] with a fixed clock
pub fn render_results_at(results: &SearchResults, now: DateTime<Utc>) -> String {
    if results.is_empty() {
        return "No matching knowledge.".to_string();
    }

    let mut lines = Vec::new();

    match results {
        SearchResults::Global { hits } => {
            lines.push(format!("## Results ({})", hits.len()));
            lines.extend(hits.iter().map(|h| hit_line(h, now)));
        }
        SearchResults::Scoped {
            scope_name,
            in_scope,
            fallback,
        } => {
            lines.push(format!("## {} ({})", scope_name, in_scope.len()));
            if in_scope.is_empty() {
                lines.push("- nothing in this scope".to_string());
            }
            lines.extend(in_scope.iter().map(|h| hit_line(h, now)));

            if !fallback.is_empty() {
                lines.push(String::new());
                lines.push("## Elsewhere".to_string());
                for group in fallback {
                    lines.push(format!("### {} ({})", group.label(), group.hits.len()));
                    lines.extend(group.hits.iter().map(|h| hit_line(h, now)));
                }
            }
        }
    }

    lines.join("\n")
}

fn hit_line(hit: &SearchHit, now: DateTime<Utc>) -> String {
    format!(
        "- [{}] {} ({}, {}) {}",
        hit.kind,
        hit.title,
        hit.status,
        format_relative_time(&hit.updated_at, now),
        hit.id
    )
}

pub fn render_scope_summary(summary: &ScopeSummary) -> String {
    let container = &summary.container;
    let mut lines = vec![format!("# Scope: {} ({})", container.name, container.status)];

    if let Some(description) = container.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(description.to_string());
    }
    if let Some(stack) = container.stack.as_deref().filter(|s| !s.is_empty()) {
        lines.push(format!("Stack: {}", stack));
    }
    if let Some(identity) = &summary.identity {
        lines.push(format!("Identity: {} ({})", identity.title, identity.id));
    }

    lines.push(format!("Knowledge items: {}", summary.knowledge_count));
    lines.push(format!("Work items: {}", counts_line(&summary.work_items)));

    lines.join("\n")
}

pub fn render_global_summary(summary: &GlobalSummary) -> String {
    let mut lines = vec!["# Global".to_string()];

    if let Some(identity) = &summary.identity {
        lines.push(format!("Identity: {} ({})", identity.title, identity.id));
    }
    lines.push(format!("Knowledge items: {}", summary.knowledge_count));
    lines.push(format!("Work items: {}", counts_line(&summary.work_items)));

    if summary.containers.is_empty() {
        lines.push("No containers yet.".to_string());
    } else {
        lines.push(format!(
            "Containers ({} of {}):",
            summary.containers.len(),
            summary.container_count
        ));
        for container in &summary.containers {
            lines.push(format!("- {} ({})", container.name, container.status));
        }
    }

    lines.join("\n")
}

fn counts_line(counts: &WorkItemCounts) -> String {
    format!(
        "{} total, {} todo, {} in progress, {} done, {} cancelled",
        counts.total(),
        counts.todo,
        counts.in_progress,
        counts.done,
        counts.cancelled
    )
}

fn format_relative_time(rfc3339: &str, now: DateTime<Utc>) -> String {
    let Ok(dt) = DateTime::parse_from_rfc3339(rfc3339) else {
        return "recently".to_string();
    };

    let duration = now.signed_duration_since(dt);
    if duration.num_hours() < 1 {
        format!("{}m ago", duration.num_minutes().max(0))
    } else if duration.num_days() < 1 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        format!("{}w ago", duration.num_weeks())
    }
}
