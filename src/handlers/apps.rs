//! Watched applications endpoint handler.
//!
//! Renders the watched set published by the last completed reconcile tick.

use axum::{extract::State, response::IntoResponse};
use paas_prometheus_exporter::WatchedSet;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /apps endpoint.
#[instrument(skip(state))]
pub async fn apps_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /apps request");

    // Clone under the read lock so rendering never blocks the reconcile loop.
    let watched = state.watched.read().await.clone();

    (
        [("Content-Type", "text/plain; charset=utf-8")],
        render_watched(&watched),
    )
}

pub fn render_watched(watched: &WatchedSet) -> String {
    let mut out = String::new();
    writeln!(out, "WATCHED APPLICATIONS").ok();
    writeln!(out, "====================").ok();
    writeln!(out).ok();

    match watched.last_tick {
        Some(at) => writeln!(
            out,
            "last tick: {} ({})",
            at.to_rfc3339(),
            if watched.last_tick_success {
                "ok"
            } else {
                "fetch failed"
            }
        )
        .ok(),
        None => writeln!(out, "last tick: none yet").ok(),
    };
    writeln!(out).ok();

    writeln!(
        out,
        "{:36} | {:30} | {:36} | {:>9}",
        "guid", "name", "space", "instances"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(36 + 3 + 30 + 3 + 36 + 3 + 9)).ok();
    for app in &watched.apps {
        writeln!(
            out,
            "{:36} | {:30} | {:36} | {:>9}",
            app.guid, app.name, app.space, app.instances
        )
        .ok();
    }

    writeln!(out).ok();
    writeln!(out, "total: {}", watched.apps.len()).ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use paas_prometheus_exporter::WatchedApp;

    #[tokio::test]
    async fn test_apps_lists_watched_set() {
        let state = test_support::state(WatchedSet {
            apps: vec![WatchedApp {
                guid: "33333333-3333-3333-3333-333333333333".into(),
                name: "foo".into(),
                space: "123".into(),
                instances: 2,
            }],
            last_tick_success: true,
            ..Default::default()
        });

        let response = apps_handler(State(state)).await.into_response();
        let body = test_support::body_text(response).await;
        assert!(body.contains("33333333-3333-3333-3333-333333333333"));
        assert!(body.contains("foo"));
        assert!(body.contains("total: 1"));
        assert!(body.contains("last tick: none yet"));
    }
}
