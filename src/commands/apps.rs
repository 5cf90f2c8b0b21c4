//! Apps command implementation.
//!
//! Fetches the application list once with the configured credentials and
//! query, and prints it. Useful to check what the exporter would watch.

use anyhow::{Context, Result};
use paas_prometheus_exporter::{ApplicationRecord, CfClient};
use std::fmt::Write as FmtWrite;
use std::time::Instant;
use tracing::debug;

use crate::cli::AppsFormat;
use crate::config::Config;

pub async fn command_apps(config: &Config, started_only: bool, format: AppsFormat) -> Result<()> {
    let client = CfClient::new(config.cf_client_config()?)?;

    let start = Instant::now();
    let apps = client
        .list_apps()
        .await
        .context("failed to fetch application list")?;
    debug!(
        "Fetched {} applications in {:.2}ms",
        apps.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let apps = select_apps(apps, started_only);
    let output = match format {
        AppsFormat::Table => render_table(&apps),
        AppsFormat::Json => serde_json::to_string_pretty(&apps)?,
        AppsFormat::Yaml => serde_yaml::to_string(&apps)?,
    };
    println!("{output}");
    Ok(())
}

fn select_apps(mut apps: Vec<ApplicationRecord>, started_only: bool) -> Vec<ApplicationRecord> {
    if started_only {
        apps.retain(|a| a.state.is_started());
    }
    apps.sort_by(|a, b| (&a.name, &a.guid).cmp(&(&b.name, &b.guid)));
    apps
}

fn render_table(apps: &[ApplicationRecord]) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "{:36} | {:30} | {:36} | {:8} | {:>9}",
        "guid", "name", "space", "state", "instances"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(36 + 3 + 30 + 3 + 36 + 3 + 8 + 3 + 9)).ok();
    for app in apps {
        writeln!(
            out,
            "{:36} | {:30} | {:36} | {:8} | {:>9}",
            app.guid,
            app.name,
            app.space,
            app.state.to_string(),
            app.instances
        )
        .ok();
    }
    let started = apps.iter().filter(|a| a.state.is_started()).count();
    writeln!(out).ok();
    write!(out, "total: {} (started: {})", apps.len(), started).ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_prometheus_exporter::LifecycleState;

    fn app(name: &str, state: LifecycleState) -> ApplicationRecord {
        ApplicationRecord {
            guid: format!("guid-{name}"),
            name: name.into(),
            space: "space-1".into(),
            state,
            instances: 1,
        }
    }

    #[test]
    fn test_select_started_only_sorted() {
        let apps = vec![
            app("zeta", LifecycleState::Started),
            app("beta", LifecycleState::Stopped),
            app("alpha", LifecycleState::Started),
        ];
        let selected = select_apps(apps, true);
        let names: Vec<&str> = selected.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&[
            app("foo", LifecycleState::Started),
            app("bar", LifecycleState::Other("PENDING".into())),
        ]);
        assert!(table.contains("guid-foo"));
        assert!(table.contains("PENDING"));
        assert!(table.ends_with("total: 2 (started: 1)"));
    }
}
