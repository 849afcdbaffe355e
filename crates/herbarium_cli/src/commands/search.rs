use std::sync::Arc;

use anyhow::Context;
use herbarium::{SearchHit, find_matching, load_or_fetch};

use crate::config::Config;
use crate::progress::ProgressReporter;

/// Print cached observations whose field value contains `substring`.
///
/// Fetches first when the cache is missing or incomplete.
pub(crate) async fn handle_search(config: &Config, substring: Option<String>) -> anyhow::Result<()> {
    let substring = substring.unwrap_or_else(|| config.project.include_pattern.clone());
    let client = super::build_client(config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();

    let records = load_or_fetch(
        &client,
        &config.project.field_name,
        client.page_size(),
        &config.cache.path,
        Some(&callback),
    )
    .await;
    reporter.finish();
    let records = records
        .with_context(|| format!("could not load {}", config.cache.path.display()))?;

    println!("Loaded {} observations", records.len());
    let hits = find_matching(&records, &config.project.field_name, &substring);
    for line in report_lines(&substring, &hits) {
        println!("{line}");
    }
    Ok(())
}

fn report_lines(substring: &str, hits: &[SearchHit]) -> Vec<String> {
    let mut lines = vec![format!(
        "{} observations contain '{substring}'",
        hits.len()
    )];
    lines.extend(
        hits.iter()
            .map(|hit| super::entry_line(hit.id, Some(hit.value.as_str()))),
    );
    lines
}
