use std::sync::Arc;

use anyhow::Context;
use herbarium::fetch_to_cache;

use crate::config::Config;
use crate::progress::ProgressReporter;

/// Re-fetch every field-tagged observation, overwriting the cache.
pub(crate) async fn handle_fetch(config: &Config) -> anyhow::Result<()> {
    let client = super::build_client(config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();

    let result = fetch_to_cache(
        &client,
        &config.project.field_name,
        client.page_size(),
        &config.cache.path,
        Some(&callback),
    )
    .await;
    reporter.finish();

    let written = result.with_context(|| {
        format!(
            "fetch aborted; {} is incomplete and will be fetched again",
            config.cache.path.display()
        )
    })?;
    println!(
        "Cached {written} observations to {}",
        config.cache.path.display()
    );
    Ok(())
}
