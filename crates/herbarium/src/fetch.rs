//! Full fetch of field-tagged observations into the on-disk cache.

use std::path::Path;

use crate::cache::{CacheWriter, load_cache};
use crate::client::InatClient;
use crate::error::{CacheError, FetchError};
use crate::pagination::{ListQuery, collect_into};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::record::Observation;

/// Fetch every observation carrying `field_name` and write it to `cache_path`.
///
/// Each record hits the disk as soon as its page arrives. The cache is only
/// terminated when the pass completes; if the pass aborts, the file keeps the
/// records fetched so far but will not load.
pub async fn fetch_to_cache(
    client: &InatClient,
    field_name: &str,
    page_size: u32,
    cache_path: &Path,
    on_progress: Option<&ProgressCallback>,
) -> Result<usize, FetchError> {
    let mut writer = CacheWriter::create(cache_path)?;
    let query = ListQuery::field_records(field_name, page_size);

    match collect_into::<Observation, _, FetchError>(client, query, &mut writer, on_progress).await
    {
        Ok(_) => {
            let written = writer.finish()?;
            tracing::info!(path = %cache_path.display(), records = written, "Cached observations");
            Ok(written)
        }
        Err(e) => {
            tracing::warn!(
                path = %cache_path.display(),
                records = writer.written(),
                error = %e,
                "Fetch aborted; cache left incomplete"
            );
            Err(e)
        }
    }
}

/// Load the cache, running a full fetch first if it is missing or incomplete.
pub async fn load_or_fetch(
    client: &InatClient,
    field_name: &str,
    page_size: u32,
    cache_path: &Path,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<Observation>, FetchError> {
    match load_cache(cache_path) {
        Ok(records) => return Ok(records),
        Err(CacheError::Missing(_)) => {
            tracing::info!(path = %cache_path.display(), "No cache yet, fetching");
        }
        Err(e @ CacheError::Incomplete { .. }) => {
            tracing::warn!(error = %e, "Discarding incomplete cache, fetching again");
            emit(
                on_progress,
                SyncProgress::Warning {
                    message: format!("{} is incomplete, fetching again", cache_path.display()),
                },
            );
        }
        Err(e) => return Err(e.into()),
    }

    fetch_to_cache(client, field_name, page_size, cache_path, on_progress).await?;
    Ok(load_cache(cache_path)?)
}
