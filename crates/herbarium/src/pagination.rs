//! Paginated collection over list endpoints.
//!
//! Two strategies, one per call site:
//! - [`PageStrategy::Cursor`]: newest first, next page asks for ids below the
//!   last id seen. Not capped by the API's page-number window, so it is used
//!   for the full record fetch.
//! - [`PageStrategy::Offset`]: page numbers from 1, used for project members.
//!
//! Both stop on the first empty or short page.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::cache::RecordSink;
use crate::client::InatClient;
use crate::error::ApiError;
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::record::HasId;

/// Default page size for list requests.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// How to advance from one page to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// `id_below=<last id>`, descending by id.
    Cursor,
    /// `page=N`.
    Offset,
}

/// A list request: endpoint path, fixed filter parameters, and paging.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub label: String,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub page_size: u32,
    pub strategy: PageStrategy,
}

/// Position within a pagination pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// First request of a cursor pass.
    Start,
    IdBelow(u64),
    Page(u32),
}

impl ListQuery {
    /// All observations that carry `field_name`, newest first.
    pub fn field_records(field_name: &str, page_size: u32) -> Self {
        Self {
            label: "observations".to_string(),
            path: "observations".to_string(),
            params: vec![
                (format!("field:{field_name}"), String::new()),
                ("per_page".to_string(), page_size.to_string()),
                ("verifiable".to_string(), "any".to_string()),
                ("order_by".to_string(), "id".to_string()),
                ("order".to_string(), "desc".to_string()),
            ],
            page_size,
            strategy: PageStrategy::Cursor,
        }
    }

    /// Observations currently in `project_id`.
    pub fn project_members(project_id: u64, page_size: u32) -> Self {
        Self {
            label: "project members".to_string(),
            path: "observations".to_string(),
            params: vec![
                ("per_page".to_string(), page_size.to_string()),
                ("project_id".to_string(), project_id.to_string()),
            ],
            page_size,
            strategy: PageStrategy::Offset,
        }
    }

    /// Where a fresh pass begins.
    pub fn first_cursor(&self) -> Cursor {
        match self.strategy {
            PageStrategy::Cursor => Cursor::Start,
            PageStrategy::Offset => Cursor::Page(1),
        }
    }

    /// Query parameters for the page at `cursor`.
    pub fn params_at(&self, cursor: Cursor) -> Vec<(String, String)> {
        let mut params = self.params.clone();
        match cursor {
            Cursor::Start => {}
            Cursor::IdBelow(id) => params.push(("id_below".to_string(), id.to_string())),
            Cursor::Page(page) => params.push(("page".to_string(), page.to_string())),
        }
        params
    }

    /// Full URL for the page at `cursor`.
    pub fn url_at(&self, client: &InatClient, cursor: Cursor) -> Result<String, ApiError> {
        client.endpoint(&self.path, &self.params_at(cursor))
    }
}

/// Lazily fetches pages of a [`ListQuery`].
///
/// Single pass: once exhausted (or after an error) it yields nothing more.
pub struct Paginator<'a, T> {
    client: &'a InatClient,
    query: ListQuery,
    cursor: Option<Cursor>,
    pages: u32,
    total: usize,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T> Paginator<'a, T>
where
    T: DeserializeOwned + HasId,
{
    pub fn new(client: &'a InatClient, query: ListQuery) -> Self {
        let cursor = Some(query.first_cursor());
        Self {
            client,
            query,
            cursor,
            pages: 0,
            total: 0,
            _record: PhantomData,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }

    /// Fetch the next page, or `None` once the pass is over.
    pub async fn next_page(
        &mut self,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Option<Vec<T>>, ApiError> {
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };

        let url = self.query.url_at(self.client, cursor)?;
        let page = self.client.get_page::<T>(&url, on_progress).await?;
        let records = page.results;

        self.pages += 1;
        self.total += records.len();
        tracing::debug!(
            label = %self.query.label,
            page = self.pages,
            count = records.len(),
            total_results = ?page.total_results,
            "Fetched page"
        );
        emit(
            on_progress,
            SyncProgress::FetchedPage {
                label: self.query.label.clone(),
                page: self.pages,
                count: records.len(),
                total_so_far: self.total,
            },
        );

        self.cursor = next_cursor(&self.query, cursor, &records);
        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(records))
    }
}

/// Cursor for the page after `records`, or `None` when the pass is done.
fn next_cursor<T: HasId>(query: &ListQuery, current: Cursor, records: &[T]) -> Option<Cursor> {
    if records.len() < query.page_size as usize {
        return None;
    }
    match (query.strategy, current) {
        (PageStrategy::Cursor, _) => records.last().map(|r| Cursor::IdBelow(r.id())),
        (PageStrategy::Offset, Cursor::Page(page)) => Some(Cursor::Page(page + 1)),
        (PageStrategy::Offset, _) => Some(Cursor::Page(2)),
    }
}

/// Drive a full pass of `query`, handing each record to `sink` as it arrives.
///
/// Returns the number of records collected. An API error (normally
/// [`ApiError::FetchExhausted`]) aborts the pass; records already handed to
/// the sink stay there.
pub async fn collect_into<T, S, E>(
    client: &InatClient,
    query: ListQuery,
    sink: &mut S,
    on_progress: Option<&ProgressCallback>,
) -> Result<usize, E>
where
    T: DeserializeOwned + HasId,
    S: RecordSink<T>,
    E: From<ApiError> + From<S::Error>,
{
    let label = query.label.clone();
    emit(
        on_progress,
        SyncProgress::FetchingRecords {
            label: label.clone(),
        },
    );

    let mut pages: Paginator<'_, T> = Paginator::new(client, query);
    while let Some(records) = pages.next_page(on_progress).await? {
        for record in records {
            sink.accept(record)?;
        }
    }

    let total = pages.total();
    tracing::info!(label = %label, total, "Collection pass complete");
    emit(on_progress, SyncProgress::FetchComplete { label, total });
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::client::ClientOptions;
    use crate::http::{HttpMethod, MockTransport};
    use crate::record::Observation;
    use crate::retry::RetryConfig;

    fn client(transport: &MockTransport, attempts: usize) -> InatClient {
        let options = ClientOptions {
            base_url: "https://api.test/v1".to_string(),
            retry: RetryConfig::default().with_max_attempts(attempts),
            ..ClientOptions::default()
        };
        InatClient::new_with_transport(options, Arc::new(transport.clone()))
    }

    fn ids(range: impl IntoIterator<Item = u64>) -> serde_json::Value {
        json!({ "results": range.into_iter().map(|id| json!({"id": id})).collect::<Vec<_>>() })
    }

    #[test]
    fn field_query_uses_descending_cursor() {
        let q = ListQuery::field_records("Herbarium Catalog Number", 200);
        assert_eq!(q.strategy, PageStrategy::Cursor);
        assert_eq!(q.first_cursor(), Cursor::Start);
        let params = q.params_at(Cursor::IdBelow(99));
        assert!(params.contains(&("order".to_string(), "desc".to_string())));
        assert!(params.contains(&("id_below".to_string(), "99".to_string())));
        assert!(params.contains(&("field:Herbarium Catalog Number".to_string(), String::new())));
    }

    #[test]
    fn short_page_ends_pass_for_any_short_length() {
        let q = ListQuery::field_records("f", 5);
        for len in 0..5u64 {
            let records: Vec<Observation> = (0..len).map(|id| Observation::new(id, vec![])).collect();
            assert_eq!(next_cursor(&q, Cursor::Start, &records), None, "len {len}");
        }
        let full: Vec<Observation> = (10..15).rev().map(|id| Observation::new(id, vec![])).collect();
        assert_eq!(next_cursor(&q, Cursor::Start, &full), Some(Cursor::IdBelow(10)));

        let members = ListQuery::project_members(1, 5);
        assert_eq!(next_cursor(&members, Cursor::Page(3), &full), Some(Cursor::Page(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_pass_follows_last_id_until_short_page() {
        let transport = MockTransport::new();
        let client = client(&transport, 5);
        let query = ListQuery::field_records("Catalog", 3);

        let first = query.url_at(&client, Cursor::Start).expect("url");
        let second = query.url_at(&client, Cursor::IdBelow(7)).expect("url");
        transport.push_json(HttpMethod::Get, &first, 200, &ids([9, 8, 7]));
        transport.push_json(HttpMethod::Get, &second, 200, &ids([6, 5]));

        let mut sink: Vec<Observation> = Vec::new();
        let total = collect_into::<_, _, ApiError>(&client, query, &mut sink, None)
            .await
            .expect("pass completes");

        assert_eq!(total, 5);
        assert_eq!(sink.iter().map(|o| o.id).collect::<Vec<_>>(), vec![9, 8, 7, 6, 5]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offset_pass_stops_on_empty_page() {
        let transport = MockTransport::new();
        let client = client(&transport, 5);
        let query = ListQuery::project_members(42, 2);

        for (page, body) in [(1, ids([1, 2])), (2, ids([3, 4])), (3, ids([]))] {
            let url = query.url_at(&client, Cursor::Page(page)).expect("url");
            transport.push_json(HttpMethod::Get, &url, 200, &body);
        }

        let mut pages: Paginator<'_, Observation> = Paginator::new(&client, query);
        assert_eq!(pages.next_page(None).await.expect("p1").map(|p| p.len()), Some(2));
        assert_eq!(pages.next_page(None).await.expect("p2").map(|p| p.len()), Some(2));
        assert!(pages.next_page(None).await.expect("p3").is_none());
        assert!(pages.is_exhausted());
        // Exhausted paginators do not issue further requests.
        assert!(pages.next_page(None).await.expect("done").is_none());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_pass_but_keep_earlier_records() {
        let transport = MockTransport::new();
        let client = client(&transport, 2);
        let query = ListQuery::field_records("Catalog", 2);

        let first = query.url_at(&client, Cursor::Start).expect("url");
        let second = query.url_at(&client, Cursor::IdBelow(4)).expect("url");
        transport.push_json(HttpMethod::Get, &first, 200, &ids([5, 4]));
        transport.push_json(HttpMethod::Get, &second, 500, &json!({}));
        transport.push_json(HttpMethod::Get, &second, 500, &json!({}));

        let mut sink: Vec<Observation> = Vec::new();
        let err = collect_into::<_, _, ApiError>(&client, query, &mut sink, None)
            .await
            .expect_err("pass aborts");

        assert!(err.is_exhausted());
        assert_eq!(sink.len(), 2);
    }
}
