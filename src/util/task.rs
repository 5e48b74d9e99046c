use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Run a future, converting a panic inside it into an error message.
///
/// Used around per-feed ingestion so a panic in one feed's processing never
/// unwinds into the polling loop:
///
/// ```ignore
/// match catch_task_panic(ingest_feed(store, fetcher, &feed)).await {
///     Ok(result) => record(result),
///     Err(panic_msg) => tracing::error!(feed_id = feed.id, error = %panic_msg, "Ingestion panicked"),
/// }
/// ```
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "panic with non-string payload".to_string()
            }
        })
}
