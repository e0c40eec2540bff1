//! Paginated retrieval with `limit`/`skip` accumulation.

use std::future::Future;

use serde_json::Value;

/// Accumulates pages from `page(limit, skip)` until the requested limit
/// is satisfied or a short page signals the end of the result set.
///
/// `limit` defaults to `batch_size`.
pub(crate) async fn batch_exec<F, Fut, E>(
    mut page: F,
    batch_size: u64,
    limit: Option<u64>,
) -> Result<Vec<Value>, E>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, E>>,
{
    let batch_size = batch_size.max(1);
    let limit = limit.unwrap_or(batch_size);

    let mut results = Vec::new();
    let mut left = limit;
    let mut iteration = 0u64;

    while left > 0 {
        let page_limit = left.min(batch_size);
        let skip = batch_size * iteration;

        let items = page(page_limit, skip).await?;
        let short = u64::try_from(items.len()).unwrap_or(u64::MAX) < batch_size;
        results.extend(items);

        if short {
            break;
        }
        left = left.saturating_sub(batch_size);
        iteration += 1;
    }

    Ok(results)
}
