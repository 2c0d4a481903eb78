//! 🔍 Read-only access to the buckets, for whoever does the formatting.
//!
//! Raw [`BucketDocument`]s in key order: by locator, then by day. Turning them
//! into JSON, CSV, or a pretty table is somebody else's job.

use std::sync::Arc;

use anyhow::Result;

use crate::backends::AggregateStore;
use crate::bucket_key::{BucketKey, DayStamp};
use crate::common::BucketDocument;

#[derive(Debug, Clone)]
pub struct BucketQuery {
    store: Arc<dyn AggregateStore>,
}

impl BucketQuery {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    pub async fn bucket(&self, locator: &str, day: &DayStamp) -> Result<Option<BucketDocument>> {
        self.store.get(&BucketKey::new(locator, day.clone())).await
    }

    /// 📅 Every bucket for one day.
    pub async fn by_day(&self, day: &DayStamp) -> Result<Vec<BucketDocument>> {
        self.store.scan(Some(day)).await
    }

    /// 📸 Every bucket, full stop.
    pub async fn snapshot(&self) -> Result<Vec<BucketDocument>> {
        self.store.scan(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryAggregateStore;
    use crate::testing::{day, key};

    #[tokio::test]
    async fn the_one_where_queries_slice_the_same_buckets_three_ways() -> Result<()> {
        let store = Arc::new(InMemoryAggregateStore::default());
        store
            .write_batch(vec![
                BucketDocument::empty(&key("2000", "2020-0402")),
                BucketDocument::empty(&key("1000", "2020-0403")),
                BucketDocument::empty(&key("1000", "2020-0402")),
            ])
            .await?;
        let query = BucketQuery::new(store);

        let april_2: Vec<String> = query.by_day(&day("2020-0402")).await?.into_iter().map(|b| b.locator).collect();
        assert_eq!(april_2, vec!["1000", "2000"]);
        assert_eq!(query.snapshot().await?.len(), 3);
        assert!(query.bucket("1000", &day("2020-0403")).await?.is_some());
        assert!(query.bucket("3000", &day("2020-0403")).await?.is_none());
        Ok(())
    }
}
