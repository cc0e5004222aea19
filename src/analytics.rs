use crate::{
    db::LinkStore,
    error::{Result, ShortlyError},
    models::ClickBucket,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Longest lookback accepted, one year.
pub const MAX_LOOKBACK_HOURS: u32 = 366 * 24;

/// Interval granularity for a lookback window. Every width divides a UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    TenMinutes,
    ThirtyMinutes,
    OneHour,
    SixHours,
    OneDay,
}

impl BucketWidth {
    /// <=6h: 10 min, <=12h: 30 min, <=24h: 1 h, <=72h: 6 h, otherwise 1 day.
    pub fn for_lookback(hours: u32) -> Self {
        match hours {
            0..=6 => BucketWidth::TenMinutes,
            7..=12 => BucketWidth::ThirtyMinutes,
            13..=24 => BucketWidth::OneHour,
            25..=72 => BucketWidth::SixHours,
            _ => BucketWidth::OneDay,
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            BucketWidth::TenMinutes => 10 * 60,
            BucketWidth::ThirtyMinutes => 30 * 60,
            BucketWidth::OneHour => 60 * 60,
            BucketWidth::SixHours => 6 * 60 * 60,
            BucketWidth::OneDay => 24 * 60 * 60,
        }
    }
}

/// Turns the raw click log into sparse, ascending time-series buckets.
/// Reads only the store; analytics are never cached.
#[derive(Clone)]
pub struct ClickAnalyticsAggregator {
    store: Arc<dyn LinkStore>,
}

impl ClickAnalyticsAggregator {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    pub async fn bucketed_counts(&self, link_id: i64, lookback_hours: u32) -> Result<Vec<ClickBucket>> {
        self.bucketed_counts_at(link_id, lookback_hours, Utc::now())
            .await
    }

    /// Same as [`bucketed_counts`](Self::bucketed_counts) with an explicit "now".
    pub async fn bucketed_counts_at(
        &self,
        link_id: i64,
        lookback_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClickBucket>> {
        if lookback_hours == 0 {
            return Err(ShortlyError::Validation(
                "lookback must be at least one hour".into(),
            ));
        }
        if lookback_hours > MAX_LOOKBACK_HOURS {
            return Err(ShortlyError::Validation(format!(
                "lookback must be at most {MAX_LOOKBACK_HOURS} hours"
            )));
        }

        let width = BucketWidth::for_lookback(lookback_hours);
        let since = now
            .checked_sub_signed(Duration::hours(i64::from(lookback_hours)))
            .ok_or_else(|| ShortlyError::Validation("lookback reaches before the epoch".into()))?;

        let mut buckets = self
            .store
            .query_click_buckets(link_id, since, width)
            .await?;

        // Output order is part of the contract; do not trust the backend for it.
        buckets.retain(|b| b.count > 0);
        buckets.sort_by_key(|b| b.bucket_start);

        tracing::debug!(
            "Analytics for link {}: {} bucket(s) over {}h at {:?}",
            link_id,
            buckets.len(),
            lookback_hours,
            width
        );
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::SqliteStore,
        models::{NewLink, ShortLink},
    };
    use chrono::TimeZone;

    async fn link_with_clicks(times: &[DateTime<Utc>]) -> (Arc<SqliteStore>, ShortLink) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let link = store
            .create_link(NewLink {
                code: "stats",
                target: "https://example.com",
                owner_id: Some("u1"),
                expires_at: None,
            })
            .await
            .unwrap();
        for at in times {
            store.append_click_event(link.id, *at).await.unwrap();
        }
        (store, link)
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn width_policy_boundaries() {
        assert_eq!(BucketWidth::for_lookback(1), BucketWidth::TenMinutes);
        assert_eq!(BucketWidth::for_lookback(6), BucketWidth::TenMinutes);
        assert_eq!(BucketWidth::for_lookback(7), BucketWidth::ThirtyMinutes);
        assert_eq!(BucketWidth::for_lookback(12), BucketWidth::ThirtyMinutes);
        assert_eq!(BucketWidth::for_lookback(24), BucketWidth::OneHour);
        assert_eq!(BucketWidth::for_lookback(72), BucketWidth::SixHours);
        assert_eq!(BucketWidth::for_lookback(73), BucketWidth::OneDay);
        assert_eq!(BucketWidth::for_lookback(720), BucketWidth::OneDay);
    }

    #[tokio::test]
    async fn ten_minute_buckets_are_sparse_and_ascending() {
        let (store, link) = link_with_clicks(&[utc(10, 32), utc(10, 5), utc(10, 7)]).await;
        let aggregator = ClickAnalyticsAggregator::new(store);

        let buckets = aggregator
            .bucketed_counts_at(link.id, 6, utc(12, 0))
            .await
            .unwrap();

        assert_eq!(
            buckets,
            vec![
                ClickBucket {
                    bucket_start: utc(10, 0),
                    count: 2
                },
                ClickBucket {
                    bucket_start: utc(10, 30),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn events_before_lookback_are_excluded() {
        let (store, link) = link_with_clicks(&[utc(1, 0), utc(9, 0), utc(11, 15)]).await;
        let aggregator = ClickAnalyticsAggregator::new(store);

        // now = 12:00, lookback 3h => since 09:00 inclusive
        let buckets = aggregator
            .bucketed_counts_at(link.id, 3, utc(12, 0))
            .await
            .unwrap();

        assert_eq!(
            buckets.iter().map(|b| b.bucket_start).collect::<Vec<_>>(),
            vec![utc(9, 0), utc(11, 10)]
        );
    }

    #[tokio::test]
    async fn long_lookback_groups_by_day() {
        let (store, link) = link_with_clicks(&[
            utc(0, 1),
            utc(23, 59),
            Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap(),
        ])
        .await;
        let aggregator = ClickAnalyticsAggregator::new(store);

        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let buckets = aggregator
            .bucketed_counts_at(link.id, 7 * 24, now)
            .await
            .unwrap();

        assert_eq!(
            buckets,
            vec![
                ClickBucket {
                    bucket_start: utc(0, 0),
                    count: 2
                },
                ClickBucket {
                    bucket_start: Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn zero_lookback_is_rejected() {
        let (store, link) = link_with_clicks(&[]).await;
        let aggregator = ClickAnalyticsAggregator::new(store);
        let err = aggregator.bucketed_counts(link.id, 0).await.unwrap_err();
        assert!(matches!(err, ShortlyError::Validation(_)));
    }

    #[tokio::test]
    async fn oversized_lookback_is_rejected() {
        let (store, link) = link_with_clicks(&[utc(10, 0)]).await;
        let aggregator = ClickAnalyticsAggregator::new(store);

        for hours in [MAX_LOOKBACK_HOURS + 1, u32::MAX] {
            let err = aggregator.bucketed_counts(link.id, hours).await.unwrap_err();
            assert!(matches!(err, ShortlyError::Validation(_)), "{hours}h");
        }

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let buckets = aggregator
            .bucketed_counts_at(link.id, MAX_LOOKBACK_HOURS, now)
            .await
            .unwrap();
        assert_eq!(
            buckets,
            vec![ClickBucket {
                bucket_start: utc(0, 0),
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn no_events_yields_empty_series() {
        let (store, link) = link_with_clicks(&[]).await;
        let aggregator = ClickAnalyticsAggregator::new(store);
        assert!(aggregator.bucketed_counts(link.id, 24).await.unwrap().is_empty());
    }
}
