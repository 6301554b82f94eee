use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::{debug, error, info};

use crate::{
    models::StoredArtifact,
    store::{ObjectStore, StoreAvailability},
};

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const KEY_TIMESTAMP_LEN: usize = 14;

pub fn report_prefix(domain: &str) -> String {
    format!("reports/{domain}/report_{domain}_")
}

pub fn report_key(domain: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{}{}.pdf",
        report_prefix(domain),
        created_at.format(KEY_TIMESTAMP_FORMAT)
    )
}

/// Extracts the creation time encoded in a report key. Anything that does not
/// end in a 14-digit UTC timestamp followed by `.pdf` is rejected.
pub fn parse_key_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let stamp = key.strip_suffix(".pdf")?.rsplit_once('_')?.1;
    if stamp.len() != KEY_TIMESTAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, KEY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Clone)]
pub struct FreshnessCache {
    objects: Arc<dyn ObjectStore>,
    availability: StoreAvailability,
}

impl FreshnessCache {
    pub fn new(objects: Arc<dyn ObjectStore>, availability: StoreAvailability) -> Self {
        Self {
            objects,
            availability,
        }
    }

    pub async fn find_recent(&self, domain: &str, max_age: Duration) -> Option<StoredArtifact> {
        self.find_recent_at(domain, max_age, Utc::now()).await
    }

    /// Newest artifact for `domain` no older than `max_age` at `now`. Store
    /// trouble of any kind means "nothing reusable".
    pub async fn find_recent_at(
        &self,
        domain: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Option<StoredArtifact> {
        if !self.availability.is_available() {
            debug!(domain, "store unavailable, skipping freshness check");
            return None;
        }

        let listed = match self.objects.list(&report_prefix(domain)).await {
            Ok(listed) => listed,
            Err(e) => {
                error!(domain, error = %e, "failed to list stored reports");
                return None;
            }
        };

        let (created_at, key) = listed
            .into_iter()
            .filter_map(|o| parse_key_timestamp(&o.key).map(|ts| (ts, o.key)))
            .max_by_key(|(ts, _)| *ts)?;

        let age = now - created_at;
        if age > max_age {
            info!(domain, key = %key, age_minutes = age.num_minutes(), "latest report is stale");
            return None;
        }

        info!(domain, key = %key, age_minutes = age.num_minutes(), "fresh report found");
        Some(StoredArtifact {
            domain: domain.to_string(),
            storage_key: key,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::store::FsObjectStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    async fn store_with(keys: &[String]) -> (Arc<dyn ObjectStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in keys {
            store.put(key, b"%PDF", "application/pdf").await.unwrap();
        }
        (Arc::new(store), dir)
    }

    #[test]
    fn key_round_trips_timestamp() {
        let key = report_key("example.com", now());
        assert_eq!(
            key,
            "reports/example.com/report_example.com_20240610120000.pdf"
        );
        assert_eq!(parse_key_timestamp(&key), Some(now()));
    }

    #[test]
    fn malformed_keys_are_not_candidates() {
        for key in [
            "reports/a.com/report_a.com_2024061012000.pdf",
            "reports/a.com/report_a.com_20241310120000.pdf",
            "reports/a.com/report_a.com_2024061012000x.pdf",
            "reports/a.com/report_a.com_20240610120000.partial",
            "reports/a.com/report_a.com_.pdf",
        ] {
            assert_eq!(parse_key_timestamp(key), None, "{key}");
        }
    }

    #[tokio::test]
    async fn two_hour_old_report_is_reused() {
        let key = report_key("example.com", now() - Duration::hours(2));
        let (store, _dir) = store_with(&[key.clone()]).await;
        let cache = FreshnessCache::new(store, StoreAvailability::AVAILABLE);

        let found = cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .expect("fresh artifact");
        assert_eq!(found.storage_key, key);
        assert_eq!(found.created_at, now() - Duration::hours(2));
    }

    #[tokio::test]
    async fn thirty_hour_old_report_is_stale() {
        let key = report_key("example.com", now() - Duration::hours(30));
        let (store, _dir) = store_with(&[key]).await;
        let cache = FreshnessCache::new(store, StoreAvailability::AVAILABLE);

        assert!(cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn window_boundary_is_inclusive() {
        let key = report_key("example.com", now() - Duration::hours(24));
        let (store, _dir) = store_with(&[key]).await;
        let cache = FreshnessCache::new(store, StoreAvailability::AVAILABLE);

        assert!(cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn newest_candidate_wins_and_junk_is_ignored() {
        let newest = report_key("example.com", now() - Duration::hours(1));
        let keys = vec![
            report_key("example.com", now() - Duration::hours(5)),
            newest.clone(),
            "reports/example.com/report_example.com_garbage.pdf".to_string(),
            report_key("other.com", now()),
        ];
        let (store, _dir) = store_with(&keys).await;
        let cache = FreshnessCache::new(store, StoreAvailability::AVAILABLE);

        let found = cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .unwrap();
        assert_eq!(found.storage_key, newest);
    }

    #[tokio::test]
    async fn unavailable_store_never_reuses() {
        let key = report_key("example.com", now() - Duration::minutes(5));
        let (store, _dir) = store_with(&[key]).await;
        let cache = FreshnessCache::new(store, StoreAvailability::UNAVAILABLE);

        assert!(cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn list_failure_fails_open() {
        struct Broken;

        #[async_trait::async_trait]
        impl ObjectStore for Broken {
            async fn list(&self, _: &str) -> anyhow::Result<Vec<crate::store::ObjectSummary>> {
                anyhow::bail!("connection reset")
            }
            async fn get(&self, _: &str) -> anyhow::Result<Vec<u8>> {
                anyhow::bail!("connection reset")
            }
            async fn put(&self, _: &str, _: &[u8], _: &str) -> anyhow::Result<()> {
                anyhow::bail!("connection reset")
            }
            async fn probe(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let cache = FreshnessCache::new(Arc::new(Broken), StoreAvailability::AVAILABLE);
        assert!(cache
            .find_recent_at("example.com", Duration::hours(24), now())
            .await
            .is_none());
    }
}
