//! 在院人数定时刷新
//!
//! 刷新任务周期性地读取全部记录、重算当天各桶宽的在院人数，并整体替换
//! 已发布的快照。同一时刻只有一次计算在进行；读者总是拿到最近一次
//! 完整算完的结果。

use chrono::{Local, NaiveDateTime};
use ertrack_core::{BucketWidth, OccupancySnapshot, Result};
use ertrack_storage::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::OccupancyConfig;

/// 最近一次发布的快照
#[derive(Debug, Clone, Default)]
pub struct LatestOccupancy {
    inner: Arc<RwLock<Option<Arc<OccupancySnapshot>>>>,
}

impl LatestOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Arc<OccupancySnapshot>> {
        self.inner.read().await.clone()
    }

    pub async fn publish(&self, snapshot: OccupancySnapshot) -> Arc<OccupancySnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.inner.write().await = Some(snapshot.clone());
        snapshot
    }
}

/// 在院人数刷新器
pub struct OccupancyRefresher {
    store: Arc<dyn RecordStore>,
    widths: Vec<BucketWidth>,
    period: Duration,
    latest: LatestOccupancy,
}

impl OccupancyRefresher {
    pub fn new(store: Arc<dyn RecordStore>, widths: Vec<BucketWidth>, period: Duration) -> Self {
        Self {
            store,
            widths,
            period: period.max(Duration::from_millis(1)),
            latest: LatestOccupancy::new(),
        }
    }

    pub fn from_config(store: Arc<dyn RecordStore>, config: &OccupancyConfig) -> Result<Self> {
        Ok(Self::new(store, config.widths()?, config.refresh_interval()))
    }

    /// 供读者使用的快照句柄
    pub fn latest(&self) -> LatestOccupancy {
        self.latest.clone()
    }

    /// 以 `now` 为准计算并发布一次快照；失败时保留上一次的结果
    pub async fn refresh_once(&self, now: NaiveDateTime) -> Result<Arc<OccupancySnapshot>> {
        let records = self.store.load_all().await?;
        let snapshot = OccupancySnapshot::compute(&records, &self.widths, now);

        for series in snapshot.series.iter().filter(|s| s.has_negative()) {
            warn!(
                "Negative occupancy in {}-minute series for {}; records are inconsistent",
                series.bucket_width_minutes, series.date
            );
        }

        Ok(self.latest.publish(snapshot).await)
    }

    /// 刷新循环，不会返回
    pub async fn run(self) {
        info!(
            "Starting occupancy refresh every {:?} for widths {:?}",
            self.period,
            self.widths.iter().map(|w| w.minutes()).collect::<Vec<_>>()
        );

        let mut ticker = interval(self.period);
        // 上一次计算超时时顺延，而不是连续补跑
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.refresh_once(Local::now().naive_local()).await {
                Ok(snapshot) => debug!(
                    "Occupancy refreshed: {} admitted at {}",
                    snapshot.admitted_now, snapshot.generated_at
                ),
                Err(e) => error!("Error refreshing occupancy: {}", e),
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use ertrack_core::{AdmissionRecord, ErError};
    use ertrack_storage::MemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    /// 第一次读取成功，之后全部失败
    struct FlakyStore {
        calls: AtomicUsize,
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn load_all(&self) -> Result<Vec<AdmissionRecord>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.load_all().await
            } else {
                Err(ErError::data_unavailable("store went away"))
            }
        }

        async fn append(&self, record: AdmissionRecord) -> Result<()> {
            self.inner.append(record).await
        }

        async fn discharge(&self, patient_id: &str, at: NaiveDateTime) -> Result<AdmissionRecord> {
            self.inner.discharge(patient_id, at).await
        }
    }

    fn records() -> Vec<AdmissionRecord> {
        vec![
            AdmissionRecord::new("P1", "H001", at(16, 23)),
            AdmissionRecord::new("P2", "H001", at(17, 2)),
        ]
    }

    #[tokio::test]
    async fn test_refresh_once_publishes() {
        let store = Arc::new(MemoryRecordStore::with_records(records()));
        let refresher = OccupancyRefresher::new(
            store,
            vec![BucketWidth::HOURLY, BucketWidth::HALF_HOURLY],
            Duration::from_secs(5),
        );
        let latest = refresher.latest();
        assert!(latest.get().await.is_none());

        refresher.refresh_once(at(17, 6)).await.unwrap();

        let snapshot = latest.get().await.unwrap();
        assert_eq!(snapshot.admitted_now, 2);
        let hourly = snapshot.series_for(BucketWidth::HOURLY).unwrap();
        assert_eq!(hourly.initial_count, 1);
        assert_eq!(hourly.last_count(), 2);
        assert_eq!(snapshot.series_for(BucketWidth::HALF_HOURLY).unwrap().counts.len(), 49);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
            inner: MemoryRecordStore::with_records(records()),
        });
        let refresher = OccupancyRefresher::new(store, vec![BucketWidth::HOURLY], Duration::from_secs(5));
        let latest = refresher.latest();

        let first = refresher.refresh_once(at(17, 6)).await.unwrap();
        let second = refresher.refresh_once(at(17, 7)).await;
        assert!(matches!(second, Err(ErError::DataUnavailable(_))));

        let current = latest.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.generated_at, at(17, 6));
    }

    #[tokio::test]
    async fn test_spawned_loop_publishes() {
        let store = Arc::new(MemoryRecordStore::with_records(records()));
        let refresher = OccupancyRefresher::new(store, vec![BucketWidth::HOURLY], Duration::from_millis(10));
        let latest = refresher.latest();

        let handle = refresher.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(latest.get().await.is_some());
    }

    #[test]
    fn test_from_config_rejects_bad_width() {
        let config = OccupancyConfig {
            refresh_interval_secs: 5,
            bucket_widths: vec![0],
        };
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        assert!(OccupancyRefresher::from_config(store, &config).is_err());
    }
}
