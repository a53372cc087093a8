//! 轮询订阅适配器
//!
//! 为不支持变更通知的存储提供 `watch` 语义：按固定间隔查询，
//! 只有快照发生变化时才推送。

use crate::store::{CheckInStore, SnapshotStream};
use futures::{stream, StreamExt};
use queue_core::{CheckIn, CheckInStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

struct PollState {
    store: Arc<dyn CheckInStore>,
    department: String,
    status: CheckInStatus,
    last: Option<Vec<CheckIn>>,
    ticker: Interval,
}

/// 以轮询方式订阅科室内指定状态的记录集合
///
/// 查询失败作为 `Err` 项推送，流本身不会终止。
pub fn poll_snapshots(
    store: Arc<dyn CheckInStore>,
    department: &str,
    status: CheckInStatus,
    period: Duration,
) -> SnapshotStream {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = PollState {
        store,
        department: department.to_string(),
        status,
        last: None,
        ticker,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            state.ticker.tick().await;

            match state.store.query(&state.department, &[state.status]).await {
                Ok(snapshot) => {
                    if state.last.as_ref() == Some(&snapshot) {
                        continue;
                    }
                    state.last = Some(snapshot.clone());
                    return Some((Ok(snapshot), state));
                }
                Err(e) => {
                    tracing::warn!(
                        "Polling query failed for department {}: {}",
                        state.department,
                        e
                    );
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckInStore;
    use chrono::Utc;
    use queue_core::{AppointmentType, NewCheckIn};

    #[tokio::test]
    async fn test_polling_only_emits_on_change() {
        let store = Arc::new(InMemoryCheckInStore::new());
        let mut snapshots = poll_snapshots(
            store.clone(),
            "radiology",
            CheckInStatus::Waiting,
            Duration::from_millis(5),
        );

        let first = snapshots.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store
            .create(CheckIn::new(
                NewCheckIn {
                    department: "radiology".to_string(),
                    patient_id: "P1".to_string(),
                    patient_name: "Bo".to_string(),
                    appointment_type: AppointmentType::FollowUp,
                },
                Utc::now(),
            ))
            .await
            .unwrap();

        let second = tokio::time::timeout(Duration::from_secs(1), snapshots.next())
            .await
            .expect("poll should observe the new record")
            .unwrap()
            .unwrap();
        assert_eq!(second.len(), 1);
    }
}
