use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Duration;
use tracing::{info, warn};

use tagrepl_core::ports::{RemoteValidator, SystemClock};
use tagrepl_core::telemetry::init_tracing;
use tagrepl_core::{Store, StoreConfig, StoreError, Task, ValidatorError};

/// 廃止済み destination のリスト（カンマ区切り）
const ENV_DECOMMISSIONED: &str = "TAGREPL_DECOMMISSIONED";

/// destination が廃止されていなければ valid とみなす validator
struct DecommissionedDestinations {
    gone: HashSet<String>,
}

impl DecommissionedDestinations {
    fn from_env() -> Self {
        let gone = env::var(ENV_DECOMMISSIONED)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { gone }
    }
}

#[async_trait]
impl RemoteValidator for DecommissionedDestinations {
    async fn valid(&self, _tag: &str, destination: &str) -> Result<bool, ValidatorError> {
        Ok(!self.gone.contains(destination))
    }
}

#[derive(Debug, Serialize)]
struct TaskView<'a> {
    tag: &'a str,
    destination: &'a str,
    created_at: DateTime<Utc>,
    last_attempt: DateTime<Utc>,
    delay_ns: u128,
    ready: bool,
}

impl<'a> From<&'a Task> for TaskView<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            tag: &task.tag,
            destination: &task.destination,
            created_at: task.created_at,
            last_attempt: task.last_attempt,
            delay_ns: task.delay.as_nanos(),
            ready: task.ready(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusView<'a> {
    pending: Vec<TaskView<'a>>,
    failed: Vec<TaskView<'a>>,
    ready: usize,
    purged_at_open: usize,
}

/// 既に入っているタスクはそのまま残す
async fn seed(store: &Store, task: &Task, failed: bool) -> Result<(), StoreError> {
    let added = if failed {
        store.add_failed(task).await
    } else {
        store.add_pending(task).await
    };
    match added {
        Ok(()) | Err(StoreError::TaskExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    // (A) 設定: 第 1 引数の data dir から tagrepl.json を読み、env で上書き
    let data_dir = env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let config = StoreConfig::load_or_default(&data_dir);

    // (B) open の時点で廃止済み destination 宛てのタスクは消える
    let validator = Arc::new(DecommissionedDestinations::from_env());
    let store = Store::open_with_config(&config, validator).await?;

    // (C) デモ用のタスクを投入
    let now_ready = Task::new("uber-usi/labrat:latest", "dc2", Duration::ZERO);
    let later = Task::new("uber-usi/labrat:latest", "dc3", Duration::from_secs(300));
    let retry = Task::new("uber-usi/labrat:v1", "dc-old", Duration::ZERO);
    seed(&store, &now_ready, false).await?;
    seed(&store, &later, false).await?;
    seed(&store, &retry, true).await?;

    // (D) 1 回試行したことにして failed 側を pending へ戻す
    store.record_attempt(&retry, Utc::now()).await?;
    if let Err(e) = store.mark_pending(&retry).await {
        warn!(error = %e, key = %retry.key(), "could not move task back to pending");
    }

    // (E) 現在の状態を JSON で出力
    let pending = store.get_pending().await?;
    let failed = store.get_failed().await?;
    let ready = store.get_ready(&SystemClock).await?;
    let status = StatusView {
        pending: pending.iter().map(TaskView::from).collect(),
        failed: failed.iter().map(TaskView::from).collect(),
        ready: ready.len(),
        purged_at_open: store.sweep_report().purged(),
    };
    println!("{}", serde_json::to_string_pretty(&status)?);

    info!(pending = pending.len(), failed = failed.len(), "done");
    store.close().await?;
    Ok(())
}
