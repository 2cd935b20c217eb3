//! Usage recorder and aggregator.
//!
//! The request log in SQLite is the source of truth. Day buckets keyed by
//! `(UTC date, provider, model)` are maintained in memory as records are
//! appended and can always be rebuilt from the log.
//!
//! Records from the proxy are queued to a dedicated writer thread, so a
//! request never waits on the SQLite commit.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, oneshot};

use crate::database::{request_logs, Database};
use crate::error::AppError;
use crate::proxy::error::ProxyError;
use crate::proxy::usage::{stored_count, RequestOutcome, RequestRecord};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub request_count: u64,
    pub success_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: Decimal,
    pub total_latency_ms: u64,
}

impl UsageTotals {
    pub(crate) fn add(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
        latency_ms: u64,
        success: bool,
    ) {
        self.request_count = self.request_count.saturating_add(1);
        if success {
            self.success_count = self.success_count.saturating_add(1);
        }
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.total_cost = self.total_cost.saturating_add(cost);
        self.total_latency_ms = self.total_latency_ms.saturating_add(latency_ms);
    }

    /// Folds the record in as the log stores it.
    fn add_record(&mut self, record: &RequestRecord) {
        self.add(
            stored_count(record.tokens_in),
            stored_count(record.tokens_out),
            record.cost,
            stored_count(record.latency_ms),
            record.outcome == RequestOutcome::Success,
        );
    }

    fn merge(&mut self, other: &UsageTotals) {
        self.request_count = self.request_count.saturating_add(other.request_count);
        self.success_count = self.success_count.saturating_add(other.success_count);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_cost = self.total_cost.saturating_add(other.total_cost);
        self.total_latency_ms = self.total_latency_ms.saturating_add(other.total_latency_ms);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Rollup as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregate {
    pub request_count: u64,
    pub success_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
    pub avg_latency_ms: u64,
    pub success_rate: f64,
}

impl From<&UsageTotals> for UsageAggregate {
    fn from(t: &UsageTotals) -> Self {
        let (avg_latency_ms, success_rate) = if t.request_count == 0 {
            (0, 0.0)
        } else {
            (
                t.total_latency_ms / t.request_count,
                t.success_count as f64 / t.request_count as f64,
            )
        };
        Self {
            request_count: t.request_count,
            success_count: t.success_count,
            input_tokens: t.input_tokens,
            output_tokens: t.output_tokens,
            total_tokens: t.total_tokens(),
            total_cost: t.total_cost,
            avg_latency_ms,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_requests: u64,
    pub total_cost: Decimal,
    pub total_tokens: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub success_rate: f64,
}

impl From<&UsageTotals> for UsageSummary {
    fn from(t: &UsageTotals) -> Self {
        let agg = UsageAggregate::from(t);
        Self {
            total_requests: agg.request_count,
            total_cost: agg.total_cost,
            total_tokens: agg.total_tokens,
            total_input_tokens: agg.input_tokens,
            total_output_tokens: agg.output_tokens,
            success_rate: agg.success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: String,
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilters {
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    /// Epoch seconds, inclusive.
    pub start_date: Option<i64>,
    /// Epoch seconds, exclusive.
    pub end_date: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedLogs {
    pub data: Vec<RequestRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    date: NaiveDate,
    provider_id: String,
    model: String,
}

impl BucketKey {
    fn of(record: &RequestRecord) -> Self {
        Self {
            date: record.timestamp.date_naive(),
            provider_id: record.provider_id.clone(),
            model: record.model.clone(),
        }
    }
}

type Buckets = BTreeMap<BucketKey, UsageTotals>;

/// The log and its day buckets, shared with the writer thread.
struct UsageStore {
    db: Arc<Database>,
    buckets: RwLock<Buckets>,
}

impl UsageStore {
    fn read_buckets(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_buckets(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Both steps run under the writer connection lock, so appends are
    /// ordered and a bucket never reflects a row that failed to insert.
    fn append(&self, record: &RequestRecord) -> Result<(), AppError> {
        let conn = self.db.lock_conn();
        request_logs::insert(&conn, record)?;
        self.write_buckets()
            .entry(BucketKey::of(record))
            .or_default()
            .add_record(record);
        Ok(())
    }
}

enum WriterMsg {
    Record(Box<RequestRecord>),
    Flush(oneshot::Sender<()>),
}

fn spawn_writer(store: Arc<UsageStore>) -> Result<mpsc::UnboundedSender<WriterMsg>, AppError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriterMsg>();
    std::thread::Builder::new()
        .name("usage-writer".into())
        .spawn(move || {
            // Ends once the service and every sender are gone.
            while let Some(msg) = rx.blocking_recv() {
                match msg {
                    WriterMsg::Record(record) => {
                        if let Err(e) = store.append(&record) {
                            log::error!(
                                "[Usage] 写入请求日志失败 {}: {e}",
                                record.request_id
                            );
                        }
                    }
                    WriterMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        })
        .map_err(|e| AppError::Message(format!("failed to start usage writer: {e}")))?;
    Ok(tx)
}

pub struct UsageStatsService {
    store: Arc<UsageStore>,
    writer: mpsc::UnboundedSender<WriterMsg>,
}

impl UsageStatsService {
    pub fn new(db: Arc<Database>) -> Result<Self, AppError> {
        let store = Arc::new(UsageStore {
            db,
            buckets: RwLock::new(Buckets::new()),
        });
        let service = Self {
            writer: spawn_writer(store.clone())?,
            store,
        };
        service.rebuild_aggregates()?;
        Ok(service)
    }

    fn read_buckets(&self) -> RwLockReadGuard<'_, Buckets> {
        self.store.read_buckets()
    }

    /// Appends the record, then folds it into its day bucket, on the
    /// calling thread.
    pub fn record(&self, record: &RequestRecord) -> Result<(), AppError> {
        self.store.append(record)
    }

    /// Queues the record for the writer thread. Records are appended in
    /// submission order.
    pub fn submit(&self, record: RequestRecord) {
        let msg = WriterMsg::Record(Box::new(record));
        if let Err(mpsc::error::SendError(WriterMsg::Record(record))) = self.writer.send(msg) {
            log::warn!("[Usage] 写入线程已退出，同步写入");
            if let Err(e) = self.store.append(&record) {
                log::error!("[Usage] 写入请求日志失败 {}: {e}", record.request_id);
            }
        }
    }

    /// Resolves once every record submitted before the call is written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(WriterMsg::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Recomputes every bucket from the request log.
    pub fn rebuild_aggregates(&self) -> Result<(), AppError> {
        let conn = self.store.db.lock_conn();
        let mut fresh = Buckets::new();
        let mut count = 0u64;
        request_logs::for_each(&conn, |record| {
            fresh.entry(BucketKey::of(&record)).or_default().add_record(&record);
            count += 1;
        })?;
        *self.store.write_buckets() = fresh;
        log::info!("[Usage] 聚合已重建，共 {count} 条请求记录");
        Ok(())
    }

    /// Totals over `start <= timestamp < end` (epoch seconds).
    pub fn summary(&self, start: i64, end: i64) -> Result<UsageSummary, ProxyError> {
        if start > end {
            return Err(ProxyError::UnknownQueryRange(format!(
                "start {start} is after end {end}"
            )));
        }

        let totals = if start % SECS_PER_DAY == 0 && end % SECS_PER_DAY == 0 {
            self.sum_whole_days(start, end)?
        } else {
            let conn = self.store.db.lock_reader();
            request_logs::sum_range(&conn, start.saturating_mul(1000), end.saturating_mul(1000))?
        };
        Ok(UsageSummary::from(&totals))
    }

    fn sum_whole_days(&self, start: i64, end: i64) -> Result<UsageTotals, ProxyError> {
        let to_date = |secs: i64| {
            chrono::DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    ProxyError::UnknownQueryRange(format!("timestamp out of range: {secs}"))
                })
        };
        let (first, last) = (to_date(start)?, to_date(end)?);

        let mut totals = UsageTotals::default();
        for (key, bucket) in self.read_buckets().iter() {
            if key.date >= first && key.date < last {
                totals.merge(bucket);
            }
        }
        Ok(totals)
    }

    /// One entry per day for the last `days` days (1, 7 or 30), oldest first.
    pub fn trends(&self, days: u32) -> Result<Vec<DailyStats>, ProxyError> {
        self.trends_ending(days, Utc::now().date_naive())
    }

    pub fn trends_ending(
        &self,
        days: u32,
        today: NaiveDate,
    ) -> Result<Vec<DailyStats>, ProxyError> {
        if !matches!(days, 1 | 7 | 30) {
            return Err(ProxyError::UnknownQueryRange(format!(
                "trends supports 1, 7 or 30 days, got {days}"
            )));
        }
        let first = today - Duration::days(i64::from(days) - 1);

        let mut per_day: BTreeMap<NaiveDate, UsageTotals> = BTreeMap::new();
        {
            let buckets = self.read_buckets();
            for (key, bucket) in buckets.iter() {
                if key.date >= first && key.date <= today {
                    per_day.entry(key.date).or_default().merge(bucket);
                }
            }
        }

        Ok(first
            .iter_days()
            .take(days as usize)
            .map(|date| {
                let t = per_day.remove(&date).unwrap_or_default();
                DailyStats {
                    date: date.format("%Y-%m-%d").to_string(),
                    request_count: t.request_count,
                    input_tokens: t.input_tokens,
                    output_tokens: t.output_tokens,
                    total_tokens: t.total_tokens(),
                    total_cost: t.total_cost,
                }
            })
            .collect())
    }

    pub fn provider_stats(&self) -> BTreeMap<String, UsageAggregate> {
        self.group_by(|key| key.provider_id.clone())
    }

    pub fn model_stats(&self) -> BTreeMap<String, UsageAggregate> {
        self.group_by(|key| key.model.clone())
    }

    fn group_by<F>(&self, key_of: F) -> BTreeMap<String, UsageAggregate>
    where
        F: Fn(&BucketKey) -> String,
    {
        let mut grouped: BTreeMap<String, UsageTotals> = BTreeMap::new();
        for (key, bucket) in self.read_buckets().iter() {
            grouped.entry(key_of(key)).or_default().merge(bucket);
        }
        grouped
            .iter()
            .map(|(k, t)| (k.clone(), UsageAggregate::from(t)))
            .collect()
    }

    pub fn request_logs(
        &self,
        filters: &LogFilters,
        page: u32,
        page_size: u32,
    ) -> Result<PaginatedLogs, AppError> {
        let conn = self.store.db.lock_reader();
        let (data, total) = request_logs::query_page(&conn, filters, page, page_size)?;
        Ok(PaginatedLogs {
            data,
            total,
            page,
            page_size: page_size.clamp(1, 500),
        })
    }
}
