//! The append-only request log. Rows are inserted once and never updated.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::AppError;
use crate::proxy::types::ProxyMode;
use crate::proxy::usage::{RequestOutcome, RequestRecord};
use crate::services::usage_stats::{LogFilters, UsageTotals};

const SELECT_COLUMNS: &str = "request_id, created_at, provider_id, model, input_tokens,
    output_tokens, cost, latency_ms, status_code, mode, outcome, is_streaming, error_message";

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn insert(conn: &Connection, record: &RequestRecord) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO proxy_request_logs (
            request_id, created_at, provider_id, model, input_tokens, output_tokens,
            cost, latency_ms, status_code, mode, outcome, is_streaming, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.request_id,
            record.timestamp.timestamp_millis(),
            record.provider_id,
            record.model,
            clamp_i64(record.tokens_in),
            clamp_i64(record.tokens_out),
            record.cost.to_string(),
            clamp_i64(record.latency_ms),
            record.status_code,
            record.mode.as_str(),
            record.outcome.as_str(),
            record.is_streaming,
            record.error_message,
        ],
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> Result<RequestRecord, AppError> {
    let created_at: i64 = row.get(1)?;
    let cost: String = row.get(6)?;
    let mode: String = row.get(9)?;
    let outcome: String = row.get(10)?;

    Ok(RequestRecord {
        request_id: row.get(0)?,
        timestamp: DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or_else(|| AppError::Database(format!("bad created_at: {created_at}")))?,
        provider_id: row.get(2)?,
        model: row.get(3)?,
        tokens_in: row.get::<_, i64>(4)?.max(0) as u64,
        tokens_out: row.get::<_, i64>(5)?.max(0) as u64,
        cost: Decimal::from_str(&cost)
            .map_err(|e| AppError::Database(format!("bad cost '{cost}': {e}")))?,
        latency_ms: row.get::<_, i64>(7)?.max(0) as u64,
        status_code: row.get(8)?,
        mode: ProxyMode::from_str(&mode)?,
        outcome: RequestOutcome::from_str(&outcome)?,
        is_streaming: row.get(11)?,
        error_message: row.get(12)?,
    })
}

/// Totals over `start_ms <= created_at < end_ms`.
pub(crate) fn sum_range(
    conn: &Connection,
    start_ms: i64,
    end_ms: i64,
) -> Result<UsageTotals, AppError> {
    let mut stmt = conn.prepare(
        "SELECT input_tokens, output_tokens, cost, latency_ms, outcome
         FROM proxy_request_logs WHERE created_at >= ?1 AND created_at < ?2",
    )?;
    let mut rows = stmt.query(params![start_ms, end_ms])?;
    let mut totals = UsageTotals::default();
    while let Some(row) = rows.next()? {
        let cost: String = row.get(2)?;
        let outcome: String = row.get(4)?;
        totals.add(
            row.get::<_, i64>(0)?.max(0) as u64,
            row.get::<_, i64>(1)?.max(0) as u64,
            Decimal::from_str(&cost).unwrap_or_default(),
            row.get::<_, i64>(3)?.max(0) as u64,
            outcome == RequestOutcome::Success.as_str(),
        );
    }
    Ok(totals)
}

/// Visits every record in append order.
pub(crate) fn for_each<F>(conn: &Connection, mut visit: F) -> Result<(), AppError>
where
    F: FnMut(RequestRecord),
{
    let sql = format!("SELECT {SELECT_COLUMNS} FROM proxy_request_logs ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        visit(record_from_row(row)?);
    }
    Ok(())
}

/// Newest-first page of records plus the total matching count.
pub(crate) fn query_page(
    conn: &Connection,
    filters: &LogFilters,
    page: u32,
    page_size: u32,
) -> Result<(Vec<RequestRecord>, u64), AppError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    if let Some(provider_id) = &filters.provider_id {
        clauses.push("provider_id = ?");
        args.push(SqlValue::Text(provider_id.clone()));
    }
    if let Some(model) = &filters.model {
        clauses.push("model = ?");
        args.push(SqlValue::Text(model.clone()));
    }
    if let Some(min) = filters.status_min {
        clauses.push("status_code >= ?");
        args.push(SqlValue::Integer(min as i64));
    }
    if let Some(max) = filters.status_max {
        clauses.push("status_code <= ?");
        args.push(SqlValue::Integer(max as i64));
    }
    if let Some(start) = filters.start_date {
        clauses.push("created_at >= ?");
        args.push(SqlValue::Integer(start.saturating_mul(1000)));
    }
    if let Some(end) = filters.end_date {
        clauses.push("created_at < ?");
        args.push(SqlValue::Integer(end.saturating_mul(1000)));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM proxy_request_logs {where_sql}"),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let page_size = page_size.clamp(1, 500);
    let offset = page as i64 * page_size as i64;
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM proxy_request_logs {where_sql}
         ORDER BY seq DESC LIMIT {page_size} OFFSET {offset}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    let mut data = Vec::new();
    while let Some(row) = rows.next()? {
        data.push(record_from_row(row)?);
    }
    Ok((data, total.max(0) as u64))
}
