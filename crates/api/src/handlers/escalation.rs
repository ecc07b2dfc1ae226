//! 调度与投递的触发端点，由外部定时器以bearer密钥调用

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use escalator_dispatcher::ScheduleSummary;
use escalator_domain::entities::EscalationStatus;
use escalator_worker::DeliverySummary;

use crate::auth::verify_cron_secret;
use crate::error::ApiResult;
use crate::response::ApiResponse;
use crate::routes::AppState;

/// POST /api/escalation/schedule - 扫描逾期任务并调度升级
pub async fn run_scheduler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ApiResponse<ScheduleSummary>> {
    verify_cron_secret(&headers, &state.cron_secret)?;

    let summary = state.scheduler.scan_and_schedule(Utc::now()).await?;
    Ok(ApiResponse::success(summary))
}

/// POST /api/escalation/deliver - 投递到期的升级记录
pub async fn run_delivery(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ApiResponse<DeliverySummary>> {
    verify_cron_secret(&headers, &state.cron_secret)?;

    let summary = state.delivery.process_due(Utc::now()).await?;
    Ok(ApiResponse::success(summary))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub timeframe: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EscalationStats {
    pub timeframe: String,
    pub total_escalations: i64,
    pub success_rate: f64,
    pub status_breakdown: HashMap<String, i64>,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/escalations/stats - 升级记录的状态分布统计
pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> ApiResult<ApiResponse<EscalationStats>> {
    verify_cron_secret(&headers, &state.cron_secret)?;

    let timeframe = query.timeframe.unwrap_or_else(|| "24h".to_string());
    let now = Utc::now();
    let cutoff = now - Duration::hours(timeframe_hours(&timeframe));

    let counts = state.escalation_repo.count_by_status_since(cutoff).await?;
    let total: i64 = counts.iter().map(|(_, count)| count).sum();
    let sent = counts
        .iter()
        .find(|(status, _)| *status == EscalationStatus::Sent)
        .map(|(_, count)| *count)
        .unwrap_or(0);
    let success_rate = if total > 0 {
        ((sent as f64 / total as f64) * 10000.0).round() / 100.0
    } else {
        0.0
    };

    Ok(ApiResponse::success(EscalationStats {
        timeframe,
        total_escalations: total,
        success_rate,
        status_breakdown: counts
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect(),
        timestamp: now,
    }))
}

fn timeframe_hours(timeframe: &str) -> i64 {
    match timeframe {
        "1h" => 1,
        "7d" => 24 * 7,
        "30d" => 24 * 30,
        _ => 24,
    }
}
