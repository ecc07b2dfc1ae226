use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use escalator_dispatcher::EscalationScheduler;
use escalator_domain::repositories::EscalationRepository;
use escalator_worker::{DeliveryWorker, ReceiptIngestor};

use crate::handlers::{
    escalation::{get_stats, run_delivery, run_scheduler},
    health::health_check,
    webhooks::resend_webhook,
};
use crate::middleware;

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<EscalationScheduler>,
    pub delivery: Arc<DeliveryWorker>,
    pub ingestor: Arc<ReceiptIngestor>,
    pub escalation_repo: Arc<dyn EscalationRepository>,
    pub cron_secret: String,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 定时触发端点
        .route("/api/escalation/schedule", post(run_scheduler))
        .route("/api/escalation/deliver", post(run_delivery))
        // 统计
        .route("/api/escalations/stats", get(get_stats))
        // 服务商回执webhook
        .route("/api/webhooks/resend", post(resend_webhook))
        .layer(axum_middleware::from_fn(middleware::request_logging))
        .layer(middleware::cors_layer())
        .layer(middleware::trace_layer())
        .with_state(state)
}

#[cfg(test)]
impl AppState {
    /// 基于内存mock搭建完整的应用状态，处理器单元测试用
    pub fn for_tests(store: escalator_testing_utils::MockStore, cron_secret: &str) -> Self {
        use escalator_domain::messages::ShameMessageGenerator;
        use escalator_domain::state::EscalationStateManager;
        use escalator_testing_utils::MockNotifier;

        let escalation_repo: Arc<dyn EscalationRepository> = Arc::new(store.clone());
        let state_manager = Arc::new(EscalationStateManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            None,
        ));
        let scheduler = Arc::new(EscalationScheduler::new(
            Arc::new(store.clone()),
            escalation_repo.clone(),
        ));
        let delivery = Arc::new(DeliveryWorker::new(
            escalation_repo.clone(),
            state_manager.clone(),
            Arc::new(MockNotifier::succeeding()),
            Arc::new(ShameMessageGenerator::with_seed(1)),
            "AccountaList <noreply@accountalist.com>".to_string(),
        ));
        let ingestor = Arc::new(ReceiptIngestor::new(escalation_repo.clone(), state_manager));

        Self {
            scheduler,
            delivery,
            ingestor,
            escalation_repo,
            cron_secret: cron_secret.to_string(),
        }
    }
}
