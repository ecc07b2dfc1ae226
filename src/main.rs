use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use escalator_api::{create_routes, AppConfig, AppState};
use escalator_dispatcher::EscalationScheduler;
use escalator_domain::messages::ShameMessageGenerator;
use escalator_domain::ports::Notifier;
use escalator_domain::repositories::{
    EngagementRepository, EscalationRepository, TaskRepository,
};
use escalator_domain::state::EscalationStateManager;
use escalator_infrastructure::{
    PostgresEngagementRepository, PostgresEscalationRepository, PostgresTaskRepository,
    ResendNotifier,
};
use escalator_worker::{DeliveryWorker, ReceiptIngestor};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("escalator")
        .version("1.0.0")
        .about("任务问责升级通知系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/escalator.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    init_logging(log_level, log_format);

    info!("启动任务问责升级通知系统");
    info!("配置文件: {config_path}");

    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("连接数据库失败")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("执行数据库迁移失败")?;
    info!("数据库迁移完成");

    // 组装仓储与服务，仓储以显式注入方式传入各组件
    let task_repo: Arc<dyn TaskRepository> = Arc::new(PostgresTaskRepository::new(pool.clone()));
    let escalation_repo: Arc<dyn EscalationRepository> =
        Arc::new(PostgresEscalationRepository::new(pool.clone()));
    let engagement_repo: Arc<dyn EngagementRepository> =
        Arc::new(PostgresEngagementRepository::new(pool.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(ResendNotifier::new(config.resend.api_key.clone()));

    let state_manager = Arc::new(EscalationStateManager::new(
        escalation_repo.clone(),
        engagement_repo,
        None,
    ));
    let scheduler = Arc::new(EscalationScheduler::new(
        task_repo,
        escalation_repo.clone(),
    ));
    let delivery = Arc::new(DeliveryWorker::new(
        escalation_repo.clone(),
        state_manager.clone(),
        notifier,
        Arc::new(ShameMessageGenerator::new()),
        config.resend.from.clone(),
    ));
    let ingestor = Arc::new(ReceiptIngestor::new(
        escalation_repo.clone(),
        state_manager,
    ));

    let app_state = AppState {
        scheduler,
        delivery,
        ingestor,
        escalation_repo,
        cron_secret: config.cron.secret.clone(),
    };
    let router = create_routes(app_state);

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("绑定地址失败: {}", config.server.bind_address))?;
    info!("API服务监听于 {}", config.server.bind_address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API服务异常退出")?;

    info!("服务已退出");
    Ok(())
}

fn init_logging(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("收到退出信号，开始优雅关闭");
}
