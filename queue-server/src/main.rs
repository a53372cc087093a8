//! 候诊队列服务器主程序

use anyhow::Context;
use clap::Parser;
use queue_admin::{init_logging, ConfigManager, QueueMetrics};
use queue_store::InMemoryCheckInStore;
use queue_web::{AppState, WebServer};
use queue_workflow::QueueEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// 候诊队列服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "queue-server")]
#[command(about = "医院科室实时候诊队列服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机，覆盖配置文件
    #[arg(long)]
    host: Option<String>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let manager = match &args.config {
        Some(path) => ConfigManager::new(path)?,
        None => ConfigManager::from_env()?,
    };
    let mut config = manager.get_config().await;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // 初始化日志
    init_logging(&config.logging, args.log_level.as_deref())?;

    info!("启动候诊队列服务器...");
    info!("  监听地址: {}", config.bind_address());
    info!(
        "  默认平均就诊时长: {} 分钟",
        config.queue.default_average_service_minutes
    );
    info!("  科室覆盖: {}", config.queue.departments.len());

    let store = Arc::new(InMemoryCheckInStore::new());
    let engine = Arc::new(QueueEngine::new(store, config.queue_settings()));

    for department in &config.queue.watch_departments {
        if engine.watch_department(department).await?.is_some() {
            info!("  同步科室: {}", department);
        }
    }

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.bind_address()))?;
    let metrics = QueueMetrics::new()?;
    let server = WebServer::new(addr, AppState::new(engine, metrics));

    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}
