/*
 * CloudTab - Remote Odoo Hosting Orchestrator
 * Copyright (c) 2024 CloudTab Project
 *
 * This work is licensed under CC BY-NC-SA 4.0
 * https://creativecommons.org/licenses/by-nc-sa/4.0/
 */

use axum::{Router, http::Method, response::Json, routing::get};
use cloudtab_backend::{
    config::Config,
    database::Database,
    docs::ApiDoc,
    error::AppResult,
    handlers::{AppState, Orchestrator, health_check},
    remote::SshConnector,
    repositories::PgStore,
    routes::create_api_routes,
    services::SweepScheduler,
    storage::{ObjectStorage, S3Storage},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> AppResult<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudtab_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置；文件存在但无效时直接退出
    let config = if std::path::Path::new(CONFIG_PATH).exists() {
        let config = Config::from_file(CONFIG_PATH)?;
        tracing::info!("已加载配置文件: {}", CONFIG_PATH);
        config
    } else {
        tracing::warn!("未找到配置文件，使用默认配置");
        let default_config = Config::default();
        if let Err(e) = default_config.save_to_file(CONFIG_PATH) {
            tracing::warn!("保存默认配置失败: {}", e);
        }
        default_config
    };

    tracing::info!("服务器配置: {}", config.server_addr());

    // 初始化数据库（如果连接失败则继续启动，但任务系统不可用）
    let database = match Database::new(&config.database).await {
        Ok(db) => {
            if let Err(e) = db.verify_connection().await {
                tracing::warn!("数据库验证失败: {}", e);
            }
            Some(db)
        }
        Err(e) => {
            tracing::warn!("数据库连接失败，服务将在无数据库模式下启动: {}", e);
            None
        }
    };

    let objects: Option<Arc<dyn ObjectStorage>> = match &config.s3 {
        Some(s3) => {
            tracing::info!("已配置S3对象存储: {}", s3.endpoint.as_deref().unwrap_or("AWS"));
            Some(Arc::new(S3Storage::new(s3)))
        }
        None => {
            tracing::info!("未配置S3对象存储，仅支持本地备份");
            None
        }
    };

    // 启动任务系统与周期扫描
    let orchestrator = match &database {
        Some(db) => {
            let orchestrator = Orchestrator::start(
                Arc::new(PgStore::new(db.pool().clone())),
                Arc::new(SshConnector::new(&config.remote)),
                objects.clone(),
                &config,
            );

            orchestrator.reconciler.start_initial_scan().await;
            orchestrator.reconciler.start_periodic_scan().await;
            SweepScheduler::new(
                orchestrator.backups.clone(),
                Arc::new(orchestrator.queue.clone()),
                config.scheduler.clone(),
            )
            .start();
            Some(orchestrator)
        }
        None => {
            tracing::warn!("任务系统未启动：缺少数据库");
            None
        }
    };

    let app_state = AppState {
        database: database.clone(),
        objects,
        orchestrator,
        config: config.clone(),
    };

    // 创建CORS中间件
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        // OpenAPI JSON 路由
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        // 业务API路由
        .merge(create_api_routes())
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // 启动服务器
    let listener = tokio::net::TcpListener::bind(&config.server_addr()).await?;
    tracing::info!("服务器启动成功，监听地址: {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听退出信号失败: {}", e);
            }
            tracing::info!("收到退出信号，正在停止服务");
        })
        .await?;

    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}
