//! 广播管理服务
//!
//! 提供广播提交与用户收件箱 REST API，并在同一进程内运行排期调度与数据保留清理 Worker。

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Request,
    http::{HeaderValue, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use broadcast_admin_service::{
    auth::{JwtConfig, JwtManager},
    routes,
    state::AppState,
};
use broadcast_engine::repository::BroadcastStores;
use broadcast_engine::{
    BroadcastScheduler, BroadcastService, RetentionCleaner, Transports, build_email_transport,
    build_push_transport,
};
use broadcast_shared::{
    cache::{Cache, KeyedStore, MemoryCache},
    config::{AppConfig, DEV_JWT_SECRET},
    database::Database,
    observability::{self, middleware as obs_middleware},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("broadcast-admin-service")?;
    let _guard = observability::init(&config.observability, &config.service_name).await?;

    info!("Starting broadcast-admin-service on {}", config.server_addr());

    if config.auth.jwt_secret == DEV_JWT_SECRET {
        if config.is_production() {
            anyhow::bail!("生产环境必须通过 BROADCAST_AUTH__JWT_SECRET 设置 JWT 密钥");
        }
        warn!("Using default JWT secret - set BROADCAST_AUTH__JWT_SECRET for production");
    }

    // 初始化基础设施
    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let idempotency: Arc<dyn KeyedStore> = if config.redis.enabled {
        Arc::new(Cache::new(&config.redis)?)
    } else {
        info!("Redis disabled, idempotency keys kept in process memory");
        Arc::new(MemoryCache::new())
    };

    let stores = BroadcastStores::postgres(db.pool().clone());
    let transports = Transports {
        push: build_push_transport(&config.push)?,
        email: build_email_transport(&config.email)?,
    };
    let service = Arc::new(BroadcastService::new(
        stores.clone(),
        transports,
        &config.dispatch,
    ));

    // 启动排期调度 Worker
    if config.scheduler.enabled {
        let scheduler = BroadcastScheduler::new(
            service.clone(),
            stores.broadcasts.clone(),
            &config.scheduler,
        );
        tokio::spawn(async move { scheduler.run().await });

        let cleaner = RetentionCleaner::new(
            stores.broadcasts.clone(),
            stores.tracking.clone(),
            &config.scheduler,
        )?;
        tokio::spawn(async move { cleaner.run().await });
    } else {
        warn!("Scheduler disabled, scheduled broadcasts will not fire on this instance");
    }

    let state = AppState::new(
        &stores,
        service,
        idempotency.clone(),
        JwtManager::new(JwtConfig::from(&config.auth)),
    );

    let app = Router::new()
        .route(
            "/ready",
            get({
                let db = db.clone();
                let idempotency = idempotency.clone();
                move || readiness_check(db.clone(), idempotency.clone())
            }),
        )
        .merge(routes::api_router(state))
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer(&config.server.cors_origins))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// CORS 配置："*" 允许所有来源，否则为逗号分隔的来源列表
fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        info!("CORS allowed_origins: * (all origins)");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    info!("CORS allowed_origins: {}", origins);
    let origins: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// 为所有响应注入 HTTP 安全头
async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

/// 监听关闭信号
///
/// SIGTERM 或 Ctrl+C 触发 axum 的优雅关闭流程
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 就绪探针：检查数据库和幂等键存储是否可用
async fn readiness_check(db: Database, idempotency: Arc<dyn KeyedStore>) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = idempotency.health_check().await.is_ok();
    let all_ok = db_ok && cache_ok;

    Json(serde_json::json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "service": "broadcast-admin-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}
