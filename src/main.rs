//! 管理后台服务入口

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use template_admin::{
    auth::{guard::Realm, throttle::SystemClock, InMemorySessionStore, InMemoryThrottleStore},
    config::AppConfig,
    db,
    handlers::health,
    middleware::{AppState, Stores},
    models::{RegisterRequest, Role},
    repository::{AccountRepository, AccountStore, InMemoryAccountStore},
    routes, telemetry,
};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::signal;

/// 过期会话 / 限流记录的清理周期
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("create-super-admin") => {}
        Some("--version") => {
            println!("template-admin {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("--help") => {
            print_help();
            return Ok(());
        }
        Some(other) => {
            eprintln!("未知参数: {}", other);
            print_help();
            std::process::exit(1);
        }
    }

    // 开发环境读取 .env，生产环境直接设置环境变量
    dotenv::dotenv().ok();

    health::set_start_time();

    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    telemetry::init_telemetry(&config);

    let db_pool = match config.database.url {
        Some(_) => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            Some(pool)
        }
        None => {
            tracing::warn!("TA_DATABASE__URL not set, accounts are kept in memory");
            None
        }
    };

    let (admins, users) = account_stores(db_pool.as_ref());
    let stores = Stores {
        admins,
        users,
        sessions: Arc::new(InMemorySessionStore::new()),
        throttle: Arc::new(InMemoryThrottleStore::new()),
        clock: Arc::new(SystemClock),
    };
    let app_state = Arc::new(AppState::new(config.clone(), db_pool, stores)?);

    if args.get(1).map(String::as_str) == Some("create-super-admin") {
        if app_state.db.is_none() {
            anyhow::bail!("create-super-admin requires TA_DATABASE__URL");
        }
        return create_super_admin(&app_state, &args[2..]).await;
    }

    spawn_purge_task(app_state.clone());

    let app = routes::create_router(app_state);

    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 每个领域的账户存储：配置了数据库时使用 Postgres，否则使用内存
fn account_stores(pool: Option<&PgPool>) -> (Arc<dyn AccountStore>, Arc<dyn AccountStore>) {
    match pool {
        Some(pool) => (
            Arc::new(AccountRepository::new(pool.clone(), Realm::Admin)),
            Arc::new(AccountRepository::new(pool.clone(), Realm::User)),
        ),
        None => (
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryAccountStore::new()),
        ),
    }
}

/// 定期清理过期会话和限流记录
fn spawn_purge_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;

            let sessions = state.sessions.purge_expired();
            let attempts = state.admin_auth.throttle().purge_expired();
            if sessions > 0 || attempts > 0 {
                tracing::debug!(sessions, attempts, "Purged expired entries");
            }
            if let Some(pool) = &state.db {
                db::record_pool_metrics(pool);
            }
        }
    });
}

/// 创建首个超级管理员，密码取自 TA_BOOTSTRAP_PASSWORD
async fn create_super_admin(state: &AppState, args: &[String]) -> anyhow::Result<()> {
    let (name, email) = match args {
        [name, email] => (name.clone(), email.clone()),
        _ => anyhow::bail!("用法: template-admin create-super-admin <name> <email>"),
    };
    let password = std::env::var("TA_BOOTSTRAP_PASSWORD")
        .map_err(|_| anyhow::anyhow!("TA_BOOTSTRAP_PASSWORD is not set"))?;

    let account = state
        .auth(Realm::Admin)
        .register(
            RegisterRequest {
                name,
                email,
                password,
                role: None,
            },
            Role::SuperAdmin,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create super admin: {}", e))?;

    println!("Created super admin {} ({})", account.email, account.id);
    Ok(())
}

/// 收到信号后开始优雅关闭，超时仍未结束则强制退出
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

fn print_help() {
    println!("template-admin {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: template-admin [选项 | 子命令]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("子命令:");
    println!("  create-super-admin <name> <email>");
    println!("                创建超级管理员，密码读取 TA_BOOTSTRAP_PASSWORD");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 TA_ 前缀的环境变量完成，参考 .env.example");
}
