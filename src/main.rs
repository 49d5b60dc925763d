use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snmp_collector::collector::user_profile::YamlProfileProvider;
use snmp_collector::config::AppConfig;
use snmp_collector::feeder::LogFeeder;
use snmp_collector::routes::create_router;
use snmp_collector::service::Collector;
use snmp_collector::snmp::Snmp2SessionFactory;

const DEFAULT_CONFIG_PATH: &str = "./snmp.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snmp_collector=info")),
        )
        .init();

    // путь из аргумента, затем из SNMP_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SNMP_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)?;
    info!(config = %config_path, "Конфигурация загружена");
    config.debug_config();

    let profiles = match Path::new(&config_path).parent() {
        Some(dir) => YamlProfileProvider::with_base_dir(dir),
        None => YamlProfileProvider::new(),
    };
    let http_listen = config.settings.http_listen.clone();

    let exit = CancellationToken::new();
    let collector = Collector::new(
        config,
        Arc::new(Snmp2SessionFactory),
        Arc::new(LogFeeder),
        &profiles,
        exit.clone(),
    )
    .await?;

    {
        let exit = exit.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Не удалось установить обработчик сигнала");
            }
            info!("Получен сигнал завершения");
            exit.cancel();
        });
    }

    if let Some(addr) = http_listen {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Не удалось занять адрес {}", addr))?;
        info!(addr = %addr, "HTTP сервер запущен");
        let app = create_router(Arc::clone(&collector));
        let exit = exit.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { exit.cancelled().await });
            if let Err(e) = server.await {
                error!(error = %e, "HTTP сервер остановлен с ошибкой");
            }
        });
    }

    collector.run().await
}
