use clap::Parser;
use mimalloc::MiMalloc;
use std::fmt::Display;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use edgesplit_core::config::Config;
use edgesplit_core::endpoints;
use edgesplit_core::endpoints::status::EDGESPLIT_VERSION;
use edgesplit_core::error;
use edgesplit_core::observability;
use edgesplit_core::utils::gateway::GatewayHandle;

mod cli;
use cli::GatewayArgs;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = GatewayArgs::parse();
    // Set up logs and metrics immediately, so that we can use `tracing`.
    let observability_handle =
        observability::setup_observability(args.log_format).expect_pretty("Failed to set up logs");

    tracing::info!("Starting edgesplit gateway {EDGESPLIT_VERSION}");

    if args.config_file.is_some() && args.default_config {
        tracing::error!("Cannot specify both `--config-file` and `--default-config`");
        std::process::exit(1);
    }

    let config = if let Some(path) = &args.config_file {
        Arc::new(
            Config::load_from_path(path)
                .ok() // Don't print the error here, since it was already printed when it was constructed
                .expect_pretty(&format!(
                    "Failed to load config file `{}`",
                    path.display()
                )),
        )
    } else {
        if !args.default_config {
            tracing::error!(
                "No config file provided. Use `--config-file path/to/edgesplit.toml` to specify a config file, or `--default-config` to start without any tests."
            );
            std::process::exit(1);
        }
        tracing::warn!("Running with the default config, so no A/B tests will be routed.");
        Arc::new(Config::default())
    };

    if args.check_config {
        tracing::info!(
            "Config is valid ({} tests, {} active)",
            config.tests.len(),
            config.tests.iter().filter(|test| test.active).count()
        );
        return;
    }

    if config.gateway.debug {
        observability_handle
            .delayed_debug_logs
            .enable_debug()
            .expect_pretty("Failed to enable debug logs");
    }

    let metrics_handle = observability::setup_metrics().expect_pretty("Failed to set up metrics");

    // Set debug mode
    error::set_debug(config.gateway.debug).expect_pretty("Failed to set debug mode");

    // Initialize GatewayHandle
    let gateway_handle = GatewayHandle::new(config.clone())
        .await
        .expect_pretty("Failed to initialize AppState");

    let router = endpoints::build_router(gateway_handle.app_state.clone(), Some(metrics_handle));

    // Bind to the socket address specified in the config, or default to 0.0.0.0:3000
    let bind_address = config
        .gateway
        .bind_address
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!(
                "Failed to bind to socket address {bind_address}: {e}. Tip: Ensure no other process is using port {} or try a different port.",
                bind_address.port()
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to bind to socket address {bind_address}: {e}");
            std::process::exit(1);
        }
    };

    // This will give us the chosen port if the user specified a port of 0
    let actual_bind_address = listener
        .local_addr()
        .expect_pretty("Failed to get bind address from listener");

    tracing::info!("edgesplit gateway is listening on {actual_bind_address}");

    // Print the configuration being used
    if let Some(path) = &args.config_file {
        tracing::info!("├ Configuration: `{}`", path.display());
    } else {
        tracing::info!("├ Configuration: default");
    }
    for test in config.tests.iter() {
        tracing::info!(
            "├ Test `{}`: {} ({} buckets, {}{})",
            test.id,
            test.entry_path,
            test.bucket_count(),
            if test.adaptive { "adaptive" } else { "static" },
            if test.active { "" } else { ", inactive" }
        );
    }
    tracing::info!("├ Stats Store: {}", gateway_handle.stats_backend_pretty());
    tracing::info!(
        "└ Analytics: {}",
        gateway_handle.app_state.analytics.sink_name()
    );

    // Start the server
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect_pretty("Failed to start server");

    tracing::info!("Waiting for in-flight analytics events");
    gateway_handle.shutdown().await;
    tracing::info!("edgesplit gateway shut down");
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_pretty("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}

/// ┌──────────────────────────────────────────────────────────────────────────┐
/// │                           MAIN.RS ESCAPE HATCH                           │
/// └──────────────────────────────────────────────────────────────────────────┘
///
/// We don't allow panic, escape, unwrap, or similar methods in the codebase,
/// except for the private `expect_pretty` method, which is to be used only in
/// main.rs during initialization. After initialization, we expect all code to
/// handle errors gracefully.
///
/// `expect_pretty` will log an error message and exit with a status code of 1.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}

impl<T> ExpectPretty<T> for Option<T> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Some(value) => value,
            None => {
                tracing::error!("{msg}");
                std::process::exit(1);
            }
        }
    }
}
