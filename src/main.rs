use api_throttle::{config::ThrottleConfig, init_server, observability};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/throttle.yaml".to_string());

    let config = match ThrottleConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: api-throttle [config_file]");
            process::exit(1);
        }
    };

    let otel = config.telemetry.as_ref().map(|t| t.tracing_config());
    let otel_enabled = otel.is_some();
    if let Err(e) = observability::init_tracing(otel) {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    let result = init_server(config).await;

    if otel_enabled {
        observability::shutdown_telemetry();
    }

    if let Err(e) = result {
        eprintln!("Throttle error: {}", e);
        process::exit(1);
    }
}
