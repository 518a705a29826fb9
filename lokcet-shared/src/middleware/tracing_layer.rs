use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `LOKCET_LOG_FORMAT` wins; otherwise production deployments log JSON.
    fn from_env() -> Self {
        match std::env::var("LOKCET_LOG_FORMAT").ok().as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            _ if std::env::var("LOKCET_ENV").is_ok_and(|v| v == "production") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

fn default_directives(service_name: &str) -> String {
    let crate_name = service_name.replace('-', "_");
    format!(
        "info,{crate_name}=debug,lokcet_shared=debug,lokcet_social=debug,lokcet_messaging=debug,lokcet_feed=debug,tower_http=debug"
    )
}

/// Installs the global subscriber. Calling it twice is a no-op.
pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)));
    let format = LogFormat::from_env();

    let json = (format == LogFormat::Json).then(|| fmt::layer().json().with_target(true).with_current_span(true));
    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(pretty)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::info!(service = service_name, format = ?format, "tracing initialized");
}
