use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Output flavour of the process-wide subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `APP_ENV=production` selects JSON lines, anything else pretty output.
    pub fn from_app_env(app_env: &str) -> Self {
        if app_env == "production" {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_logger(service_name: &'static str, format: LogFormat) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let builder = fmt()
            .with_env_filter(filter)
            .with_target(true) // <-- shows crate/module path
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        match format {
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }

        tracing::info!(service = service_name, ?format, "logger initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_env_selects_json() {
        assert_eq!(LogFormat::from_app_env("production"), LogFormat::Json);
        assert_eq!(LogFormat::from_app_env("dev"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_app_env(""), LogFormat::Pretty);
    }
}
