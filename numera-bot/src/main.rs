//! Numera bot - main entry point.

use anyhow::{bail, Result};
use numera_bot::{start_bot, CompletionBackend, OpenAiBackend};
use numera_common::config::Config;
use numera_common::logging::init_logging;
use numera_common::ValidationError;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Load configuration
    let (config, source) = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Numera bot v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(source = %source, "Configuration loaded");

    if let Err(e) = config.validate() {
        let problems = match e {
            ValidationError::Multiple(errors) => errors,
            other => vec![other],
        };
        for problem in &problems {
            tracing::error!(%problem, "Invalid configuration");
        }
        bail!("refusing to start: {} configuration problem(s)", problems.len());
    }

    // The blocking client must be created and dropped outside the runtime.
    let backend: Arc<dyn CompletionBackend> = Arc::new(OpenAiBackend::new(
        config.completion_api_key()?,
        &config.completion.base_url,
        Duration::from_secs(config.completion.timeout_secs),
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(start_bot(&config, backend.clone()));

    drop(runtime);
    drop(backend);
    result
}
