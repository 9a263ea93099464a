// Main entry point - Dependency injection and trend startup
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use scope_trend::application::animator::{AnimatorSettings, LiveAnimator};
use scope_trend::application::chart::Chart;
use scope_trend::application::clock::TokioClock;
use scope_trend::application::controller::ModeController;
use scope_trend::application::error_reporter::ErrorReporter;
use scope_trend::application::events::EventBus;
use scope_trend::application::history::HistoryLoader;
use scope_trend::application::sample_source::ScopeSource;
use scope_trend::infrastructure::config::load_trend_config;
use scope_trend::infrastructure::scope_transport::ScopeHttpTransport;
use scope_trend::presentation::log_surface::TracingSurface;
use scope_trend::presentation::notifier::TracingNotifier;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scope_trend=info")),
        )
        .init();

    // Load configuration
    let config = load_trend_config().context("Failed to load config/trend")?;
    config.validate().context("Invalid trend configuration")?;
    tracing::debug!(snapshot = %config.to_snapshot()?, "chart layout");

    // Source side (infrastructure layer)
    let transport = Arc::new(ScopeHttpTransport::new(config.source.host.clone()));
    let source = Arc::new(ScopeSource::new(
        transport,
        Arc::new(TokioClock::new()),
        &config.source,
    ));

    // Drawing and notification collaborators (presentation layer)
    let surface = Arc::new(TracingSurface::new());
    let reporter = Arc::new(ErrorReporter::new(
        Arc::new(TracingNotifier),
        Duration::from_millis(config.tuning.error_suppress_ms),
    ));

    // Engine (application layer)
    let chart = Chart::new(surface, &config.chart)?.shared();
    let events = Arc::new(EventBus::new());
    events.subscribe(|event| tracing::info!(?event, "trend event"));

    let history = Arc::new(HistoryLoader::new(
        chart.clone(),
        source.clone(),
        events.clone(),
        reporter.clone(),
        config.tuning.cache_cut_ms,
    ));
    let animator = Arc::new(LiveAnimator::new(
        chart.clone(),
        source.clone(),
        events.clone(),
        reporter.clone(),
        AnimatorSettings::from_config(&config),
    ));
    let controller = ModeController::new(chart, source, history, animator, events, reporter, config)?;

    tracing::info!(mode = %controller.mode(), "starting scope trend");
    if let Err(error) = controller.activate().await {
        tracing::warn!(%error, "trend started without data");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    controller.shutdown();

    Ok(())
}
