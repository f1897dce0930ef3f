use service_core::observability::init_tracing;
use storefront_payments::{config::PaymentsConfig, services::init_metrics, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PaymentsConfig::load()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        ledger = ?config.ledger.backend,
        "Starting storefront payments"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
