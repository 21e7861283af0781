use anyhow::Context;

use audit_relay::{config::Config, observability::init_tracing, service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config)?;

    service::run(config)
        .await
        .context("audit-relay stopped with an error")
}
