use std::time::Duration;

use intake_api::setup;
use intake_core::Config;

/// Time in-flight stages get to finish after the server stops accepting requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let app = setup::initialize_app(config.clone()).await?;

    setup::server::start_server(&config, app.router).await?;

    app.background.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}
