#[cfg(feature = "cli")]
use storefront_chat::{config::Config, run_chat_server, telemetry};

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");

    let cfg = Config::from_env()?;
    run_chat_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
