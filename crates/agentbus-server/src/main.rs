use agentbus_ports::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    agentbus_observability::init_logging(Some(&config.log_level))?;
    agentbus_server::serve(config).await
}
