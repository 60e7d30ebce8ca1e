use calcrpc::{
    calculator::{CalculatorServer, SquareRootCalculator},
    Server, ServerConfig,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:50051".to_owned());
    let config = match env::var("CALCULATOR_CONFIG") {
        Ok(path) => ServerConfig::from_toml(&std::fs::read_to_string(path)?)?,
        Err(_) => ServerConfig::default(),
    };

    let mut server = Server::with_config(config);
    server.add_service(CalculatorServer::new(SquareRootCalculator))?;
    server.bind(&addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
        _ = server.stopped() => {}
    }
    server.stop().await;
    Ok(())
}
