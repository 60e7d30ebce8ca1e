use calcrpc::{
    calculator::{CalculatorClient, Number},
    Channel,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = env::args().nth(1).unwrap_or_else(|| "localhost:50051".to_owned());
    let value = match env::args().nth(2) {
        Some(value) => value.parse()?,
        None => 10.0,
    };

    let channel = Channel::open(&addr).await?;
    let calculator = CalculatorClient::new(channel);
    let response = calculator.square_root(Number { value }).await?;
    println!("{}", response.value);

    calculator.channel().close();
    Ok(())
}
