use clap::Parser;
use collector::{Collector, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Collector::new(Config::parse()).start().await
}
