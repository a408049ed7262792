mod cli;
mod session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
