#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ospn_node::cli::run().await
}
