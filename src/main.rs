#[tokio::main]
async fn main() -> anyhow::Result<()> {
    retread_dashboard_lib::run().await?;
    Ok(())
}
