#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_service::run().await {
        eprintln!("exam-service fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
