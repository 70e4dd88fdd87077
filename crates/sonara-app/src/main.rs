//! Sonara process entry point.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    sonara_app::run().await
}
