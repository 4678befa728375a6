// Binary entry point for remcon_agent
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = remcon_agent::shell::run().await {
        eprintln!("remcon_agent fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
