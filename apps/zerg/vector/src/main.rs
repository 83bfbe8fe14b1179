//! Vector store operator CLI - Entry Point
//!
//! Minimal entry point that delegates to the library.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_vector::run().await
}
