//! `a3s-ocm version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("a3s-ocm version {}", a3s_ocm_core::VERSION);
    Ok(())
}
