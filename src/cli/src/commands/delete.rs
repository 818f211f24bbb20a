//! `vpod delete` command - Remove a stopped pod.

use clap::Args;
use vpod_runtime::Runtime;

#[derive(Args)]
pub struct DeleteArgs {
    /// Pod ID
    pub pod: String,
}

pub async fn execute(runtime: &Runtime, args: DeleteArgs) -> Result<(), Box<dyn std::error::Error>> {
    runtime.delete_pod(&args.pod).await?;
    println!("{}", args.pod);
    Ok(())
}
