//! `vpod stop` command - Graceful stop of a running pod.

use clap::Args;
use vpod_runtime::Runtime;

#[derive(Args)]
pub struct StopArgs {
    /// Pod ID
    pub pod: String,
}

pub async fn execute(runtime: &Runtime, args: StopArgs) -> Result<(), Box<dyn std::error::Error>> {
    runtime.stop_pod(&args.pod).await?;
    println!("{}", args.pod);
    Ok(())
}
