//! `vpod start` command - Boot a created pod.

use clap::Args;
use vpod_runtime::Runtime;

#[derive(Args)]
pub struct StartArgs {
    /// Pod ID
    pub pod: String,
}

pub async fn execute(runtime: &Runtime, args: StartArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pod = runtime.start_pod(&args.pod).await?;
    tracing::debug!(pod_id = %pod.id(), state = %pod.state().state, "Start returned");
    println!("{}", pod.id());
    Ok(())
}
