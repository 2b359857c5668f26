//! poselink: distributed pose-sharing runtime binary.

use clap::Parser;

mod demo;

#[derive(Parser)]
#[command(name = "poselink", about = "distributed pose-sharing runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run a loopback demo: one manager, a scripted provider, two augmenters
    Demo(demo::DemoOpts),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("POSELINK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Cli::parse();
    match args.command {
        Command::Demo(opts) => demo::run(opts).await?,
    }
    Ok(())
}
