//! quickcall CLI binary entry point.

use quickcall::cli::{call, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match cli.command {
        Commands::Call(args) => call::handle_call(args).await,
        Commands::Serve(args) => call::handle_serve(args).await,
        Commands::Gateway(args) => call::handle_gateway(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
