use clap::Parser;
use slack_export::{Cli, Commands, commands};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("slack_export=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    // reqwest and the hyper connector both need a process-wide provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Export(args) => commands::run_export(args).await,
        Commands::ListUsers { output, common } => commands::run_list_users(&output, &common).await,
        Commands::ListChannels { output, common } => {
            commands::run_list_channels(&output, &common).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
