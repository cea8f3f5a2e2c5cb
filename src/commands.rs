use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{AuthProvider, CookieFileAuth, ValueAuth};
use crate::cli::{CommonArgs, ExportArgs};
use crate::client::Client;
use crate::error::Result;
use crate::export::{ExportOptions, Exporter, export_channel_list};
use crate::output::write_json;
use crate::settings::{ExportSettings, Settings};
use crate::slack::SlackWebApi;
use crate::{load_cookie, load_token, parse_date, time_window};

pub async fn run_export(args: ExportArgs) -> Result<()> {
    let mut settings = load_settings(&args.common)?;
    apply_overrides(&args, &mut settings.export);

    let from = args.from.as_deref().map(parse_date).transpose()?;
    let to = args.to.as_deref().map(parse_date).transpose()?;
    let window = time_window(from, to);

    let cancel = cancel_token(args.timeout.map(Duration::from_secs));
    let client = connect(&args.common, &settings, cancel)?;

    let team = client.team_info().await?;
    info!(team_id = %team.id, domain = %team.domain, "authenticated");

    let output = settings.export.output.clone();
    match (from, to) {
        (None, None) => println!("Exporting {} to {}...", team.name, output),
        _ => println!(
            "Exporting {} from {} to {} into {}...",
            team.name,
            from.map_or_else(|| "the beginning".to_string(), |d| d.to_string()),
            to.map_or_else(|| "now".to_string(), |d| d.to_string()),
            output
        ),
    }

    let options = ExportOptions::from_settings(&settings.export, window);
    let summary = Exporter::new(&output, client, options).run().await?;

    println!(
        "Export completed successfully! {} messages in {} channels, {} users exported.",
        summary.messages, summary.channels_written, summary.users
    );
    if settings.export.include_files {
        println!(
            "{} files downloaded, {} skipped, {} failed.",
            summary.files_downloaded, summary.files_skipped, summary.files_failed
        );
    }
    if summary.channels_filtered > 0 {
        println!(
            "{} channels left out of channels.json, see channels_full.json.bak.",
            summary.channels_filtered
        );
    }
    if !summary.skipped_channels.is_empty() {
        println!("Skipped channels: {}", summary.skipped_channels.join(", "));
    }
    if !summary.failed_channels.is_empty() {
        println!("Failed channels: {}", summary.failed_channels.join(", "));
    }
    Ok(())
}

pub async fn run_list_users(output: &str, common: &CommonArgs) -> Result<()> {
    let settings = load_settings(common)?;
    let client = connect(common, &settings, cancel_token(None))?;

    println!("Exporting users to {}...", output);

    let users = client.users().await?;
    write_json(Path::new(output), &users)?;

    println!("Export completed successfully! {} users exported.", users.len());
    Ok(())
}

pub async fn run_list_channels(output: &str, common: &CommonArgs) -> Result<()> {
    let settings = load_settings(common)?;
    let client = connect(common, &settings, cancel_token(None))?;

    println!("Exporting channels to {}...", output);

    let count = export_channel_list(&client, Path::new(output)).await?;

    println!("Export completed successfully! {} channels exported.", count);
    Ok(())
}

fn load_settings(common: &CommonArgs) -> Result<Settings> {
    Settings::load(common.config.as_deref().map(Path::new))
}

fn apply_overrides(args: &ExportArgs, export: &mut ExportSettings) {
    if let Some(output) = &args.output {
        export.output = output.clone();
    }
    if args.files {
        export.include_files = true;
    }
    if args.no_threads {
        export.include_threads = false;
    }
    if let Some(workers) = args.workers {
        export.download_workers = workers.max(1);
    }
}

fn auth_provider(common: &CommonArgs) -> Result<Box<dyn AuthProvider>> {
    let token = match &common.token {
        Some(token) => token.clone(),
        None => load_token()?,
    };
    match &common.cookie_file {
        Some(path) => Ok(Box::new(CookieFileAuth::new(token, Path::new(path))?)),
        None => Ok(Box::new(ValueAuth::new(
            token,
            common.cookie.clone().or_else(load_cookie),
        )?)),
    }
}

fn connect(
    common: &CommonArgs,
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<Arc<Client<SlackWebApi>>> {
    let auth = auth_provider(common)?;
    let api = SlackWebApi::new(auth.as_ref())?;
    Ok(Arc::new(Client::new(Arc::new(api), &settings.limits, cancel)))
}

/// Token cancelled on Ctrl+C, or once `timeout` has elapsed.
fn cancel_token(timeout: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, cancelling");
                cancel.cancel();
            }
        }
    });
    if let Some(timeout) = timeout {
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "timeout reached, cancelling");
                cancel.cancel();
            }
        });
    }
    cancel
}
