use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slack-export")]
#[command(about = "Export a Slack workspace in the format of Slack's own export archive")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export users, channels, messages and (optionally) attachments
    Export(ExportArgs),

    /// Export the user list only
    ListUsers {
        /// Output file path
        #[arg(short, long, default_value = "users.json")]
        output: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Export the channel list only
    ListChannels {
        /// Output file path
        #[arg(short, long, default_value = "channels.json")]
        output: String,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Output directory, defaults to the `output` setting
    #[arg(short, long)]
    pub output: Option<String>,

    /// Oldest day to export (YYYY-MM-DD, UTC), defaults to the beginning
    #[arg(short, long)]
    pub from: Option<String>,

    /// Newest day to export (YYYY-MM-DD, UTC, inclusive), defaults to now
    #[arg(short, long)]
    pub to: Option<String>,

    /// Download message attachments
    #[arg(long)]
    pub files: bool,

    /// Do not fetch thread replies
    #[arg(long)]
    pub no_threads: bool,

    /// Number of concurrent attachment downloads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Abort the export after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Settings file, defaults to ./slack-export.toml when present
    #[arg(short, long)]
    pub config: Option<String>,

    /// Slack token, defaults to $SLACK_TOKEN
    #[arg(long)]
    pub token: Option<String>,

    /// Value of the `d` session cookie, defaults to $SLACK_COOKIE
    #[arg(long, conflicts_with = "cookie_file")]
    pub cookie: Option<String>,

    /// Netscape cookies.txt file with the browser session cookies
    #[arg(long)]
    pub cookie_file: Option<String>,
}
