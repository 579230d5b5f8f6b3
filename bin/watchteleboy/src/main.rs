mod time;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use wt_dash::{
    reqwest::Url, ClientConfig, HttpClient, PlaybackSession, PlayerConfig, SessionOptions,
    StaticStreamUrl,
};

use crate::time::{parse_duration_string, parse_time_string};

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Watch and record MPEG-DASH live TV streams")]
pub struct WatchTeleboyArgs {
    /// Channel name, used as player title and recording name
    #[clap(short, long, default_value = "watchteleboy")]
    channel: String,

    /// Start time other than 'now' ([YYYY-mm-dd ]HH:MM[:SS])
    #[clap(short = 't', long)]
    starttime: Option<String>,

    /// End time ([YYYY-mm-dd ]HH:MM[:SS])
    #[clap(short, long, conflicts_with = "duration")]
    endtime: Option<String>,

    /// Duration ([[HH:]MM:]SS or 1h30m)
    #[clap(short, long)]
    duration: Option<String>,

    /// Upper bound of the video bitrate in bits per second
    #[clap(long, env = "WT_MAX_BITRATE")]
    max_bitrate: Option<u64>,

    /// Audio language, e.g. "de"
    #[clap(short, long)]
    language: Option<String>,

    /// Player binary
    #[clap(long, default_value = "mpv")]
    player: PathBuf,

    /// Options passed to the player
    #[clap(long, allow_hyphen_values = true)]
    player_opts: Option<String>,

    /// Record the stream to a file instead of playing it
    #[clap(short, long)]
    record: bool,

    /// Target directory for recordings
    #[clap(short, long, default_value = ".")]
    path: PathBuf,

    /// File name prefix of the recording
    #[clap(short = 'n', long)]
    showname: Option<String>,

    /// Retry limit per segment
    #[clap(long, default_value = "5")]
    retries: u32,

    /// Cookies of an authenticated session, in Set-Cookie format
    #[clap(long)]
    cookies: Vec<String>,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Suppress any output except errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Manifest URL of the live stream
    url: Url,
}

impl WatchTeleboyArgs {
    fn session_options(&self) -> anyhow::Result<SessionOptions> {
        if self.starttime.is_some() && self.endtime.is_none() && self.duration.is_none() {
            bail!("If --starttime is specified, either --endtime or --duration is required.");
        }
        if self.record && self.endtime.is_none() && self.duration.is_none() {
            bail!("Recording requires either --endtime or --duration.");
        }

        Ok(SessionOptions {
            channel: Some(self.channel.clone()),
            audio_language: self.language.clone(),
            start_time: self.starttime.as_deref().map(parse_time_string).transpose()?,
            stop_time: self.endtime.as_deref().map(parse_time_string).transpose()?,
            duration: self.duration.as_deref().map(parse_duration_string).transpose()?,
            max_bitrate: self.max_bitrate,
        })
    }

    fn player_config(&self) -> anyhow::Result<PlayerConfig> {
        let player_args = match &self.player_opts {
            Some(opts) => shlex::split(opts).with_context(|| format!("Invalid player options: {opts}"))?,
            None => Vec::new(),
        };

        Ok(PlayerConfig {
            player_binary: self.player.clone(),
            player_args,
            record_dir: self.path.clone(),
            show_name: self.showname.clone(),
            retries: self.retries,
            ..Default::default()
        })
    }

    fn log_level(&self) -> tracing_subscriber::filter::LevelFilter {
        if self.verbose {
            tracing_subscriber::filter::LevelFilter::DEBUG
        } else if self.quiet {
            tracing_subscriber::filter::LevelFilter::ERROR
        } else {
            tracing_subscriber::filter::LevelFilter::INFO
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WatchTeleboyArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(args.log_level().into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = args.session_options()?;
    let client = HttpClient::new(&ClientConfig::default())?;
    if !args.cookies.is_empty() {
        client.add_cookies(args.cookies.clone(), args.url.clone())?;
    }

    let mut session = PlaybackSession::new(client, args.player_config()?);
    let provider = StaticStreamUrl::new(args.url.clone());
    session
        .configure_channel(&provider, &args.channel, options)
        .await?;

    if args.record {
        session.record().await?;
    } else {
        session.play()?;
    }

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            cancel.cancel();
        }
    });

    if let Some(outcome) = session.wait().await? {
        if let Some(Ok(output)) = &outcome.muxer {
            println!("{}", output.display());
        }
        outcome.into_result()?;
    }
    Ok(())
}
