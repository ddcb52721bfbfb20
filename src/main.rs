use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use log::{debug, info};

mod fetch;
mod photo;
mod schedule;
mod stitch;
mod timeutil;
mod wallpaper;

use fetch::TileFetcher;
use photo::{PhotoRepository, Scale};
use schedule::{Scheduler, stop_flag};
use timeutil::{BUCKET_SECONDS, round_time};
use wallpaper::{DesktopWallpaper, WallpaperSink};

/// Photos appear on the server roughly this long after real time
const PUBLISH_DELAY_MINUTES: i64 = 20;

#[derive(Parser)]
#[command(author, version, about = "Download satellite Earth photo(s) from himawari8.nict.go.jp", long_about = None)]
struct Cli {
    /// Date of the photo [format: YYYY-MM-DD, default: newest available]
    #[arg(short, long)]
    date: Option<String>,

    /// Time of the photo [format: HH:MM, default: newest available]
    #[arg(short, long)]
    time: Option<String>,

    /// Scale of the photo: 1, 2, 4, 8, 16 or 20
    #[arg(short, long, default_value_t = 2)]
    scale: u32,

    /// Set the downloaded image as desktop wallpaper
    #[arg(short, long)]
    wallpaper: bool,

    /// Directory where photos are stored
    #[arg(long, default_value = "images")]
    storage_dir: String,

    /// Download every photo from the requested time up to the end time
    #[arg(long)]
    batch: bool,

    /// End date for --batch [format: YYYY-MM-DD, default: newest available]
    #[arg(long, requires = "batch")]
    end_date: Option<String>,

    /// End time for --batch [format: HH:MM]
    #[arg(long, requires = "batch")]
    end_time: Option<String>,

    /// Download the last N photos
    #[arg(long, value_name = "N", conflicts_with = "batch")]
    last: Option<u32>,

    /// Keep fetching a new photo every 10 minutes
    #[arg(long, conflicts_with_all = ["batch", "last"])]
    watch: bool,

    /// Skip the confirmation prompt for large scales
    #[arg(short = 'y', long)]
    yes: bool,

    /// Increase output verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let scale = Scale::from_factor(cli.scale)?;
    if scale.grid() > 4 && !cli.yes && !confirm_large_download(scale)? {
        return Ok(());
    }

    // The newest photo the server can be expected to have
    let newest = round_time(Utc::now() - ChronoDuration::minutes(PUBLISH_DELAY_MINUTES));
    let mut requested = round_time(parse_moment(
        cli.date.as_deref(),
        cli.time.as_deref(),
        newest,
    )?);
    if requested > newest {
        requested = newest;
    }
    debug!("Requested time: {}, newest available: {}", requested, newest);

    let stop = stop_flag()?;
    let repository = PhotoRepository::new(&cli.storage_dir, TileFetcher::new())
        .context("Failed to prepare storage directory")?;
    let desktop = DesktopWallpaper::new(&cli.storage_dir);

    if cli.watch {
        let sink: Option<&dyn WallpaperSink> = if cli.wallpaper { Some(&desktop) } else { None };
        let scheduler = Scheduler::new(Duration::from_secs(BUCKET_SECONDS as u64), stop);
        return scheduler.run(&repository, requested, scale, sink);
    }

    if let Some(count) = cli.last {
        let count = i64::from(count.max(1));
        let start = newest - ChronoDuration::seconds(BUCKET_SECONDS * (count - 1));
        let saved = repository.fetch_many(start, newest, scale, &stop)?;
        info!("Downloaded {} photo(s)", saved.len());
        return Ok(());
    }

    if cli.batch {
        let end = round_time(parse_moment(
            cli.end_date.as_deref(),
            cli.end_time.as_deref(),
            newest,
        )?)
        .min(newest);
        let saved = repository.fetch_many(requested, end, scale, &stop)?;
        info!("Downloaded {} photo(s)", saved.len());
        return Ok(());
    }

    match repository.fetch_one(requested, scale)? {
        Some(path) => {
            println!("{}", path.display());
            if cli.wallpaper {
                desktop.apply(&path)?;
            }
        }
        None => println!("No Earth image at given time. File not saved."),
    }

    Ok(())
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Combine optional date and time strings into a UTC timestamp, filling the
/// missing half from the fallback. Naive input is taken as already in UTC.
fn parse_moment(
    date: Option<&str>,
    time: Option<&str>,
    fallback: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    if date.is_none() && time.is_none() {
        return Ok(fallback);
    }
    let date = match date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .context("Invalid date, expected YYYY-MM-DD")?,
        None => fallback.date_naive(),
    };
    let time = match time {
        Some(text) => {
            NaiveTime::parse_from_str(text, "%H:%M").context("Invalid time, expected HH:MM")?
        }
        None => fallback.time(),
    };
    Ok(date.and_time(time).and_utc())
}

fn confirm_large_download(scale: Scale) -> Result<bool> {
    let grid = scale.grid();
    print!(
        "Are you sure you want to download photo of that size ({0}x{0}={1} tiles)? [Y/n] ",
        grid,
        grid * grid,
    );
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(!matches!(answer.trim().to_lowercase().as_str(), "n" | "no"))
}
