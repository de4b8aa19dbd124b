use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tokio::time::sleep;

use trip_recorder::config::RecorderConfig;
use trip_recorder::geocode::NominatimGeocoder;
use trip_recorder::location::SimulatedLocationSource;
use trip_recorder::{
    export_gpx, FileStore, RecordingSession, SessionController, SessionStatus, SessionStore,
    TravelMode, TripApiClient, TripDetails, TripSubmitter,
};

#[derive(Parser, Debug)]
#[command(name = "trip_recorder")]
#[command(about = "Record GPS trips, keep them safe across restarts, export them as GPX")]
#[command(long_about = None)]
struct Args {
    /// Session file
    #[arg(long, global = true, default_value = "trip_session.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record against the simulated location source
    Record {
        /// Recording duration in seconds
        #[arg(long, default_value = "30")]
        seconds: u64,

        /// Pause after this many seconds
        #[arg(long, requires = "resume_after")]
        pause_after: Option<u64>,

        /// Resume this many seconds after pausing
        #[arg(long)]
        resume_after: Option<u64>,

        /// Mark a point of interest halfway through
        #[arg(long)]
        poi: Option<String>,

        /// Seconds between simulated fixes
        #[arg(long, default_value = "1")]
        fix_interval: u64,

        /// Reverse geocoding endpoint
        #[arg(long, default_value = "https://nominatim.openstreetmap.org")]
        geocoder_url: String,
    },

    /// Show the stored session
    Status,

    /// Write the stored session as GPX
    Export {
        #[arg(long)]
        title: String,

        #[arg(long)]
        output: PathBuf,
    },

    /// Upload the stored session to the trips backend
    Submit {
        /// Backend base URL
        #[arg(long)]
        api: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        start_location: Option<String>,

        #[arg(long)]
        end_location: Option<String>,

        #[arg(long, value_enum, default_value_t = TravelMode::Motorhome)]
        travel_mode: TravelMode,

        /// Bearer token
        #[arg(long)]
        token: Option<String>,
    },

    /// Throw away the stored session
    Discard,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let store: Arc<dyn SessionStore> = Arc::new(FileStore::new(&args.store));

    match args.command {
        Command::Record {
            seconds,
            pause_after,
            resume_after,
            poi,
            fix_interval,
            geocoder_url,
        } => {
            let interval = Duration::from_secs(fix_interval.max(1));
            let source = SimulatedLocationSource::new(44.4949, 11.3426, interval);
            let controller = SessionController::new(
                RecorderConfig::default(),
                store,
                Arc::new(source),
                Arc::new(NominatimGeocoder::new(geocoder_url)),
            );
            record(&controller, seconds, pause_after.zip(resume_after), poi).await
        }
        Command::Status => {
            print_status(store.as_ref());
            Ok(())
        }
        Command::Export { title, output } => {
            let session = load_pending(store.as_ref())?;
            let gpx = export_gpx(session.points(), session.pois(), &title)?;
            std::fs::write(&output, gpx).with_context(|| format!("writing {}", output.display()))?;
            println!(
                "[{}] Wrote {} points to {}",
                ts_now(),
                session.points().len(),
                output.display()
            );
            Ok(())
        }
        Command::Submit {
            api,
            title,
            description,
            start_location,
            end_location,
            travel_mode,
            token,
        } => {
            let mut client = TripApiClient::new(api);
            if let Some(token) = token {
                client = client.with_token(token);
            }
            let details = TripDetails {
                title,
                description,
                start_location,
                end_location,
                travel_mode,
            };
            submit(store, details, &client).await
        }
        Command::Discard => {
            store.clear()?;
            println!("[{}] Stored session discarded", ts_now());
            Ok(())
        }
    }
}

async fn record(
    controller: &SessionController,
    seconds: u64,
    pause: Option<(u64, u64)>,
    poi: Option<String>,
) -> Result<()> {
    if controller.status() != SessionStatus::Idle {
        println!(
            "[{}] Replacing stored {:?} session",
            ts_now(),
            controller.status()
        );
    }

    if controller.start() != SessionStatus::Tracking {
        let reason = controller.snapshot().last_error.unwrap_or_default();
        bail!("could not start recording: {}", reason);
    }
    println!("[{}] Recording for {} seconds", ts_now(), seconds);

    let mut poi = poi;
    for second in 1..=seconds {
        sleep(Duration::from_secs(1)).await;

        if let Some((pause_at, resume_after)) = pause {
            if second == pause_at {
                controller.pause();
                println!("[{}] Paused", ts_now());
            } else if second == pause_at + resume_after {
                controller.resume();
                println!("[{}] Resumed", ts_now());
            }
        }

        if second >= seconds / 2 {
            if let Some(description) = poi.take() {
                match controller.add_point_of_interest(Some(description)) {
                    Some(id) => println!("[{}] Marked point of interest #{}", ts_now(), id),
                    None => println!(
                        "[{}] Could not mark point of interest: {}",
                        ts_now(),
                        controller.snapshot().last_error.unwrap_or_default()
                    ),
                }
            }
        }

        if second % 5 == 0 {
            let snap = controller.snapshot();
            println!(
                "[{}] {:?}: {} points, {:.2} km, {}s",
                ts_now(),
                snap.status,
                snap.points.len(),
                snap.stats.distance_km(),
                snap.elapsed_seconds
            );
        }
    }

    // Let an outstanding name lookup land before stopping.
    sleep(Duration::from_millis(500)).await;

    let status = controller.stop();
    controller.flush().await;
    let snap = controller.snapshot();
    match status {
        SessionStatus::PendingSave => {
            println!("\n=== Recording Stopped ===");
            println!("Points: {}", snap.stats.point_count);
            println!("Points of interest: {}", snap.pois.len());
            println!("Distance: {:.2} km", snap.stats.distance_km());
            println!("Elapsed: {} s", snap.elapsed_seconds);
            println!("Average speed: {:.1} km/h", snap.stats.average_speed_mps * 3.6);
            println!("Use `export` or `submit` to save it, `discard` to drop it.");
        }
        _ => println!(
            "[{}] Nothing to save: {}",
            ts_now(),
            snap.last_error.unwrap_or_default()
        ),
    }
    Ok(())
}

fn load_pending(store: &dyn SessionStore) -> Result<RecordingSession> {
    let stored = store.load().context("no stored session")?;
    let session = RecordingSession::from_stored(stored, true)
        .context("stored session has too little data")?;
    if session.status() != SessionStatus::PendingSave {
        bail!("stored session is {:?}; stop it before saving", session.status());
    }
    Ok(session)
}

async fn submit(
    store: Arc<dyn SessionStore>,
    details: TripDetails,
    client: &dyn TripSubmitter,
) -> Result<()> {
    let location = Arc::new(SimulatedLocationSource::default());
    let controller = SessionController::new(
        RecorderConfig::default(),
        store,
        location,
        Arc::new(NominatimGeocoder::default()),
    );
    if controller.status() != SessionStatus::PendingSave {
        bail!("no stopped trip waiting to be saved");
    }

    let id = controller.save_trip(details, client).await?;
    println!("[{}] Trip saved with id {}", ts_now(), id);
    Ok(())
}

fn print_status(store: &dyn SessionStore) {
    let Some(stored) = store.load() else {
        println!("No stored session");
        return;
    };

    println!("Status: {:?}", stored.status);
    println!("Points: {}", stored.points.len());
    println!("Points of interest: {}", stored.points_of_interest.len());
    println!("Elapsed: {} s", stored.elapsed_time);
    if let Some(start) = stored.start_time.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
        println!("Started: {}", start.to_rfc3339());
    }
    let stats = trip_recorder::TrackStats::from_points(&stored.points);
    println!("Distance: {:.2} km", stats.distance_km());
    for poi in &stored.points_of_interest {
        println!(
            "  * {} ({:.5}, {:.5}){}",
            poi.name.as_deref().unwrap_or("-"),
            poi.latitude,
            poi.longitude,
            poi.description
                .as_deref()
                .map(|d| format!(" - {}", d))
                .unwrap_or_default()
        );
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
