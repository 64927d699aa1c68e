use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use porchlight_core::logger::{summarize, ArrivalStats};
use porchlight_core::types::{parse_weekday, weekday_name};
use porchlight_core::logger::DEFAULT_DETECTOR;
use porchlight_core::{
    Arrival, ArrivalLogger, ArrivalStore, Clock, Routine, RoutineEngine, StoreError, SystemClock,
};
use porchlight_store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;

#[zbus::proxy(
    interface = "org.porchlight.Porchlight1",
    default_service = "org.porchlight.Porchlight1",
    default_path = "/org/porchlight/Porchlight1"
)]
trait Porchlight {
    fn log_arrival(&self, confidence: f64) -> zbus::Result<String>;
    fn recompute(&self) -> zbus::Result<String>;
    fn clear(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser, Debug)]
#[command(name = "porchlight", about = "Porchlight arrival routine CLI")]
struct Cli {
    /// Arrival database (default: $PORCHLIGHT_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Log an arrival now through the daemon
    Log {
        /// Detection confidence (0.0-1.0)
        #[arg(short, long, default_value_t = 1.0)]
        confidence: f64,
    },
    /// List logged arrivals
    Arrivals {
        /// Only arrivals from the last N days
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Ask the daemon to recompute the routine now
    Recompute,
    /// Show the current routine
    Routine,
    /// Show the routine for one weekday
    Day {
        /// Weekday name, e.g. "monday" or "mon"
        day: String,
    },
    /// Show per-weekday routines
    Week,
    /// Whether now is inside the predicted arrival window
    Window,
    /// Time until the next predicted arrival
    Next,
    /// Arrival statistics
    Stats,
    /// Delete all arrivals, the routine, greetings and the face profile
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match cli.command {
        Commands::Log { confidence } => {
            let reply = daemon().await?.log_arrival(confidence).await?;
            if json {
                println!("{reply}");
            } else {
                let arrival: Arrival = serde_json::from_str(&reply)?;
                println!("Logged arrival at {} ({})", arrival.time, weekday_name(arrival.day));
            }
        }
        Commands::Recompute => {
            let reply = daemon().await?.recompute().await?;
            if json {
                println!("{reply}");
            } else {
                let routine: Routine = serde_json::from_str(&reply)?;
                print_routine("Routine", &routine);
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear all data without --yes");
            }
            daemon().await?.clear().await?;
            println!("All arrival data cleared");
        }
        Commands::Status => match daemon().await {
            Ok(proxy) => match proxy.status().await {
                Ok(status) => println!("{status}"),
                Err(err) => println!("porchlightd: not responding ({err})"),
            },
            Err(err) => println!("porchlightd: not connected ({err})"),
        },
        command => {
            let store = Arc::new(open_store(cli.db)?);
            run_offline(command, store, json)?;
        }
    }

    Ok(())
}

async fn daemon() -> Result<PorchlightProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    PorchlightProxy::new(&conn)
        .await
        .context("cannot reach porchlightd")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore> {
    let path = db.unwrap_or_else(porchlight_store::db_path_from_env);
    SqliteStore::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

/// Every arrival, or only those from the last `days` days.
fn list_arrivals<S: ArrivalStore, C: Clock>(
    store: Arc<S>,
    clock: C,
    days: Option<u32>,
) -> Result<Vec<Arrival>, StoreError> {
    match days {
        Some(days) => ArrivalLogger::new(store, clock, DEFAULT_DETECTOR).recent_arrivals(days),
        None => store.arrivals(),
    }
}

/// Read-only queries answered straight from the database.
fn run_offline(command: Commands, store: Arc<SqliteStore>, json: bool) -> Result<()> {
    let engine = RoutineEngine::open(store.clone(), SystemClock)?;

    match command {
        Commands::Arrivals { days } => {
            let arrivals = list_arrivals(store.clone(), SystemClock, days)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&arrivals)?);
            } else if arrivals.is_empty() {
                println!("No arrivals logged");
            } else {
                for a in &arrivals {
                    println!(
                        "{} {:<9} {}  confidence {:.2}",
                        a.date,
                        weekday_name(a.day),
                        a.time,
                        a.confidence
                    );
                }
            }
        }
        Commands::Routine => match (engine.current_routine(), json) {
            (routine, true) => println!("{}", serde_json::to_string_pretty(&routine)?),
            (Some(routine), false) => print_routine("Routine", routine),
            (None, false) => println!("No routine yet (need at least 3 arrivals)"),
        },
        Commands::Day { day } => {
            let weekday = parse_weekday(&day).with_context(|| format!("unknown weekday: {day}"))?;
            let routine = engine.analyze_by_day(weekday)?;
            match (routine, json) {
                (routine, true) => println!("{}", serde_json::to_string_pretty(&routine)?),
                (Some(routine), false) => print_routine(weekday_name(weekday), &routine),
                (None, false) => println!("Not enough {} arrivals (need at least 2)", weekday_name(weekday)),
            }
        }
        Commands::Week => {
            let weekly = engine.weekly()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = weekly
                    .iter()
                    .map(|(day, r)| Ok((weekday_name(*day).to_string(), serde_json::to_value(r)?)))
                    .collect::<Result<_, serde_json::Error>>()?;
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else if weekly.is_empty() {
                println!("No weekday has enough arrivals yet");
            } else {
                for (day, routine) in &weekly {
                    println!("{:<9} {}", weekday_name(*day), window_line(routine));
                }
            }
        }
        Commands::Window => {
            let inside = engine.is_in_window();
            if json {
                println!("{inside}");
            } else if inside {
                println!("Inside the arrival window");
            } else {
                println!("Outside the arrival window");
            }
        }
        Commands::Next => match (engine.next_predicted_arrival(), json) {
            (next, true) => println!("{}", serde_json::to_string_pretty(&next)?),
            (Some(next), false) => println!("Next arrival around {} (in {:.1} h)", next.time, next.hours_away),
            (None, false) => println!("No routine yet"),
        },
        Commands::Stats => {
            let stats = summarize(&store.arrivals()?);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Log { .. } | Commands::Recompute | Commands::Clear { .. } | Commands::Status => {
            anyhow::bail!("{command:?} must go through porchlightd")
        }
    }
    Ok(())
}

fn window_line(routine: &Routine) -> String {
    format!(
        "{}-{}  mean {}  ±{} min  n={}  confidence {:.2}",
        routine.window_start,
        routine.window_end,
        routine.mean_arrival_time,
        routine.standard_deviation,
        routine.sample_size,
        routine.confidence
    )
}

fn print_routine(title: &str, routine: &Routine) {
    println!("{title}: {}", window_line(routine));
    println!("  updated {}", routine.last_updated.format("%Y-%m-%d %H:%M"));
}

fn print_stats(stats: &ArrivalStats) {
    println!("Total arrivals: {}", stats.total_arrivals);
    if stats.total_arrivals == 0 {
        return;
    }
    println!("Average confidence: {:.2}", stats.average_confidence);
    if let Some(last) = &stats.last_arrival {
        println!("Last arrival: {} {}", last.date, last.time);
    }
    for day in &stats.arrivals_by_day {
        println!(
            "  {:<9} {:>3} arrivals, average {}",
            weekday_name(day.day),
            day.count,
            day.average_time
        );
    }
}
