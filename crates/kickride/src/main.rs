//! `kickride` - CLI for the kickride engine
//!
//! This binary administers kickboards, riders and KPIs, drives rides through
//! their lifecycle and runs the administrative analytics.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{debug, warn};

use kickride::cli::{
    AdminCommand, Cli, Command, ConfigCommand, KickboardCommand, KpiCommand, OutputFormat,
    RideCommand, RiderCommand,
};
use kickride::model::{
    EndRideRequest, KickboardUpdate, KpiRef, KpiUpdate, NewKickboard, NewKpi, PathPoint, Ride,
    RiderUpdate, RiskEventInput, Role,
};
use kickride::{init_logging, Config, Engine};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;
    let output = cli.output();

    if let Command::Config(cmd) = cli.command {
        return handle_config(&config, cmd, output);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let (engine, worker) = Engine::open(&config)?;
    let worker = runtime.spawn(worker.run());

    let result = match cli.command {
        Command::Kickboard(cmd) => handle_kickboard(&engine, cmd, output),
        Command::Rider(cmd) => handle_rider(&engine, cmd, output),
        Command::Kpi(cmd) => handle_kpi(&engine, cmd, output),
        Command::Ride(cmd) => handle_ride(&engine, cmd, output),
        Command::Admin(cmd) => handle_admin(&engine, cmd, output),
        Command::Config(_) => Ok(()),
    };

    // Closing the queue lets the worker drain and stop.
    drop(engine);
    let report = runtime
        .block_on(worker)
        .context("side task worker panicked")?;
    if report.failed > 0 {
        warn!(failed = report.failed, "Some side tasks could not be completed");
    } else {
        debug!(completed = report.completed, "Side tasks drained");
    }

    result
}

/// Print `value` as pretty JSON, or through `plain` otherwise.
fn emit<T: Serialize + ?Sized>(output: OutputFormat, value: &T, plain: impl FnOnce(&T)) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Plain => plain(value),
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_ride(ride: &Ride) {
    println!("Ride {} ({})", ride.id, ride.status());
    println!("  Rider:      {}", ride.rider_id);
    println!("  Kickboard:  {}", ride.kickboard_id);
    println!("  Started:    {} at {}", ride.start_time, ride.start_location);
    if let (Some(end), Some(at)) = (ride.end_time, ride.end_location) {
        println!("  Ended:      {end} at {at}");
    }
    if let Some(score) = ride.score {
        println!("  Score:      {score}");
    }
    if let (Some(fare), Some(km), Some(min)) = (ride.fare, ride.distance_km, ride.duration_min) {
        println!("  Fare:       {fare} ({km:.2} km, {min} min)");
    }
    println!("  Helmet:     {}", if ride.helmet_on { "on" } else { "off" });
    if ride.accident_flag {
        println!("  Accident:   yes");
    }
}

fn print_rides(rides: &[Ride]) {
    if rides.is_empty() {
        println!("No rides.");
    }
    for ride in rides {
        println!(
            "{:>6}  {:<10} rider {:<6} {:<9} score {:>3}  {}",
            ride.id,
            ride.kickboard_id,
            ride.rider_id,
            ride.status().to_string(),
            ride.score.map_or_else(|| "-".to_string(), |s| s.to_string()),
            ride.start_time.format("%Y-%m-%d %H:%M"),
        );
    }
}

fn handle_kickboard(engine: &Engine, cmd: KickboardCommand, output: OutputFormat) -> Result<()> {
    let registry = engine.registry();
    let print = |kb: &kickride::model::Kickboard| {
        println!(
            "{}  {:<11} battery {:>3}%  {}{}",
            kb.id,
            kb.status.to_string(),
            kb.battery,
            kb.location,
            kb.model.as_deref().map(|m| format!("  [{m}]")).unwrap_or_default()
        );
    };

    match cmd {
        KickboardCommand::Register {
            id,
            at,
            battery,
            model,
        } => {
            let kb = registry.register(&NewKickboard {
                id,
                location: at,
                battery,
                model,
            })?;
            emit(output, &kb, print)
        }
        KickboardCommand::Show { id } => emit(output, &registry.get(&id)?, print),
        KickboardCommand::List { status } => {
            let list = registry.list(status.map(Into::into))?;
            emit(output, &list, |list| {
                if list.is_empty() {
                    println!("No kickboards.");
                }
                list.iter().for_each(print);
            })
        }
        KickboardCommand::Update {
            id,
            at,
            battery,
            model,
        } => {
            let kb = registry.update(
                &id,
                &KickboardUpdate {
                    location: at,
                    battery,
                    model,
                },
            )?;
            emit(output, &kb, print)
        }
        KickboardCommand::Maintenance { id } => emit(output, &registry.set_maintenance(&id)?, print),
        KickboardCommand::Release { id } => {
            emit(output, &registry.return_from_maintenance(&id)?, print)
        }
        KickboardCommand::Delete { id } => {
            registry.delete(&id)?;
            emit(output, &serde_json::json!({ "deleted": id }), |_| {
                println!("Deleted kickboard {id}");
            })
        }
        KickboardCommand::Nearby { at, radius } => {
            let nearby = registry.nearby(at, radius)?;
            emit(output, &nearby, |list| {
                if list.is_empty() {
                    println!("No available kickboards within {radius} m.");
                }
                for n in list {
                    print!("{:>8.1} m  ", n.distance_m);
                    print(&n.kickboard);
                }
            })
        }
    }
}

fn handle_rider(engine: &Engine, cmd: RiderCommand, output: OutputFormat) -> Result<()> {
    let accounts = engine.accounts();
    let print = |rider: &kickride::model::Rider| {
        println!(
            "Rider {} \"{}\" ({})  safety score: {}",
            rider.id,
            rider.display_name,
            rider.role,
            rider
                .safety_score
                .map_or_else(|| "none yet".to_string(), |s| format!("{s:.1}"))
        );
    };

    match cmd {
        RiderCommand::Register { name, id, admin } => {
            let role = if admin { Role::Admin } else { Role::Rider };
            emit(output, &accounts.register(id, &name, role)?, print)
        }
        RiderCommand::Show { id } => emit(output, &accounts.get(id)?, print),
        RiderCommand::Rename { id, name } => {
            let rider = accounts.update(
                id,
                &RiderUpdate {
                    display_name: Some(name),
                },
            )?;
            emit(output, &rider, print)
        }
        RiderCommand::History { id, limit } => {
            let rides = engine.rides().rider_history(id, limit)?;
            emit(output, &rides, |rides| print_rides(rides))
        }
    }
}

fn handle_kpi(engine: &Engine, cmd: KpiCommand, output: OutputFormat) -> Result<()> {
    let catalog = engine.catalog();
    let print = |kpi: &kickride::model::Kpi| {
        println!(
            "{:>4}  {:<20} {:>6.2}  {}",
            kpi.id,
            kpi.name,
            kpi.weight,
            kpi.description.as_deref().unwrap_or("")
        );
    };

    match cmd {
        KpiCommand::Add {
            name,
            weight,
            description,
        } => {
            let kpi = catalog.add(&NewKpi {
                name,
                description,
                weight,
            })?;
            emit(output, &kpi, print)
        }
        KpiCommand::List => {
            let list = catalog.list()?;
            emit(output, &list, |list| list.iter().for_each(print))
        }
        KpiCommand::Update {
            id,
            name,
            description,
            weight,
        } => {
            let kpi = catalog.update(
                id,
                &KpiUpdate {
                    name,
                    description,
                    weight,
                },
            )?;
            emit(output, &kpi, print)
        }
        KpiCommand::SetWeight { id, weight } => {
            emit(output, &engine.apply_kpi_weight(id, weight)?, print)
        }
    }
}

fn handle_ride(engine: &Engine, cmd: RideCommand, output: OutputFormat) -> Result<()> {
    let rides = engine.rides();

    match cmd {
        RideCommand::Start {
            rider,
            kickboard,
            at,
            no_helmet,
        } => {
            let handle = engine.start_ride(rider, &kickboard, at, !no_helmet)?;
            emit(output, &handle, |h| {
                println!(
                    "Started ride {} for rider {} on {} at {}",
                    h.ride_id, h.rider_id, h.kickboard_id, h.location
                );
            })
        }
        RideCommand::End {
            ride,
            at,
            events,
            path,
            helmet,
            distance,
        } => {
            let risk_events: Vec<RiskEventInput> = match events {
                Some(file) => read_json(&file)?,
                None => Vec::new(),
            };
            let ride_path: Option<Vec<PathPoint>> = path.map(|file| read_json(&file)).transpose()?;

            let summary = engine.end_ride(&EndRideRequest {
                ride_id: ride,
                end_location: Some(at),
                risk_events,
                helmet_on: helmet,
                distance_override_km: distance,
                ride_path,
            })?;
            emit(output, &summary, |s| {
                println!("Ride {} completed", s.ride_id);
                println!("  Score:     {} (deduction {:.2})", s.score, s.deduction);
                println!("  Fare:      {}", s.fare);
                println!("  Distance:  {:.2} km", s.distance_km);
                println!("  Duration:  {} min", s.duration_min);
                for skipped in &s.skipped_events {
                    println!("  Skipped event {}: {}", skipped.reference, skipped.reason);
                }
            })
        }
        RideCommand::Show { ride } => emit(output, &rides.get_ride(ride)?, print_ride),
        RideCommand::Event { ride, kpi, at } => {
            let recorded = engine.record_risk_event(ride, &KpiRef::parse(&kpi), Utc::now(), at)?;
            emit(output, &recorded, |r| {
                println!(
                    "Recorded {} (weight {:.2}) on ride {}",
                    r.kpi_name, r.weight, r.event.ride_id
                );
            })
        }
        RideCommand::Risks { ride } => {
            let events = engine.ingestor().events_for_ride(ride)?;
            emit(output, &events, |events| {
                if events.is_empty() {
                    println!("No risk events.");
                }
                for e in events {
                    println!(
                        "{}  {:<20} {:>6.2}  {}",
                        e.event.timestamp.format("%H:%M:%S"),
                        e.kpi_name,
                        e.weight,
                        e.event.location
                    );
                }
            })
        }
        RideCommand::Path { ride } => {
            let path = rides.ride_path(ride)?;
            emit(output, &path, |path| match path {
                None => println!("No path stored for ride {ride}."),
                Some(points) => {
                    for p in points {
                        let speed = p.speed.map(|s| format!("  {s:.1} km/h")).unwrap_or_default();
                        println!("{}{speed}", p.location);
                    }
                }
            })
        }
        RideCommand::Active => {
            let active = rides.active_rides()?;
            emit(output, &active, |active| {
                if active.is_empty() {
                    println!("No active rides.");
                }
                for a in active {
                    println!(
                        "{:>6}  {:<10} rider {:<6} battery {:>3}%  {}  since {}",
                        a.ride_id,
                        a.kickboard_id,
                        a.rider_id,
                        a.battery,
                        a.location,
                        a.start_time.format("%H:%M")
                    );
                }
            })
        }
        RideCommand::Accident { ride, clear } => {
            emit(output, &rides.mark_accident(ride, !clear)?, print_ride)
        }
        RideCommand::Accidents { hours, limit } => {
            let list = rides.recent_accidents(hours, limit)?;
            emit(output, &list, |list| print_rides(list))
        }
    }
}

fn handle_admin(engine: &Engine, cmd: AdminCommand, output: OutputFormat) -> Result<()> {
    match cmd {
        AdminCommand::Recommend { apply } => {
            let report = engine.recommend_kpi_weights()?;
            let applied = if apply {
                engine.analyzer().apply_report(&report)?
            } else {
                Vec::new()
            };
            let value = serde_json::json!({ "report": report, "applied": applied });
            emit(output, &value, |_| {
                println!(
                    "Completed rides: {} accident, {} normal",
                    report.total_accident_rides, report.total_normal_rides
                );
                if !report.sufficient_data {
                    println!("Not enough data; weights left unchanged.");
                }
                for r in &report.recommendations {
                    println!(
                        "{:<20} {:>6.2} -> {:>6.2}  ({})",
                        r.name, r.current_weight, r.recommended_weight, r.reason
                    );
                }
                if apply {
                    println!("Applied {} weight change(s).", applied.len());
                }
            })
        }
        AdminCommand::Recompute => {
            let report = engine.recalculate_all()?;
            emit(output, &report, |r| {
                println!(
                    "Recomputed {} ride(s) and {} rider(s).",
                    r.rides_updated, r.riders_updated
                );
            })
        }
        AdminCommand::Stats => {
            let stats = engine.stats()?;
            let degradation = engine.degradation();
            let value = serde_json::json!({ "storage": stats, "degradation": degradation });
            emit(output, &value, |_| {
                println!("kickride statistics");
                println!("-------------------");
                println!("Kickboards:    {}", stats.kickboards);
                println!("Riders:        {}", stats.riders);
                println!("KPIs:          {}", stats.kpis);
                println!("Rides:         {} ({} active)", stats.rides, stats.active_rides);
                println!("Risk events:   {}", stats.risk_events);
                if let Some(last) = stats.last_ride_start {
                    println!("Last ride:     {last}");
                }
                println!("Database size: {} bytes", stats.db_size_bytes);
            })
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand, output: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommand::Show => emit(output, config, |config| {
            println!("Current Configuration");
            println!("=====================");
            println!();
            println!("[Storage]");
            println!("  Database path:      {}", config.database_path().display());
            println!("  Recompute batch:    {}", config.storage.recompute_batch_size);
            println!();
            println!("[Fare]");
            println!("  Base fare:          {}", config.fare.base_fare);
            println!("  Per minute:         {}", config.fare.per_minute_rate);
            println!("  Per km:             {}", config.fare.per_km_rate);
            println!();
            println!("[Scoring]");
            println!("  Inertia (km):       {}", config.scoring.inertia_km);
            println!("  Helmet-off KPI:     {}", config.scoring.helmet_off_kpi);
            println!();
            println!("[Analyzer]");
            println!(
                "  Minimum rides:      {} accident / {} normal",
                config.analyzer.min_accident_rides, config.analyzer.min_normal_rides
            );
            println!(
                "  Weight bounds:      {} - {}",
                config.analyzer.min_weight, config.analyzer.max_weight
            );
            println!();
            println!("[Side tasks]");
            println!("  Max attempts:       {}", config.side_tasks.max_attempts);
        }),
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
            Ok(())
        }
    }
}
