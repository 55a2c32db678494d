mod plant;
mod sim;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ks_acquire::{DEFAULT_BUFFER_CAPACITY, MultiplexedSampler, SampleArena, SampleOutcome};
use ks_app::config::AuthSection;
use ks_app::{
    AppError, AppResult, Board, Firmware, JsonFileStore, KiuasConfig, MemoryStore,
    PersistentStore, command_queue, load_yaml,
};
use ks_auth::{Authenticator, KeyValue, parse_json, parse_query};
use ks_controls::{LoopState, TelemetryEvent};
use ks_core::timing::{Timer, enable_timing, loop_timing};
use ks_core::as_celsius;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::plant::ThermalPlant;
use crate::sim::{Scenario, SimDoor, SimProbe, SimRelays, Span, SyntheticMains};

static ARENA: SampleArena<DEFAULT_BUFFER_CAPACITY> = SampleArena::new();

const SIM_SECRET: &str = "kiuas-sim";

#[derive(Parser)]
#[command(name = "ks-sim")]
#[command(about = "Kiuas controller host simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the firmware against a simulated cabin
    Run {
        /// Configuration YAML (defaults to the reference board)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON file for persisted settings (in-memory if omitted)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Simulated duration in seconds
        #[arg(long, default_value_t = 3600.0)]
        duration: f64,
        /// Setpoint sent as a signed command at start
        #[arg(long)]
        target: Option<f64>,
        /// Door opening, START+DURATION in seconds (repeatable)
        #[arg(long = "door", value_name = "START+DURATION")]
        door: Vec<Span>,
        /// Probe dropout, START+DURATION in seconds (repeatable)
        #[arg(long = "dropout", value_name = "START+DURATION")]
        dropout: Vec<Span>,
        /// Print every telemetry event as a JSON line
        #[arg(long)]
        events: bool,
        /// Print status reports as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Sign key=value pairs and print the query string
    Sign {
        #[arg(long)]
        secret: String,
        /// Pairs such as enabled=true target=80
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Verify a signed query string or JSON object
    Verify {
        #[arg(long)]
        secret: String,
        /// Query string, or a JSON object when it starts with `{`
        request: String,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Path to the configuration YAML file
        path: PathBuf,
    },
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            store,
            duration,
            target,
            door,
            dropout,
            events,
            json,
        } => {
            let scenario = Scenario {
                door_open: door,
                probe_dropout: dropout,
            };
            let options = RunOptions {
                duration_s: duration,
                target,
                events,
                json,
            };
            let config = match config {
                Some(path) => load_yaml(&path)?,
                None => KiuasConfig {
                    auth: AuthSection {
                        secret: SIM_SECRET.into(),
                    },
                    ..KiuasConfig::default()
                },
            };
            match store {
                Some(path) => cmd_run(config, JsonFileStore::open(&path)?, &scenario, &options),
                None => cmd_run(config, MemoryStore::new(), &scenario, &options),
            }
        }
        Commands::Sign { secret, pairs } => cmd_sign(&secret, &pairs),
        Commands::Verify { secret, request } => cmd_verify(&secret, &request),
        Commands::CheckConfig { path } => cmd_check_config(&path),
    }
}

struct RunOptions {
    duration_s: f64,
    target: Option<f64>,
    events: bool,
    json: bool,
}

fn cmd_run<S: PersistentStore>(
    config: KiuasConfig,
    store: S,
    scenario: &Scenario,
    options: &RunOptions,
) -> AppResult<()> {
    enable_timing();
    loop_timing::reset_all();
    ARENA.clear();

    let outputs = config.control.weights.len();
    let weights = config.control.weights.clone();
    let tick_ms = config.control.tick_ms;
    let sampler_config = config.sampler_config()?;
    let samples_per_tick = u64::from(sampler_config.rate_hz) * tick_ms / 1000;
    let period_us = u64::from(sampler_config.period_us());

    let plant = ThermalPlant::default();
    let mut cabin = plant.ambient;
    let board = Board {
        probe: SimProbe {
            cabin_c: as_celsius(cabin),
            ambient_c: as_celsius(plant.ambient),
            lost: false,
        },
        door: SimDoor::default(),
        outputs: SimRelays::new(outputs),
    };

    let auth = Authenticator::new(config.auth.secret.as_bytes())?;
    let (ingress, queue) = command_queue(
        config.control.command_queue,
        auth.clone(),
        config.command_limits(),
    );
    let mains = SyntheticMains::new(config.adc_scale(), outputs);
    let mut sampler = MultiplexedSampler::new(&sampler_config, &ARENA, mains)?;
    let mut fw = Firmware::boot(config, board, store, &ARENA, queue, 0)?;

    let mut start = vec![KeyValue::new("enabled", "true")];
    if let Some(t) = options.target {
        start.push(KeyValue::new("target", t.to_string()));
    }
    ingress.submit_query(&auth.sign_query(&start)?)?;

    let mut sink = |event: &TelemetryEvent| {
        if options.events {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to encode event"),
            }
        }
    };

    let ticks = (options.duration_s * 1000.0 / tick_ms as f64).ceil() as u64;
    let mut stats = RunStats::default();
    for k in 0..ticks {
        let now_ms = k * tick_ms;
        let t_s = now_ms as f64 / 1000.0;

        let energized = fw.board().outputs.energized.clone();
        let power = ThermalPlant::power_fraction(&weights, &energized);
        cabin = plant.step(cabin, tick_ms as f64 / 1000.0, power);
        {
            let board = fw.board_mut();
            board.probe.cabin_c = as_celsius(cabin);
            board.probe.lost = scenario.probe_lost_at(t_s);
            board.door.open = scenario.door_open_at(t_s);
        }

        for j in 0..samples_per_tick {
            let mains = sampler.driver_mut();
            mains.now_us = now_ms * 1000 + j * period_us;
            mains.energized.clone_from(&energized);
            let timer = Timer::start();
            if let SampleOutcome::Dropped { channel } = sampler.tick() {
                warn!(%channel, "sample dropped");
            }
            timer.stop_into(&loop_timing::SAMPLER_TICK);
        }

        if let Some(report) = fw.tick(now_ms, &mut sink) {
            if options.json {
                println!("{}", report.to_json()?);
            } else {
                info!(
                    t_s,
                    state = report.state.as_str(),
                    temp_c = report.temp_c,
                    target_c = report.target_c,
                    u = report.pid,
                    "status"
                );
            }
        }
        stats.observe(t_s, as_celsius(cabin), fw.control().setpoint(), fw.control().state());
    }

    let relays = &fw.board().outputs;
    println!("Simulated {:.0} s in {} ticks", options.duration_s, ticks);
    println!("  Final cabin temperature: {:.2} °C", as_celsius(cabin));
    println!("  Setpoint: {:.2} °C", fw.control().setpoint());
    match stats.reached_s {
        Some(t) => println!("  Setpoint reached after {t:.0} s"),
        None => println!("  Setpoint not reached"),
    }
    println!("  Peak overshoot: {:.2} °C", stats.overshoot_c);
    println!("  Ticks interlocked: {}, in fault: {}", stats.interlocked, stats.fault);
    println!("  Relay switchings: {}", relays.switch_count);
    println!("  Samples: {} stored, {} dropped", sampler.stats().stored, sampler.stats().dropped);
    println!("  Cost per operation:");
    for s in loop_timing::summaries() {
        println!(
            "    {:<14} n={:<8} avg={:>8.1} us  worst={:>6} us",
            s.label, s.count, s.average_us, s.worst_us
        );
    }
    Ok(())
}

#[derive(Default)]
struct RunStats {
    reached_s: Option<f64>,
    overshoot_c: f64,
    interlocked: u64,
    fault: u64,
}

impl RunStats {
    fn observe(&mut self, t_s: f64, cabin_c: f64, setpoint_c: f64, state: LoopState) {
        if self.reached_s.is_none() && cabin_c >= setpoint_c {
            self.reached_s = Some(t_s);
        }
        if self.reached_s.is_some() {
            self.overshoot_c = self.overshoot_c.max(cabin_c - setpoint_c);
        }
        match state {
            LoopState::EnabledInterlocked => self.interlocked += 1,
            LoopState::Fault => self.fault += 1,
            LoopState::Disabled | LoopState::EnabledNormal => {}
        }
    }
}

fn cmd_sign(secret: &str, pairs: &[String]) -> AppResult<()> {
    let auth = Authenticator::new(secret)?;
    let pairs = pairs
        .iter()
        .map(|p| {
            p.split_once('=')
                .map(|(k, v)| KeyValue::new(k, v))
                .ok_or_else(|| AppError::InvalidCommand {
                    key: p.clone(),
                    value: String::new(),
                    reason: "expected key=value".into(),
                })
        })
        .collect::<AppResult<Vec<_>>>()?;
    println!("{}", auth.sign_query(&pairs)?);
    Ok(())
}

fn cmd_verify(secret: &str, request: &str) -> AppResult<()> {
    let auth = Authenticator::new(secret)?;
    let request = if request.trim_start().starts_with('{') {
        parse_json(request)?
    } else {
        parse_query(request)
    };
    println!("Canonical: {}", request.canonical());
    auth.verify_request(&request)?;
    println!("✓ Signature valid");
    Ok(())
}

fn cmd_check_config(path: &Path) -> AppResult<()> {
    println!("Checking configuration: {}", path.display());
    let config = load_yaml(path)?;
    let sampler = config.sampler_config()?;
    println!("✓ Configuration is valid");
    println!(
        "  Outputs: {} (weights {:?})",
        config.control.weights.len(),
        config.control.weights
    );
    println!(
        "  Sampler: {} Hz over {} channels ({:.1} Hz each)",
        sampler.rate_hz,
        sampler.channels.len(),
        sampler.per_channel_rate_hz()
    );
    println!(
        "  Buffer: {} samples per channel ({:.1} s)",
        DEFAULT_BUFFER_CAPACITY,
        DEFAULT_BUFFER_CAPACITY as f64 / sampler.per_channel_rate_hz()
    );
    let lp = config.loop_config();
    println!("  Staging: {:?}", lp.policy);
    if let Some(thresholds) = &lp.thresholds {
        println!("  Relay thresholds: {thresholds:?}");
    }
    println!(
        "  Setpoint default: {:.1} °C (max {:.1} °C)",
        config.control.setpoint_c, config.control.temp_absmax_c
    );
    Ok(())
}
