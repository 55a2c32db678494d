//! Boot sequence and main-loop tick.
//!
//! The sampler runs from its own interrupt and only shares the sample arena
//! with this code. Everything else, outputs included, is touched from
//! [`Firmware::tick`] alone.

use ks_acquire::{AcquireError, RmsExtractor, SampleArena};
use ks_controls::{ControlLoop, PidLoop, TelemetryEvent, TelemetrySink, TickInput};
use ks_core::ChannelId;
use ks_core::timing::{Timer, loop_timing};
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandQueue};
use crate::config::KiuasConfig;
use crate::error::{AppError, AppResult};
use crate::hardware::{DoorSwitch, OutputDriver, TemperatureProbe};
use crate::status::{ChannelVolts, StatusReport};
use crate::store::{self, PersistentStore, SETPOINT_KEY};

/// The board peripherals the main loop owns.
pub struct Board<P, D, O> {
    pub probe: P,
    pub door: D,
    pub outputs: O,
}

pub struct Firmware<'a, P, D, O, S, const N: usize> {
    config: KiuasConfig,
    control: ControlLoop<PidLoop>,
    board: Board<P, D, O>,
    store: S,
    rms: RmsExtractor<'a, N>,
    channels: Vec<ChannelId>,
    commands: CommandQueue,
    last_status_ms: Option<u64>,
    write_failures: u64,
}

impl<'a, P, D, O, S, const N: usize> Firmware<'a, P, D, O, S, N>
where
    P: TemperatureProbe,
    D: DoorSwitch,
    O: OutputDriver,
    S: PersistentStore,
{
    /// Validate the configuration, check for the process probe and restore
    /// persisted settings. Heating always boots disabled with every output
    /// off.
    pub fn boot(
        config: KiuasConfig,
        mut board: Board<P, D, O>,
        store: S,
        arena: &'a SampleArena<N>,
        commands: CommandQueue,
        now_ms: u64,
    ) -> AppResult<Self> {
        config.validate()?;
        let outputs = config.control.weights.len();
        for index in 0..outputs {
            if let Err(e) = board.outputs.write(index, false) {
                warn!(output = index + 1, error = ?e, "failed to open relay at boot");
            }
        }

        if !board.probe.detect() {
            error!("process temperature probe not found, refusing to start");
            return Err(AppError::ProbeNotDetected);
        }

        let absmax = config.control.temp_absmax_c;
        let setpoint = store::load_setpoint(&store, absmax).unwrap_or(config.control.setpoint_c);
        let modes = store::load_modes(&store, outputs);
        let control = ControlLoop::new(
            config.loop_config(),
            PidLoop::new(config.pid.clone()),
            setpoint,
            &modes,
            now_ms,
        )?;
        let channels = config.sampler.channels.clone();
        let rms = RmsExtractor::new(arena, config.adc_scale());

        info!(
            setpoint,
            outputs,
            policy = ?control.config().policy,
            "controller booted"
        );
        Ok(Self {
            config,
            control,
            board,
            store,
            rms,
            channels,
            commands,
            last_status_ms: None,
            write_failures: 0,
        })
    }

    /// One main-loop pass: commands, sensors, control, outputs and, when
    /// due, a full status report.
    pub fn tick(&mut self, now_ms: u64, sink: &mut impl TelemetrySink) -> Option<StatusReport> {
        let timer = Timer::start();

        let batches = self.commands.drain();
        for command in batches.iter().flatten() {
            self.apply(*command);
        }

        let input = TickInput {
            now_ms,
            process_c: self.board.probe.read_process_c(),
            ambient_c: self.board.probe.read_ambient_c(),
            door_open: self.board.door.is_open(),
        };
        self.control.tick(input, sink);
        self.write_outputs();

        let due = self
            .last_status_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.config.control.status_interval_ms);
        let report = (due || !batches.is_empty()).then(|| {
            self.last_status_ms = Some(now_ms);
            self.status(now_ms, sink)
        });

        timer.stop_into(&loop_timing::CONTROL_TICK);
        report
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetEnabled(enabled) => self.control.set_enabled(enabled),
            Command::SetSetpoint(celsius) => match self.control.set_setpoint(celsius) {
                Ok(()) => {
                    info!(celsius, "setpoint changed");
                    self.persist(SETPOINT_KEY, &celsius.to_string());
                }
                Err(e) => warn!(error = %e, "setpoint rejected"),
            },
            Command::SetOutputMode { output, mode } => match self.control.set_mode(output, mode) {
                Ok(()) => self.persist(&store::mode_key(output), mode.as_str()),
                Err(e) => warn!(error = %e, "output mode rejected"),
            },
        }
    }

    fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!(key, error = %e, "failed to persist setting");
        }
    }

    /// Drive every relay from the commanded state, every tick.
    fn write_outputs(&mut self) {
        for (index, out) in self.control.outputs().iter().enumerate() {
            if let Err(e) = self.board.outputs.write(index, out.energized) {
                self.write_failures += 1;
                warn!(output = index + 1, error = ?e, "relay write failed");
            }
        }
    }

    fn status(&self, now_ms: u64, sink: &mut impl TelemetrySink) -> StatusReport {
        let mut volts = Vec::with_capacity(self.channels.len());
        for (channel, result) in self.rms.rms_all(&self.channels) {
            match result {
                Ok(v) => {
                    sink.publish(&TelemetryEvent::RmsVoltage {
                        channel: channel.raw(),
                        volts: v,
                    });
                    volts.push(ChannelVolts {
                        channel: channel.raw(),
                        volts: v,
                    });
                }
                Err(AcquireError::NoSamples { .. }) => {
                    debug!(%channel, "no samples yet");
                }
                Err(e) => warn!(%channel, error = %e, "rms extraction failed"),
            }
        }
        StatusReport::capture(&self.control, volts, now_ms)
    }

    pub fn control(&self) -> &ControlLoop<PidLoop> {
        &self.control
    }

    pub fn config(&self) -> &KiuasConfig {
        &self.config
    }

    pub fn board(&self) -> &Board<P, D, O> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<P, D, O> {
        &mut self.board
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Relay writes that failed since boot.
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }
}
