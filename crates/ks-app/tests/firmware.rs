use ks_acquire::SampleArena;
use ks_app::config::AuthSection;
use ks_app::store::{SETPOINT_KEY, mode_key};
use ks_app::{
    AppError, Board, CommandIngress, DoorSwitch, Firmware, KiuasConfig, MemoryStore,
    OutputDriver, PersistentStore, TemperatureProbe, command_queue,
};
use ks_auth::{Authenticator, KeyValue};
use ks_controls::{LoopState, OutputMode, RecordingSink, SENSOR_DISCONNECTED_C};
use ks_core::{ChannelId, OutputId};

const SECRET: &str = "test-secret";

struct Probe {
    present: bool,
    process_c: f64,
    ambient_c: Option<f64>,
}

impl TemperatureProbe for Probe {
    fn detect(&mut self) -> bool {
        self.present
    }

    fn read_process_c(&mut self) -> f64 {
        self.process_c
    }

    fn read_ambient_c(&mut self) -> Option<f64> {
        self.ambient_c
    }
}

struct Door {
    open: bool,
}

impl DoorSwitch for Door {
    fn is_open(&mut self) -> bool {
        self.open
    }
}

#[derive(Default)]
struct Relays {
    states: Vec<bool>,
    fail: bool,
}

impl OutputDriver for Relays {
    type Error = &'static str;

    fn write(&mut self, index: usize, energized: bool) -> Result<(), Self::Error> {
        if self.fail {
            return Err("bus error");
        }
        if self.states.len() <= index {
            self.states.resize(index + 1, true);
        }
        self.states[index] = energized;
        Ok(())
    }
}

type TestFirmware<'a> = Firmware<'a, Probe, Door, Relays, MemoryStore, 32>;

fn config() -> KiuasConfig {
    KiuasConfig {
        auth: AuthSection {
            secret: SECRET.into(),
        },
        ..KiuasConfig::default()
    }
}

fn board(process_c: f64) -> Board<Probe, Door, Relays> {
    Board {
        probe: Probe {
            present: true,
            process_c,
            ambient_c: Some(21.0),
        },
        door: Door { open: false },
        outputs: Relays::default(),
    }
}

fn boot<'a>(arena: &'a SampleArena<32>, store: MemoryStore) -> (TestFirmware<'a>, CommandIngress) {
    let auth = Authenticator::new(SECRET).unwrap();
    let (ingress, queue) = command_queue(8, auth, config().command_limits());
    let fw = Firmware::boot(config(), board(20.0), store, arena, queue, 0).unwrap();
    (fw, ingress)
}

fn signed(pairs: &[(&str, &str)]) -> String {
    let auth = Authenticator::new(SECRET).unwrap();
    let pairs: Vec<KeyValue> = pairs.iter().map(|(k, v)| KeyValue::new(*k, *v)).collect();
    auth.sign_query(&pairs).unwrap()
}

#[test]
fn boot_halts_without_probe() {
    let arena = SampleArena::<32>::new();
    let (_, queue) = command_queue(
        1,
        Authenticator::new(SECRET).unwrap(),
        config().command_limits(),
    );
    let mut b = board(20.0);
    b.probe.present = false;
    let result: Result<TestFirmware<'_>, _> =
        Firmware::boot(config(), b, MemoryStore::new(), &arena, queue, 0);
    assert!(matches!(result, Err(AppError::ProbeNotDetected)));
}

#[test]
fn boot_rejects_invalid_config() {
    let arena = SampleArena::<32>::new();
    let (_, queue) = command_queue(
        1,
        Authenticator::new(SECRET).unwrap(),
        config().command_limits(),
    );
    let result: Result<TestFirmware<'_>, _> =
        Firmware::boot(KiuasConfig::default(), board(20.0), MemoryStore::new(), &arena, queue, 0);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn boot_restores_persisted_settings_and_starts_disabled() {
    let arena = SampleArena::<32>::new();
    let mut store = MemoryStore::new();
    store.set(SETPOINT_KEY, "90").unwrap();
    store
        .set(&mode_key(OutputId::from_number(2).unwrap()), "off")
        .unwrap();
    let (mut fw, _ingress) = boot(&arena, store);

    assert_eq!(fw.control().setpoint(), 90.0);
    assert_eq!(fw.control().outputs()[1].mode, OutputMode::ForcedOff);

    fw.tick(0, &mut RecordingSink::new());
    assert_eq!(fw.control().state(), LoopState::Disabled);
    assert_eq!(fw.board().outputs.states, vec![false, false, false]);
}

#[test]
fn signed_commands_drive_and_persist() {
    let arena = SampleArena::<32>::new();
    let (mut fw, ingress) = boot(&arena, MemoryStore::new());
    let mut sink = RecordingSink::new();
    fw.tick(0, &mut sink);

    ingress
        .submit_query(&signed(&[("enabled", "true"), ("target", "85"), ("relay3", "off")]))
        .unwrap();
    let report = fw.tick(1000, &mut sink).expect("status after command batch");

    assert_eq!(report.state, LoopState::EnabledNormal);
    assert_eq!(report.target_c, 85.0);
    let weights: Vec<f64> = report.outputs.iter().map(|o| o.weight).collect();
    assert_eq!(weights, vec![1.0, 2.0, 1.0]);
    assert_eq!(fw.store().get(SETPOINT_KEY).as_deref(), Some("85"));
    assert_eq!(
        fw.store()
            .get(&mode_key(OutputId::from_number(3).unwrap()))
            .as_deref(),
        Some("off")
    );
    // Cold cabin: the two auto outputs run flat out, the third is off.
    assert_eq!(fw.board().outputs.states, vec![true, true, false]);
}

#[test]
fn batch_with_bad_command_is_refused_whole() {
    let arena = SampleArena::<32>::new();
    let (mut fw, ingress) = boot(&arena, MemoryStore::new());

    for batch in [
        signed(&[("enabled", "true"), ("target", "130")]),
        signed(&[("enabled", "true"), ("relay7", "on")]),
        signed(&[("enabled", "true"), ("target", "130"), ("relay7", "on")]),
    ] {
        assert!(matches!(
            ingress.submit_query(&batch),
            Err(AppError::InvalidCommand { .. })
        ));
    }

    // Nothing queued, so no command-triggered status and no change.
    fw.tick(0, &mut RecordingSink::new());
    assert!(fw.tick(1000, &mut RecordingSink::new()).is_none());
    assert_eq!(fw.control().state(), LoopState::Disabled);
    assert_eq!(fw.control().setpoint(), 75.0);
    assert_eq!(fw.store().get(SETPOINT_KEY), None);
    assert_eq!(
        fw.store()
            .get(&mode_key(OutputId::from_number(1).unwrap()))
            .as_deref(),
        None
    );
}

#[test]
fn open_door_opens_every_relay() {
    let arena = SampleArena::<32>::new();
    let (mut fw, ingress) = boot(&arena, MemoryStore::new());
    ingress
        .submit_query(&signed(&[("enabled", "true"), ("relay1", "on")]))
        .unwrap();
    let mut sink = RecordingSink::new();
    fw.tick(0, &mut sink);
    assert!(fw.board().outputs.states.iter().all(|&on| on));

    fw.board_mut().door.open = true;
    fw.tick(1000, &mut sink);
    assert_eq!(fw.control().state(), LoopState::EnabledInterlocked);
    assert!(fw.board().outputs.states.iter().all(|&on| !on));

    fw.board_mut().door.open = false;
    fw.board_mut().probe.process_c = SENSOR_DISCONNECTED_C;
    fw.tick(2000, &mut sink);
    assert_eq!(fw.control().state(), LoopState::Fault);
    assert!(fw.board().outputs.states.iter().all(|&on| !on));
}

#[test]
fn status_every_interval() {
    let arena = SampleArena::<32>::new();
    let (mut fw, _ingress) = boot(&arena, MemoryStore::new());
    let mut sink = RecordingSink::new();
    let interval = fw.config().control.status_interval_ms;

    assert!(fw.tick(0, &mut sink).is_some());
    let mut reports = 0;
    let mut now = 0;
    while now < 3 * interval {
        now += 1000;
        if fw.tick(now, &mut sink).is_some() {
            reports += 1;
        }
    }
    assert_eq!(reports, 3);
}

#[test]
fn status_carries_channel_voltages() {
    let arena = SampleArena::<32>::new();
    let ch0 = ChannelId::new(0).unwrap();
    let ch1 = ChannelId::new(1).unwrap();
    for i in 0..32 {
        arena.append(ch0, 512);
        arena.append(ch1, if i % 2 == 0 { 412 } else { 612 });
    }
    let (mut fw, _ingress) = boot(&arena, MemoryStore::new());
    let mut sink = RecordingSink::new();
    let report = fw.tick(0, &mut sink).unwrap();

    let v0 = report.volts.iter().find(|v| v.channel == 0).unwrap();
    let v1 = report.volts.iter().find(|v| v.channel == 1).unwrap();
    assert_eq!(v0.volts, 0.0);
    let expected = 100.0 * fw.config().adc_scale().volts_per_count();
    assert!((v1.volts - expected).abs() < 1e-9);
    // Channels without samples are left out.
    assert_eq!(report.volts.len(), 2);
    assert_eq!(sink.count_key("volts1"), 1);
    assert!(report.to_json().unwrap().contains("\"volts\""));
}

#[test]
fn relay_write_failures_do_not_stop_the_loop() {
    let arena = SampleArena::<32>::new();
    let (mut fw, _ingress) = boot(&arena, MemoryStore::new());
    fw.board_mut().outputs.fail = true;
    fw.tick(0, &mut RecordingSink::new());
    fw.tick(1000, &mut RecordingSink::new());
    assert_eq!(fw.write_failures(), 6);
}
