use rust_labio::config::LabConfig;
use rust_labio::instrument::pump::{commands, InitOptions, Report, SyringePump};
use rust_labio::mock::{serve, ScriptedTransport, SimulatedXlp6000, WireLog};
use rust_labio::protocol::{DecodedValue, ValvePosition};
use rust_labio::transport::LineTransport;
use rust_labio::LabError;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn scripted(port: &str) -> (SyringePump, SimulatedXlp6000, WireLog) {
    let sim = SimulatedXlp6000::new('1');
    let transport = ScriptedTransport::new(port, sim.clone());
    let log = transport.log();
    let pump = SyringePump::open("pump", '1', transport, READ_TIMEOUT).unwrap();
    (pump, sim, log)
}

#[tokio::test]
async fn test_pump_over_duplex() {
    let (host, device) = tokio::io::duplex(256);
    let sim = SimulatedXlp6000::new('1');
    let device_task = serve(device, b'\r', sim.clone());

    let pump = SyringePump::open("pump", '1', LineTransport::new("duplex-pump", host), READ_TIMEOUT)
        .unwrap();
    pump.initialize(InitOptions::default()).await.unwrap();
    pump.move_absolute(3000).await.unwrap();

    assert_eq!(pump.plunger_position().await.unwrap(), 3000);
    assert_eq!(sim.plunger(), 3000);

    pump.close().await;
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_opening_does_not_initialize() {
    let (pump, sim, log) = scripted("pump-open");
    assert!(log.writes().is_empty());
    assert!(!sim.is_initialized());

    let err = pump.move_absolute(100).await.unwrap_err();
    let fault = err.device_error().unwrap();
    assert_eq!(fault.code, 7);
    assert_eq!(fault.message, "Device not initialized");
}

#[tokio::test]
async fn test_embedded_status_needs_no_extra_round_trip() {
    let (pump, _sim, log) = scripted("pump-status");

    pump.simulated_initialize().await.unwrap();
    pump.set_top_speed(1200).await.unwrap();
    assert_eq!(pump.top_speed().await.unwrap(), 1200);

    assert_eq!(log.writes(), ["/1zR\r", "/1V1200R\r", "/1?2R\r"]);
}

#[tokio::test]
async fn test_valve_positions() {
    let (pump, sim, _log) = scripted("pump-valve");
    pump.simulated_initialize().await.unwrap();

    for position in [ValvePosition::Output, ValvePosition::Bypass, ValvePosition::Input] {
        pump.set_valve(position).await.unwrap();
        assert_eq!(sim.valve(), position);
        let reported = pump.valve().await.unwrap();
        assert_eq!(reported, position);
        assert_eq!(reported.code(), position.code());
    }
}

#[tokio::test]
async fn test_unknown_valve_symbol_is_a_decode_error() {
    let responder = |_: &[u8]| vec![b"\xFF/0`x\x03".to_vec()];
    let pump = SyringePump::open(
        "pump",
        '1',
        ScriptedTransport::new("pump-bad-valve", responder),
        READ_TIMEOUT,
    )
    .unwrap();

    let err = pump.valve().await.unwrap_err();
    assert!(matches!(err, LabError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn test_voltage_is_scaled_to_volts() {
    let (pump, _sim, _log) = scripted("pump-voltage");
    assert_eq!(pump.voltage().await.unwrap(), 24.0);
}

#[tokio::test]
async fn test_relative_moves_pick_sign_by_direction() {
    let (pump, sim, log) = scripted("pump-relative");
    pump.simulated_initialize().await.unwrap();

    pump.move_relative(-1500).await.unwrap();
    assert_eq!(sim.plunger(), 1500);
    pump.move_relative(500).await.unwrap();
    assert_eq!(sim.plunger(), 1000);

    let writes = log.writes();
    assert_eq!(&writes[1..], ["/1P1500R\r", "/1D500R\r"]);
}

#[tokio::test]
async fn test_device_fault_keeps_the_reported_value() {
    let (pump, sim, _log) = scripted("pump-fault");
    pump.simulated_initialize().await.unwrap();
    pump.move_absolute(2000).await.unwrap();

    sim.fail_next(9);
    let outcome = pump.report(Report::PlungerPosition).await.unwrap();
    assert_eq!(outcome.value, Some(DecodedValue::Integer(2000)));
    let fault = outcome.device_error.unwrap();
    assert_eq!((fault.code, fault.message.as_str()), (9, "Plunger overload"));

    assert!(pump.status().await.unwrap().is_ready());
}

#[tokio::test]
async fn test_out_of_range_arguments_never_write() {
    let (pump, _sim, log) = scripted("pump-range");

    for command in [
        commands::move_absolute(48_001),
        commands::top_speed(6001),
        commands::start_speed(49),
        commands::cutoff_speed(2701),
        commands::speed_code(41),
        commands::slope(21),
        commands::backlash(32),
    ] {
        let err = pump.session().transact(&command).await.unwrap_err();
        assert!(matches!(err, LabError::ArgumentOutOfRange { .. }), "{err}");
    }
    assert!(log.writes().is_empty());
}

#[tokio::test]
async fn test_every_report_decodes() {
    let (pump, _sim, _log) = scripted("pump-reports");
    pump.simulated_initialize().await.unwrap();

    for report in Report::ALL {
        let outcome = pump.report(report).await.unwrap();
        assert!(outcome.is_ok(), "{report:?}");
        assert!(outcome.value.is_some(), "{report:?}");
    }
    assert!(pump.firmware_version().await.unwrap().starts_with("XLP6000"));
}

#[tokio::test(start_paused = true)]
async fn test_commands_for_another_address_time_out() {
    let sim = SimulatedXlp6000::new('2');
    let pump = SyringePump::open(
        "pump",
        '1',
        ScriptedTransport::new("pump-wrong-address", sim),
        READ_TIMEOUT,
    )
    .unwrap();

    let err = pump.terminate().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

#[tokio::test]
async fn test_device_status_text() {
    let (pump, _sim, log) = scripted("pump-device-status");
    assert_eq!(pump.device_status().await.unwrap(), "ready");
    assert_eq!(log.writes(), ["/1?29R\r"]);
}

#[tokio::test]
async fn test_configured_address_is_used_on_the_wire() {
    let config = LabConfig::from_toml_str(
        r#"
        [application]
        name = "bench"

        [[instruments]]
        id = "pump-b"
        kind = "syringe_pump"
        port = "/dev/ttyUSB1"
        pump_address = "B"
        "#,
    )
    .unwrap();
    let definition = config.instrument("pump-b").unwrap();

    let sim = SimulatedXlp6000::new('B');
    let transport = ScriptedTransport::new("pump-configured", sim.clone());
    let log = transport.log();
    let pump = SyringePump::open_configured(definition, transport).unwrap();

    assert_eq!(pump.address(), 'B');
    assert_eq!(pump.session().id(), "pump-b");
    pump.simulated_initialize().await.unwrap();
    assert!(sim.is_initialized());
    assert_eq!(log.writes(), ["/BzR\r"]);
}
