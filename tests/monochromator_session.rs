use rust_labio::config::LabConfig;
use rust_labio::instrument::monochromator::{commands, Monochromator};
use rust_labio::mock::{serve, ScriptedTransport, SimulatedCornerstone, WireEvent};
use rust_labio::protocol::{DecodedValue, ShutterState};
use rust_labio::transport::{LineTransport, PortClaim};
use rust_labio::{DeviceError, LabError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

async fn scripted(port: &str) -> (Monochromator, SimulatedCornerstone, rust_labio::mock::WireLog) {
    let sim = SimulatedCornerstone::new();
    let transport = ScriptedTransport::new(port, sim.clone());
    let log = transport.log();
    let mono = Monochromator::open("mono", transport, READ_TIMEOUT)
        .await
        .unwrap();
    (mono, sim, log)
}

#[tokio::test]
async fn test_set_wavelength_over_duplex() {
    let (host, device) = tokio::io::duplex(256);
    let sim = SimulatedCornerstone::new();
    let device_task = serve(device, b'\n', sim.clone());

    let transport = LineTransport::new("duplex-mono", host);
    let mono = Monochromator::open("mono", transport, READ_TIMEOUT)
        .await
        .unwrap();

    let outcome = mono
        .session()
        .transact(&commands::go_wavelength(550))
        .await
        .unwrap();
    assert_eq!(outcome.device_error, None);
    assert_eq!(sim.wavelength(), 550.0);
    assert_eq!(mono.wavelength().await.unwrap(), 550);

    mono.close().await;
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_wire_sequence_for_set_wavelength() {
    let (mono, _sim, log) = scripted("mono-wire").await;

    mono.set_wavelength(550).await.unwrap();

    assert_eq!(
        log.writes(),
        ["HANDSHAKE 0\n", "STB?\n", "GOWAVE 550\n", "STB?\n"]
    );
}

#[tokio::test]
async fn test_device_error_is_reported_with_value() {
    let (mono, sim, _log) = scripted("mono-fault").await;

    sim.fail_next(3);
    let outcome = mono
        .session()
        .transact(&commands::wavelength())
        .await
        .unwrap();

    assert_eq!(outcome.value, Some(DecodedValue::Integer(500)));
    assert_eq!(
        outcome.device_error,
        Some(DeviceError::new(
            3,
            "Destination position for wavelength motion not allowed."
        ))
    );

    // The fault was read and cleared; the session carries on.
    assert_eq!(mono.wavelength().await.unwrap(), 500);
}

#[tokio::test]
async fn test_typed_getter_surfaces_device_error() {
    let (mono, sim, _log) = scripted("mono-typed-fault").await;

    sim.fail_next(8);
    let err = mono.wavelength().await.unwrap_err();
    let fault = err.device_error().unwrap();
    assert_eq!(fault.code, 8);
    assert_eq!(fault.message, "Could not home wavelength drive.");
}

#[tokio::test]
async fn test_unmapped_error_code_uses_generic_message() {
    let (mono, sim, _log) = scripted("mono-unmapped").await;

    sim.fail_next(5);
    let err = mono.abort().await.unwrap_err();
    assert_eq!(
        err.device_error().map(|e| e.message.as_str()),
        Some("Unknown error code: 5")
    );
}

#[tokio::test]
async fn test_out_of_range_arguments_never_write() {
    let (mono, _sim, log) = scripted("mono-range").await;
    let before = log.writes().len();

    for result in [
        mono.set_grating(3).await,
        mono.set_wavelength(-1).await,
        mono.set_wavelength(1601).await,
        mono.set_step(10_000).await,
        mono.set_filter(7).await,
    ] {
        assert!(
            matches!(result, Err(LabError::ArgumentOutOfRange { .. })),
            "{result:?}"
        );
    }

    assert_eq!(log.writes().len(), before);
}

#[tokio::test]
async fn test_shutter_round_trip() {
    let (mono, sim, _log) = scripted("mono-shutter").await;

    assert_eq!(mono.shutter().await.unwrap(), ShutterState::Closed);
    mono.open_shutter().await.unwrap();
    assert_eq!(sim.shutter(), ShutterState::Open);
    assert_eq!(mono.shutter().await.unwrap(), ShutterState::Open);
    mono.close_shutter().await.unwrap();
    assert_eq!(mono.shutter().await.unwrap(), ShutterState::Closed);
}

#[tokio::test]
async fn test_undecodable_payload_still_consumes_status() {
    let responder = |line: &[u8]| -> Vec<Vec<u8>> {
        match line {
            b"HANDSHAKE 0\n" => vec![b"HANDSHAKE 0".to_vec()],
            b"SHUTTER?\n" => vec![b"SHUTTER?".to_vec(), b"X".to_vec()],
            b"STEP?\n" => vec![b"STEP?".to_vec(), b"12".to_vec()],
            b"STB?\n" => vec![b"STB?".to_vec(), b"0".to_vec()],
            _ => Vec::new(),
        }
    };
    let transport = ScriptedTransport::new("mono-garbage", responder);
    let log = transport.log();
    let mono = Monochromator::open("mono", transport, READ_TIMEOUT)
        .await
        .unwrap();

    let err = mono.shutter().await.unwrap_err();
    assert!(matches!(err, LabError::Decode { field: "shutter", .. }), "{err}");

    // The next transaction lines up with its own response.
    assert_eq!(mono.step().await.unwrap(), 12);
    assert_eq!(
        log.writes(),
        ["HANDSHAKE 0\n", "STB?\n", "SHUTTER?\n", "STB?\n", "STEP?\n", "STB?\n"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out_without_retry() {
    let transport = ScriptedTransport::new("mono-silent", |_: &[u8]| Vec::<Vec<u8>>::new());
    let log = transport.log();

    let err = Monochromator::open("mono", transport, READ_TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(log.writes(), ["HANDSHAKE 0\n"]);
}

#[tokio::test(start_paused = true)]
async fn test_grating_change_holds_the_session_for_the_settle_window() {
    let (mono, sim, log) = scripted("mono-settle").await;
    let mono = Arc::new(mono);

    let changer = {
        let mono = Arc::clone(&mono);
        tokio::spawn(async move { mono.set_grating(2).await })
    };
    // Let the grating change take the session first.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let reader = {
        let mono = Arc::clone(&mono);
        tokio::spawn(async move { mono.wavelength().await })
    };

    changer.await.unwrap().unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), 500);
    assert_eq!(sim.grating(), 2);

    let events = log.events();
    let grat = events
        .iter()
        .position(|(_, e)| *e == WireEvent::Write("GRAT 2\n".into()))
        .unwrap();
    let (grat_at, _) = &events[grat];
    let (echo_at, echo) = &events[grat + 1];
    assert_eq!(*echo, WireEvent::Read("GRAT 2".into()));
    assert!(*echo_at - *grat_at >= Duration::from_secs(12));

    // Status exchange of the grating change completes before the queued query starts.
    assert_eq!(
        events[grat + 2..grat + 5]
            .iter()
            .map(|(_, e)| e.clone())
            .collect::<Vec<_>>(),
        [
            WireEvent::Write("STB?\n".into()),
            WireEvent::Read("STB?".into()),
            WireEvent::Read("0".into()),
        ]
    );
    assert_eq!(events[grat + 5].1, WireEvent::Write("WAVE?\n".into()));
    assert!(log.first_write("WAVE?").unwrap() >= *grat_at + Duration::from_secs(12));
}

#[tokio::test]
async fn test_configured_settle_window_is_used() {
    let (mono, _sim, _log) = scripted("mono-short-settle").await;
    let mono = mono.with_grating_settle(Duration::from_millis(5));
    assert_eq!(mono.grating_settle(), Duration::from_millis(5));

    mono.set_grating(2).await.unwrap();
    assert_eq!(mono.grating().await.unwrap(), 2);
}

#[tokio::test]
async fn test_status_and_error_queries() {
    let (mono, sim, log) = scripted("mono-status").await;

    assert_eq!(mono.status_byte().await.unwrap(), 0);
    sim.fail_next(6);
    // Abort itself surfaces the fault; read it again directly afterwards.
    let err = mono.abort().await.unwrap_err();
    assert_eq!(err.device_error().map(|e| e.code), Some(6));
    assert_eq!(mono.status_byte().await.unwrap(), 0);

    sim.fail_next(9);
    mono.session()
        .query_unclassified(&commands::abort())
        .await
        .unwrap();
    assert_eq!(mono.status_byte().await.unwrap(), 1);
    assert_eq!(
        mono.last_error().await.unwrap(),
        DeviceError::new(9, "Label too long.")
    );
    assert!(log.writes().ends_with(&["STB?\n".to_string(), "ERROR?\n".to_string()]));
}

#[tokio::test]
async fn test_info_and_filter() {
    let (mono, _sim, _log) = scripted("mono-info").await;

    assert!(mono.info().await.unwrap().starts_with("Cornerstone 130"));
    mono.set_filter(4).await.unwrap();
    assert_eq!(mono.filter().await.unwrap(), 4);
}

#[tokio::test]
async fn test_second_session_on_a_claimed_port_is_rejected() {
    let (host_a, _device_a) = tokio::io::duplex(64);
    let (host_b, _device_b) = tokio::io::duplex(64);
    let (host_c, _device_c) = tokio::io::duplex(64);

    let first = LineTransport::claimed("/dev/ttyMONO", host_a).unwrap();
    let err = LineTransport::claimed("/dev/ttyMONO", host_b).err().unwrap();
    assert!(matches!(err, LabError::Configuration(_)));

    drop(first);
    assert!(!PortClaim::is_claimed("/dev/ttyMONO"));
    assert!(LineTransport::claimed("/dev/ttyMONO", host_c).is_ok());
}

/// Device that answers `GRAT?` only after `delay`; everything else at once.
fn slow_grating_device(stream: tokio::io::DuplexStream, delay: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match stream.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = line.trim_end().to_string();
            let reply = match command.as_str() {
                "GRAT?" => {
                    tokio::time::sleep(delay).await;
                    format!("{command}\r\n2,1200,  500\r\n")
                }
                "STEP?" => format!("{command}\r\n12\r\n"),
                "STB?" => format!("{command}\r\n0\r\n"),
                _ => format!("{command}\r\n"),
            };
            if stream.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_is_never_decoded_as_the_next_value() {
    let (host, device) = tokio::io::duplex(256);
    let device_task = slow_grating_device(device, Duration::from_secs(3));
    let mono = Monochromator::open("mono", LineTransport::new("slow-mono", host), READ_TIMEOUT)
        .await
        .unwrap();

    let err = mono.grating().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");

    // The grating reply arrives while this query waits for its echo.
    let err = mono.step().await.unwrap_err();
    assert!(matches!(err, LabError::Protocol(_)), "{err}");

    // Let the device answer the abandoned query, then start clean.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mono.step().await.unwrap(), 12);

    mono.close().await;
    device_task.await.unwrap();
}

const CONFIGURED: &str = r#"
    [application]
    name = "bench"

    [[instruments]]
    id = "mono-a"
    kind = "monochromator"
    port = "/dev/ttyUSB0"
    grating_settle = "3s"
    read_timeout = "500ms"

    [[instruments]]
    id = "mono-b"
    kind = "monochromator"
    port = "/dev/ttyUSB1"
    enabled = false
"#;

#[tokio::test(start_paused = true)]
async fn test_configured_settle_window_reaches_the_instrument() {
    let config = LabConfig::from_toml_str(CONFIGURED).unwrap();
    let definition = config.instrument("mono-a").unwrap();

    let sim = SimulatedCornerstone::new();
    let transport = ScriptedTransport::new("mono-configured", sim.clone());
    let log = transport.log();
    let mono = Monochromator::open_configured(definition, transport)
        .await
        .unwrap();

    assert_eq!(mono.session().id(), "mono-a");
    assert_eq!(mono.grating_settle(), Duration::from_secs(3));
    assert_eq!(mono.session().read_timeout(), Duration::from_millis(500));

    mono.set_grating(2).await.unwrap();
    let grat_at = log.first_write("GRAT 2").unwrap();
    let status_at = log.events().into_iter().rev().find_map(|(at, e)| {
        (e == WireEvent::Write("STB?\n".into())).then_some(at)
    });
    assert!(status_at.unwrap() - grat_at >= Duration::from_secs(3));
    assert_eq!(sim.grating(), 2);
}

#[tokio::test]
async fn test_disabled_entry_is_not_opened() {
    let config = LabConfig::from_toml_str(CONFIGURED).unwrap();

    let disabled = config.instrument("mono-b").unwrap();
    let transport = ScriptedTransport::new("mono-disabled", SimulatedCornerstone::new());
    let log = transport.log();
    let err = Monochromator::open_configured(disabled, transport)
        .await
        .unwrap_err();
    assert!(matches!(err, LabError::Configuration(_)), "{err}");
    assert!(log.writes().is_empty());

    let enabled: Vec<_> = config.enabled_instruments().map(|i| i.id.as_str()).collect();
    assert_eq!(enabled, ["mono-a"]);
}
