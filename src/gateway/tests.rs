//! End-to-end tests against the simulated device over TCP

use super::*;
use crate::device::ConnectionPhase;
use crate::error::TransportError;
use crate::simulator::{Simulator, SimulatorHandle};
use crate::state::Telemetry;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

const ZERO: Telemetry = Telemetry {
    voltage: 0.0,
    current: 0.0,
    power: 0.0,
};

fn ch(id: i64) -> Channel {
    Channel::new(id).unwrap()
}

fn config_for(addr: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        host: addr.ip().to_string(),
        port_device: addr.port(),
        poll_interval: 0.05,
        reply_timeout: Some(0.5),
        log_file: None,
        ..GatewayConfig::default()
    }
}

async fn start_device() -> SimulatorHandle {
    Simulator::new()
        .with_reply_delay(Duration::ZERO)
        .bind("127.0.0.1:0")
        .await
        .unwrap()
}

async fn connected_gateway(device: &SimulatorHandle) -> Gateway {
    let gateway = Gateway::new(config_for(device.local_addr()));
    timeout(Duration::from_secs(2), gateway.session().connect())
        .await
        .expect("device never accepted the connection");
    gateway
}

/// Scheduling slack allowed on top of one poll interval
const RECONNECT_MARGIN: Duration = Duration::from_millis(50);

type PhaseLog = Arc<parking_lot::Mutex<Vec<(ConnectionPhase, Instant)>>>;

/// Record every phase change with the time it happened
fn record_phases(gateway: &Gateway) -> PhaseLog {
    let phases: PhaseLog = Arc::default();
    let seen = Arc::clone(&phases);
    gateway
        .session()
        .subscribe_phase(Arc::new(move |phase| seen.lock().push((phase, Instant::now()))));
    phases
}

/// Wait until `check` holds, failing the test after a few seconds
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_power_on_sends_current_voltage_output_in_order() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    gateway.power_on(ch(2), 1.5, 12.0).await.unwrap();

    let sim = device.simulator().clone();
    eventually(|| sim.received().len() >= 3).await;
    assert_eq!(
        sim.received(),
        vec![
            ":SOURce2:CURRent 1.5",
            ":SOURce2:VOLTage 12.0",
            ":OUTPut2:STATe ON",
        ]
    );
}

#[tokio::test]
#[traced_test]
async fn test_control_log_lines() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    gateway.power_on(ch(2), 1.5, 12.0).await.unwrap();
    gateway.power_off(ch(2)).await.unwrap();

    assert!(logs_contain("[power_on] 2, 1.5, 12.0"));
    assert!(logs_contain("[send_cmd] :SOURce2:CURRent 1.5"));
    assert!(logs_contain("[send_cmd] :SOURce2:VOLTage 12.0"));
    assert!(logs_contain("[send_cmd] :OUTPut2:STATe ON"));
    assert!(logs_contain("[power_off] 2"));
    assert!(logs_contain("[send_cmd] :OUTPut2:STATe OFF"));
}

#[tokio::test]
async fn test_power_off_sends_single_command() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    gateway.power_off(ch(3)).await.unwrap();

    let sim = device.simulator().clone();
    eventually(|| !sim.received().is_empty()).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.received(), vec![":OUTPut3:STATe OFF"]);
}

#[tokio::test]
async fn test_invalid_setpoints_send_nothing() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    let err = gateway.power_on(ch(1), -1.0, 5.0).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    let err = gateway.power_on(ch(1), 1.0, f64::NAN).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    sleep(Duration::from_millis(50)).await;
    assert!(device.simulator().received().is_empty());
}

#[tokio::test]
async fn test_get_state_empty_before_first_poll() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    assert!(gateway.get_state().is_empty());
    assert!(device.simulator().received().is_empty());
}

#[tokio::test]
async fn test_power_on_then_off_reflected_in_state() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;
    let poller = gateway.poller();

    gateway.power_on(ch(2), 1.5, 12.0).await.unwrap();
    let snapshot = poller.poll_cycle().await.unwrap();
    let expected = Telemetry {
        voltage: 12.0,
        current: 1.5,
        power: 18.0,
    };
    assert_eq!(snapshot.get(ch(2)), Some(&expected));
    assert_eq!(gateway.get_state().get(ch(2)), Some(&expected));
    assert_eq!(gateway.get_state().get(ch(1)), Some(&ZERO));

    gateway.power_off(ch(2)).await.unwrap();
    poller.poll_cycle().await.unwrap();
    assert_eq!(gateway.get_state().get(ch(2)), Some(&ZERO));
}

#[tokio::test]
async fn test_poll_cycle_queries_channels_in_order() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;

    let snapshot = gateway.poller().poll_cycle().await.unwrap();
    assert_eq!(snapshot.channels.len(), 4);
    assert_eq!(
        device.simulator().received(),
        vec![
            ":MEASure1:ALL?",
            ":MEASure2:ALL?",
            ":MEASure3:ALL?",
            ":MEASure4:ALL?",
        ]
    );
}

#[tokio::test]
async fn test_concurrent_control_and_polling_never_interleave() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;
    let poller = gateway.poller().spawn();

    let mut tasks = Vec::new();
    for round in 0..5u8 {
        for id in 1..=4i64 {
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(async move {
                gateway
                    .power_on(ch(id), f64::from(round), f64::from(id as u8))
                    .await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    sleep(Duration::from_millis(100)).await;
    poller.abort();

    let received = device.simulator().received();
    let mut triples = 0;
    for (i, line) in received.iter().enumerate() {
        if let Some(rest) = line.strip_prefix(":SOURce") {
            if let Some((id, _)) = rest.split_once(":CURRent ") {
                assert_eq!(
                    received[i + 1].split(' ').next(),
                    Some(format!(":SOURce{}:VOLTage", id).as_str()),
                    "unexpected line after {:?}",
                    line
                );
                assert_eq!(received[i + 2], format!(":OUTPut{}:STATe ON", id));
                triples += 1;
            }
        }
        assert!(
            line.starts_with(":MEASure")
                || line.starts_with(":SOURce")
                || line.starts_with(":OUTPut"),
            "malformed line {:?}",
            line
        );
    }
    assert_eq!(triples, 20);
    assert!(received.iter().any(|line| line.starts_with(":MEASure")));
}

#[tokio::test]
async fn test_polling_recovers_after_connection_drop() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;
    let poller = gateway.poller();
    let mut snapshots = poller.subscribe();
    let task = poller.spawn();

    timeout(Duration::from_secs(2), snapshots.recv())
        .await
        .unwrap()
        .unwrap();

    let phases = record_phases(&gateway);
    device.simulator().drop_clients();

    // The poller notices the closed stream and reconnects
    eventually(|| {
        let phases = phases.lock();
        phases.iter().any(|(phase, _)| *phase == ConnectionPhase::Disconnected)
            && phases.last().map(|(phase, _)| *phase) == Some(ConnectionPhase::Connected)
    })
    .await;

    let (lost_at, back_at) = {
        let phases = phases.lock();
        let lost_at = phases
            .iter()
            .find(|(phase, _)| *phase == ConnectionPhase::Disconnected)
            .map(|(_, at)| *at)
            .unwrap();
        (lost_at, phases.last().unwrap().1)
    };
    let interval = gateway.config().poll_interval();
    assert!(
        back_at - lost_at <= interval + RECONNECT_MARGIN,
        "reconnect took {:?}",
        back_at - lost_at
    );

    device.simulator().clear_received();
    let snapshot = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(snapshot) = snapshots.recv().await {
                if !device.simulator().received().is_empty() {
                    return snapshot;
                }
            }
        }
    })
    .await
    .expect("no snapshot after reconnect");
    assert_eq!(snapshot.channels.len(), 4);
    task.abort();
}

fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_connect_waits_for_device_to_appear() {
    let addr = unused_addr();
    let gateway = Gateway::new(config_for(addr));

    let session = Arc::clone(gateway.session());
    let connecting = tokio::spawn(async move { session.connect().await });

    sleep(Duration::from_millis(150)).await;
    assert!(!gateway.session().is_connected());

    let _device = Simulator::new()
        .with_reply_delay(Duration::ZERO)
        .bind(addr)
        .await
        .unwrap();

    timeout(Duration::from_secs(2), connecting)
        .await
        .expect("connect never completed")
        .unwrap();
    assert!(gateway.session().is_connected());
}

#[tokio::test]
async fn test_connected_within_one_interval_of_device_appearing() {
    let addr = unused_addr();
    let gateway = Gateway::new(GatewayConfig {
        poll_interval: 0.1,
        ..config_for(addr)
    });
    let phases = record_phases(&gateway);

    let session = Arc::clone(gateway.session());
    let connecting = tokio::spawn(async move { session.connect().await });

    // Let several attempts fail first
    sleep(Duration::from_millis(250)).await;
    assert!(!gateway.session().is_connected());

    let _device = Simulator::new()
        .with_reply_delay(Duration::ZERO)
        .bind(addr)
        .await
        .unwrap();
    let reachable_at = Instant::now();

    timeout(Duration::from_secs(2), connecting)
        .await
        .expect("connect never completed")
        .unwrap();

    let connected_at = phases
        .lock()
        .iter()
        .find(|(phase, _)| *phase == ConnectionPhase::Connected)
        .map(|(_, at)| *at)
        .expect("no connected phase");
    let elapsed = connected_at.saturating_duration_since(reachable_at);
    assert!(
        elapsed <= gateway.config().poll_interval() + RECONNECT_MARGIN,
        "connected {:?} after the device appeared",
        elapsed
    );
}

#[tokio::test]
async fn test_faulty_channel_aborts_cycle_without_snapshot() {
    let device = start_device().await;
    let gateway = connected_gateway(&device).await;
    device.simulator().set_fault(3, true);

    let err = gateway.poller().poll_cycle().await.unwrap_err();
    assert!(matches!(err, GatewayError::Protocol { .. }));

    // Channels read before the failure are kept, later ones are not
    let state = gateway.get_state();
    assert!(state.get(ch(1)).is_some());
    assert!(state.get(ch(2)).is_some());
    assert!(state.get(ch(3)).is_none());
    assert!(state.get(ch(4)).is_none());
}

#[tokio::test]
async fn test_polling_resumes_after_fault_cleared() {
    let device = start_device().await;
    device.simulator().set_fault(1, true);
    let gateway = connected_gateway(&device).await;
    let poller = gateway.poller();
    let mut snapshots = poller.subscribe();
    let task = poller.spawn();

    let none = timeout(Duration::from_millis(300), snapshots.recv()).await;
    assert!(none.is_err(), "a faulty cycle must not emit a snapshot");

    device.simulator().set_fault(1, false);
    let snapshot = timeout(Duration::from_secs(3), snapshots.recv())
        .await
        .expect("polling never recovered")
        .unwrap();
    assert_eq!(snapshot.channels.len(), 4);
    task.abort();
}

#[tokio::test]
async fn test_control_while_disconnected_fails_explicitly() {
    let device = start_device().await;
    let gateway = Gateway::new(config_for(device.local_addr()));

    let err = gateway.power_on(ch(1), 1.0, 5.0).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Transport(TransportError::NotConnected)
    ));
    let err = gateway.power_off(ch(1)).await.unwrap_err();
    assert!(err.is_transport());
    assert!(device.simulator().received().is_empty());
}
