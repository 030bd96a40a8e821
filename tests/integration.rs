//! End-to-end tests: codec → parser → dispatcher → queue over real and
//! in-memory transports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bcnp::controller::{CommandLimits, Controller, ControllerConfig};
use bcnp::dispatcher::{Dispatcher, DispatcherConfig};
use bcnp::prelude::*;
use bcnp::queue::QueueConfig;
use bcnp::schema;
use bcnp::telemetry::TelemetryAccumulator;
use bcnp::transport::{TcpConfig, UdpConfig};

fn wide_limits() -> CommandLimits {
    CommandLimits {
        vx_min: -10.0,
        vx_max: 10.0,
        omega_min: -10.0,
        omega_max: 10.0,
        duration_min: 1,
        duration_max: 60_000,
    }
}

fn drive_packet(cmds: &[DriveCmd]) -> Vec<u8> {
    let mut packet: TypedPacket<DriveCmd> = TypedPacket::new();
    for cmd in cmds {
        packet.push(*cmd);
    }
    encode_packet_to_vec(&packet).unwrap()
}

#[test]
fn full_receive_path_over_loopback() {
    let controller = Controller::new(ControllerConfig {
        limits: wide_limits(),
        ..ControllerConfig::default()
    })
    .unwrap();

    let (mut planner, mut robot) = LoopbackAdapter::pair();

    // Planner sends a two-command trajectory.
    assert!(planner.send_bytes(&drive_packet(&[
        DriveCmd::new(0.25, 0.0, 250),
        DriveCmd::new(-0.10, 0.35, 400),
    ])));

    // Robot drains the transport into the controller.
    let mut scratch = [0u8; 512];
    loop {
        let received = robot.receive_chunk(&mut scratch);
        if received == 0 {
            break;
        }
        controller.push_bytes(&scratch[..received]);
    }

    let mut now = Instant::now();
    let first = controller.current_command(now).expect("first command");
    assert_eq!(first.vx, 0.25);

    now += Duration::from_millis(250);
    controller.queue().notify_received(now);
    let second = controller.current_command(now).expect("second command");
    assert_eq!(second.omega, 0.35);

    now += Duration::from_millis(400);
    controller.queue().notify_received(now);
    assert!(controller.current_command(now).is_none());
}

#[test]
fn poll_driver_feeds_dispatcher() {
    let registry = Arc::new(schema::build_registry().unwrap());
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), registry));
    let queue = Arc::new(TimedQueue::<DriveCmd>::new(QueueConfig::default()));

    let handler_queue = Arc::clone(&queue);
    dispatcher.register::<DriveCmd, _>(move |view| {
        for cmd in view.messages::<DriveCmd>() {
            handler_queue.push(cmd);
        }
        handler_queue.notify_received(Instant::now());
    });

    let (near, far) = LoopbackAdapter::pair();
    let mut driver = PollDriver::new(dispatcher, near);
    let mut far = far;

    assert!(far.send_bytes(&drive_packet(&[DriveCmd::new(1.0, 0.0, 100)])));
    driver.poll_once();

    assert_eq!(queue.len(), 1);
    let now = Instant::now();
    queue.update(now);
    assert_eq!(queue.active_message().unwrap().vx, 1.0);
}

#[test]
fn telemetry_flows_back_to_planner() {
    let (mut robot_side, planner_side) = LoopbackAdapter::pair();

    // Robot batches drivetrain state at half the loop rate.
    let telemetry: TelemetryAccumulator<DrivetrainState> = TelemetryAccumulator::default();
    for t in 0..4u32 {
        telemetry.record(DrivetrainState {
            vx_actual: 0.5,
            omega_actual: 0.0,
            left_pos: t as f32,
            right_pos: t as f32,
            timestamp_ms: t * 20,
        });
        telemetry.maybe_flush(&mut robot_side);
    }

    // Planner decodes the batches through its own dispatcher.
    let registry = Arc::new(schema::build_registry().unwrap());
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), registry));
    let samples = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    dispatcher.register::<DrivetrainState, _>(move |view| {
        sink.lock().extend(view.messages::<DrivetrainState>());
    });

    let mut driver = PollDriver::new(dispatcher, planner_side);
    driver.poll_once();

    let samples = samples.lock();
    assert_eq!(samples.len(), 4);
    assert_eq!(samples[3].timestamp_ms, 60);
}

#[test]
fn mixed_types_route_to_their_queues() {
    let registry = Arc::new(schema::build_registry().unwrap());
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), registry));

    let drive: Arc<parking_lot::Mutex<Vec<DriveCmd>>> = Arc::default();
    let encoder: Arc<parking_lot::Mutex<Vec<EncoderData>>> = Arc::default();

    let drive_sink = Arc::clone(&drive);
    dispatcher.register::<DriveCmd, _>(move |view| {
        drive_sink.lock().extend(view.messages::<DriveCmd>());
    });
    let encoder_sink = Arc::clone(&encoder);
    dispatcher.register::<EncoderData, _>(move |view| {
        encoder_sink.lock().extend(view.messages::<EncoderData>());
    });

    let mut stream = drive_packet(&[DriveCmd::new(0.5, 0.0, 100)]);
    let mut enc_packet: TypedPacket<EncoderData> = TypedPacket::new();
    enc_packet.push(EncoderData {
        position: 1.5,
        velocity: 0.25,
        timestamp_ms: 42,
    });
    stream.extend_from_slice(&encode_packet_to_vec(&enc_packet).unwrap());
    stream.extend_from_slice(&drive_packet(&[DriveCmd::new(-0.5, 0.0, 100)]));

    dispatcher.push_bytes(&stream);

    assert_eq!(drive.lock().len(), 2);
    assert_eq!(encoder.lock().len(), 1);
    assert_eq!(encoder.lock()[0].timestamp_ms, 42);
    assert_eq!(dispatcher.parse_error_count(), 0);
}

#[test]
fn disconnect_stops_commands_within_timeout() {
    let controller = Controller::new(ControllerConfig {
        limits: wide_limits(),
        queue: QueueConfig {
            connection_timeout: Duration::from_millis(50),
            ..QueueConfig::default()
        },
        ..ControllerConfig::default()
    })
    .unwrap();

    controller.push_bytes(&drive_packet(&[DriveCmd::new(1.0, 0.0, 60_000)]));
    let now = Instant::now();
    assert!(controller.current_command(now).is_some());

    // Link goes silent: the long-running command must be dropped.
    let later = now + Duration::from_millis(120);
    assert!(controller.current_command(later).is_none());
    assert_eq!(controller.queue().len(), 0);
    assert!(!controller.is_connected(later));
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

fn tcp_pair(schema_server: SchemaHash, schema_client: SchemaHash) -> (TcpAdapter, TcpAdapter) {
    let server = TcpAdapter::server(
        "127.0.0.1:0".parse().unwrap(),
        schema_server,
        TcpConfig::default(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    let client = TcpAdapter::client(addr, schema_client, TcpConfig::default()).unwrap();
    (server, client)
}

/// Poll both ends until `done` or the deadline passes.
fn pump(
    server: &mut TcpAdapter,
    client: &mut TcpAdapter,
    done: impl Fn(&TcpAdapter, &TcpAdapter) -> bool,
) {
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let _ = server.receive_chunk(&mut buf);
        let _ = client.receive_chunk(&mut buf);
        if done(server, client) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("tcp pump timed out");
}

#[test]
fn tcp_handshake_and_data_transfer() {
    let hash = SchemaHash(0x5EED_1234);
    let (mut server, mut client) = tcp_pair(hash, hash);

    // Pump until both sides validate the schema handshake.
    pump(&mut server, &mut client, |s, c| {
        s.is_handshake_complete() && c.is_handshake_complete()
    });

    assert_eq!(server.remote_schema_hash(), Some(hash));
    assert_eq!(client.remote_schema_hash(), Some(hash));

    // Application bytes flow after the handshake.
    let payload = drive_packet(&[DriveCmd::new(0.5, -1.0, 1500)]);
    assert!(client.send_bytes(&payload));

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < payload.len() && Instant::now() < deadline {
        let n = server.receive_chunk(&mut buf);
        received.extend_from_slice(&buf[..n]);
        let _ = client.receive_chunk(&mut buf);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(received, payload);
}

#[test]
fn tcp_schema_mismatch_blocks_application_traffic() {
    let (mut server, mut client) = tcp_pair(SchemaHash(1), SchemaHash(2));

    pump(&mut server, &mut client, |s, c| {
        s.remote_schema_hash().is_some() && c.remote_schema_hash().is_some()
    });

    assert!(!server.is_handshake_complete());
    assert!(!client.is_handshake_complete());
}

#[test]
fn tcp_server_reaps_zombie_client() {
    let hash = SchemaHash(7);
    let mut server = TcpAdapter::server(
        "127.0.0.1:0".parse().unwrap(),
        hash,
        TcpConfig {
            server_client_timeout: Duration::from_millis(100),
            ..TcpConfig::default()
        },
    )
    .unwrap();
    let addr = server.local_addr().unwrap();

    let mut first = TcpAdapter::client(addr, hash, TcpConfig::default()).unwrap();
    pump(&mut server, &mut first, |s, c| s.is_connected() && c.is_connected());

    // First client goes silent; the server must reap it and accept a
    // replacement.
    std::thread::sleep(Duration::from_millis(150));
    let mut buf = [0u8; 256];
    let _ = server.receive_chunk(&mut buf);
    assert!(!server.is_connected());

    let mut second = TcpAdapter::client(addr, hash, TcpConfig::default()).unwrap();
    pump(&mut server, &mut second, |s, c| s.is_connected() && c.is_connected());
    assert!(server.is_connected());
}

#[test]
fn tcp_client_reconnects_after_server_restart() {
    let hash = SchemaHash(9);
    let server = TcpAdapter::server(
        "127.0.0.1:0".parse().unwrap(),
        hash,
        TcpConfig::default(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpAdapter::client(
        addr,
        hash,
        TcpConfig {
            reconnect_interval: Duration::from_millis(50),
            ..TcpConfig::default()
        },
    )
    .unwrap();

    {
        let mut server = server;
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + Duration::from_secs(5);
        while !(server.is_connected() && client.is_connected()) && Instant::now() < deadline {
            let _ = server.receive_chunk(&mut buf);
            let _ = client.receive_chunk(&mut buf);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(client.is_connected());
        // Server dropped here.
    }

    // Restart the listener on the same port; the client must find it.
    let mut server = TcpAdapter::server(addr, hash, TcpConfig::default()).unwrap();
    let mut buf = [0u8; 256];
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut reconnected = false;
    while Instant::now() < deadline {
        let _ = server.receive_chunk(&mut buf);
        let _ = client.receive_chunk(&mut buf);
        let _ = client.send_bytes(&[0x00]);
        if server.is_connected() && client.is_connected() {
            reconnected = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(reconnected, "client failed to reconnect");
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

#[test]
fn udp_pairing_gates_dispatch() {
    let hash = SchemaHash(0xFEED_BEEF);
    let mut robot = UdpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        None,
        hash,
        UdpConfig::default(),
    )
    .unwrap();
    let robot_addr = robot.local_addr().unwrap();

    let mut planner = UdpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        Some(robot_addr),
        hash,
        UdpConfig::default(),
    )
    .unwrap();

    let registry = Arc::new(schema::build_registry().unwrap());
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), registry));
    let count = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let sink = Arc::clone(&count);
    dispatcher.register::<DriveCmd, _>(move |view| {
        sink.fetch_add(u64::from(view.header.message_count), std::sync::atomic::Ordering::Relaxed);
    });

    // Unpaired data must never reach the dispatcher.
    assert!(planner.send_bytes(&drive_packet(&[DriveCmd::new(0.1, 0.0, 100)])));
    std::thread::sleep(Duration::from_millis(20));
    let mut buf = [0u8; 512];
    for _ in 0..10 {
        let n = robot.receive_chunk(&mut buf);
        assert_eq!(n, 0);
    }

    // Pair, then the same packet flows through.
    assert!(planner.send_pairing());
    let deadline = Instant::now() + Duration::from_secs(2);
    while !robot.is_paired() && Instant::now() < deadline {
        let _ = robot.receive_chunk(&mut buf);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(robot.is_paired());

    assert!(planner.send_bytes(&drive_packet(&[DriveCmd::new(0.2, 0.0, 100)])));
    let deadline = Instant::now() + Duration::from_secs(2);
    while count.load(std::sync::atomic::Ordering::Relaxed) == 0 && Instant::now() < deadline {
        let n = robot.receive_chunk(&mut buf);
        if n > 0 {
            dispatcher.push_bytes(&buf[..n]);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(count.load(std::sync::atomic::Ordering::Relaxed), 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn receive_thread_and_control_loop_share_the_queue() {
    let controller = Arc::new(
        Controller::new(ControllerConfig {
            limits: wide_limits(),
            queue: QueueConfig {
                connection_timeout: Duration::from_secs(10),
                ..QueueConfig::default()
            },
            ..ControllerConfig::default()
        })
        .unwrap(),
    );

    let rx_controller = Arc::clone(&controller);
    let rx_thread = std::thread::spawn(move || {
        for i in 0..100u16 {
            rx_controller.push_bytes(&drive_packet(&[DriveCmd::new(0.01, 0.0, i % 7 + 1)]));
        }
    });

    // Control loop polls concurrently; try-lock means it may see None under
    // contention, which must not panic or block.
    for _ in 0..200 {
        let _ = controller.current_command(Instant::now());
        std::hint::spin_loop();
    }

    rx_thread.join().unwrap();
    let metrics = controller.queue().metrics();
    assert_eq!(
        metrics.messages_received + metrics.queue_overflows,
        100,
        "every push was either accepted or counted as overflow"
    );
}
