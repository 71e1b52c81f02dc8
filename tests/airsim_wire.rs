use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use drone_teleop::config::VehicleSettings;
use drone_teleop::{AirSimSession, VehicleSession};

/// Answers every request the way AirSim would and records every message.
fn fake_airsim(listener: TcpListener, tx: mpsc::Sender<Vec<Value>>) {
    let (mut stream, _) = listener.accept().expect("accept");
    let mut seen = Vec::new();
    while let Ok(message) = rmp_serde::from_read::<_, Value>(&mut stream) {
        if message[0].as_u64() == Some(0) {
            let id = message[1].as_u64().expect("msgid");
            let result = match message[2].as_str() {
                Some("ping") | Some("armDisarm") | Some("takeoff") | Some("land")
                | Some("moveToPosition") => json!(true),
                Some("simGetImages") => json!([{
                    "image_data_uint8": [0, 0, 255, 255, 0, 0],
                    "width": 2,
                    "height": 1,
                    "camera_name": "front_center"
                }]),
                _ => Value::Null,
            };
            reply(&mut stream, id, result);
        }
        seen.push(message);
    }
    tx.send(seen).expect("report messages");
}

fn reply(stream: &mut TcpStream, id: u64, result: Value) {
    let bytes = rmp_serde::to_vec(&(1u8, id, (), result)).expect("encode response");
    std::io::Write::write_all(stream, &bytes).expect("send response");
}

fn settings(addr: String) -> VehicleSettings {
    VehicleSettings {
        address: addr,
        name: String::new(),
        rpc_timeout: Duration::from_secs(5),
    }
}

#[test]
fn motion_commands_are_notifications_and_setup_calls_are_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let (tx, rx) = mpsc::channel();
    let server = thread::spawn(move || fake_airsim(listener, tx));

    {
        let mut session = AirSimSession::connect(&settings(addr)).expect("connect");
        session.takeoff().expect("takeoff");
        session
            .move_to_altitude(5.0, 5.0, Duration::from_secs(10))
            .expect("climb");
        let frame = session.capture_frame("front_center").expect("capture").expect("frame");
        assert_eq!((frame.width(), frame.height()), (2, 1));
        assert_eq!(frame.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(frame.pixel(1, 0), Some([0, 0, 255]));
        session
            .move_velocity_body(5.0, 0.0, 0.0, Duration::from_millis(500))
            .expect("move");
        session
            .rotate_yaw_rate(30.0, Duration::from_millis(500))
            .expect("rotate");
        session.land().expect("land");
        session.disarm().expect("disarm");
        session.release_control().expect("release");
    }

    let seen = rx.recv_timeout(Duration::from_secs(10)).expect("server report");
    server.join().expect("server thread");

    let summary: Vec<(u64, String)> = seen
        .iter()
        .map(|m| {
            let kind = m[0].as_u64().unwrap();
            let method = if kind == 2 { &m[1] } else { &m[2] };
            (kind, method.as_str().unwrap().to_string())
        })
        .collect();
    let expected: Vec<(u64, &str)> = vec![
        (0, "ping"),
        (0, "enableApiControl"),
        (0, "armDisarm"),
        (0, "takeoff"),
        (0, "moveToPosition"),
        (0, "simGetImages"),
        (2, "moveByVelocityBodyFrame"),
        (2, "rotateByYawRate"),
        (0, "land"),
        (0, "armDisarm"),
        (0, "enableApiControl"),
    ];
    assert_eq!(
        summary,
        expected
            .into_iter()
            .map(|(k, m)| (k, m.to_string()))
            .collect::<Vec<_>>()
    );

    let velocity = &seen[6][2];
    assert_eq!(velocity[0].as_f64(), Some(5.0));
    assert_eq!(velocity[3].as_f64(), Some(0.5));
    assert_eq!(velocity[5]["is_rate"], json!(true));
    assert_eq!(seen[4][3][2].as_f64(), Some(-5.0));
}

#[test]
fn refused_connection_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let err = AirSimSession::connect(&VehicleSettings {
        rpc_timeout: Duration::from_millis(500),
        ..settings(addr)
    })
    .err()
    .expect("nothing is listening");
    assert!(drone_teleop::is_connection_error(&err));
}
