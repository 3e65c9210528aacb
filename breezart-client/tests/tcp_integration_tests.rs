//! End-to-end tests over real TCP against the controller simulator

use std::sync::Arc;
use std::time::Duration;

use breezart_client::{
    ControllerSimulator, DeviceClient, LineCodec, Request, Response, SessionManager,
    SessionState, TcpConnector,
};
use breezart_core::{
    Ack, BreezartError, ConnectionConfig, DeviceConfig, Lifecycle, UnitState, UnitStatus,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn start_simulator(speed_min: u32, speed_max: u32) -> (ControllerSimulator, DeviceConfig) {
    let sim = ControllerSimulator::new("7531", speed_min, speed_max);
    let (addr, _server) = sim.bind("127.0.0.1:0").await.unwrap();

    let mut config = DeviceConfig::new("127.0.0.1", "7531", speed_min, speed_max);
    config.port = addr.port();
    config.timeout_ms = 500;
    (sim, config)
}

#[tokio::test]
async fn per_operation_round_trip_over_tcp() {
    let (sim, config) = start_simulator(1, 6).await;
    let client = DeviceClient::new(config.with_lifecycle(Lifecycle::PerOperation)).unwrap();

    let properties = client.get_properties().await.unwrap();
    assert_eq!((properties.speed_min, properties.speed_max), (1, 6));
    assert_eq!(properties.firmware.as_deref(), Some("SIM-1.0"));

    assert_eq!(client.set_power(true).await.unwrap(), Ack::Applied);
    assert_eq!(client.set_rotation_speed(50).await.unwrap(), Ack::Applied);

    let status = client.get_status().await.unwrap();
    assert!(status.power);
    assert_eq!(status.speed_step, 4);
    assert_eq!(status.speed_percent, 60);
    assert_eq!(sim.unit_state().await, UnitState(1));

    assert_eq!(client.session().state(), SessionState::Disconnected);
}

#[tokio::test]
async fn long_lived_session_over_tcp() {
    let (sim, config) = start_simulator(1, 10).await;
    let client = DeviceClient::new(config).unwrap();

    client.start().await;
    timeout(Duration::from_secs(5), client.session().await_ready())
        .await
        .expect("session did not become ready");

    assert_eq!(client.set_rotation_speed(0).await.unwrap(), Ack::Applied);
    assert_eq!(sim.speed_step().await, 1);

    assert_eq!(client.set_power(false).await.unwrap(), Ack::Applied);
    let status = client.get_status().await.unwrap();
    assert!(!status.power);
    assert_eq!(status.speed_percent, 0);

    client.disconnect().await;
    assert_eq!(client.session().state(), SessionState::Disconnected);
}

#[tokio::test]
async fn per_operation_wrong_password_over_tcp() {
    let (_sim, mut config) = start_simulator(1, 6).await;
    config.password = "0000".to_string();
    let client = DeviceClient::new(config.with_lifecycle(Lifecycle::PerOperation)).unwrap();

    assert!(matches!(
        client.get_status().await,
        Err(BreezartError::Authentication(_))
    ));
}

#[tokio::test]
async fn unreachable_host_surfaces_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = DeviceConfig::new("127.0.0.1", "7531", 1, 6)
        .with_lifecycle(Lifecycle::PerOperation)
        .with_timeout_ms(500);
    config.port = port;
    let client = DeviceClient::new(config).unwrap();

    let result = client.get_status().await;
    assert!(matches!(
        result,
        Err(BreezartError::Connection(_)) | Err(BreezartError::Timeout(_))
    ));
}

/// Controller whose first status reply is preceded by an unrelated line.
/// Later connections answer normally with unit off at step 1.
async fn serve_out_of_step_controller(listener: TcpListener) {
    let mut connection = 0;
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let first = connection == 0;
        connection += 1;

        tokio::spawn(async move {
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with("VAuth") {
                    let _ = writer.write_all(b"VAuth_OK\r\n").await;
                } else if first {
                    let _ = writer.write_all(b"VXyz_1\r\n").await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = writer.write_all(b"VSt07_1_6\r\n").await;
                } else {
                    let _ = writer.write_all(b"VSt07_0_1\r\n").await;
                }
            }
        });
    }
}

#[tokio::test]
async fn late_reply_never_answers_next_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(serve_out_of_step_controller(listener));

    let session = SessionManager::new(
        Arc::new(TcpConnector::new(address)),
        Arc::new(LineCodec),
        ConnectionConfig::new("127.0.0.1", "7531"),
        Duration::from_millis(500),
    );
    session.connect().await.unwrap();

    let first = session.exchange(&Request::GetStatus).await;
    assert!(matches!(first, Err(BreezartError::Protocol(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert!(!session.has_transport().await);

    // Let the late status line land on the old socket
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        session.exchange(&Request::GetStatus).await,
        Err(BreezartError::NotReady)
    ));

    session.reset().await;
    session.connect().await.unwrap();
    let second = session.exchange(&Request::GetStatus).await.unwrap();
    assert_eq!(
        second,
        Response::Status(UnitStatus {
            unit_state: UnitState(0),
            speed_step: 1,
        })
    );

    session.disconnect().await;
    server.abort();
}
