//! 고정 타임스텝 드라이버
//!
//! 한 틱의 처리 순서:
//! 1. 연결 중이면 RTT로 흐름 제어 갱신
//! 2. 연결 상태 변화 감지 (끊기면 흐름 제어 초기화)
//! 3. 클라이언트: 파일 1회 전송 / 서버: 수신 세션 대기
//! 4. 전송률에 맞춰 heartbeat 전송
//! 5. 클라이언트는 남은 패킷 비우기, 연결 갱신, 주기적 통계 출력

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::checksum::file_checksum_with_block;
use crate::connection::Connection;
use crate::flow::FlowController;
use crate::receiver::FileReceiver;
use crate::sender::FileSender;
use crate::stats::{SendReport, TransferReport};
use crate::{Config, Error, Result};

/// 노드 역할
#[derive(Debug, Clone)]
pub enum Role {
    /// 서버에 연결해 파일 하나를 전송
    Client { server: SocketAddr, file: PathBuf },
    /// 접속을 기다리며 받은 파일을 `output_dir`에 기록
    Server { output_dir: PathBuf },
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server { .. })
    }
}

/// 틱 처리 중 발생한 사건
#[derive(Debug)]
pub enum NodeEvent {
    Connected,
    Disconnected,
    FileSent(SendReport),
    FileReceived(TransferReport),
    /// 수신 세션 중단 (노드는 계속 동작)
    ReceiveFailed(Error),
}

/// 드라이버 노드
pub struct Node<C: Connection> {
    config: Config,
    role: Role,
    connection: C,
    flow: FlowController,
    sender: FileSender,
    receiver: Option<FileReceiver>,
    heartbeat: Bytes,
    connected: bool,
    file_sent: bool,
    send_accumulator: f32,
    stats_accumulator: f32,
}

impl<C: Connection> Node<C> {
    pub fn new(config: Config, role: Role, connection: C) -> Self {
        let receiver = match &role {
            Role::Server { output_dir } => Some(FileReceiver::new(&config, output_dir.clone())),
            Role::Client { .. } => None,
        };

        Self {
            flow: FlowController::new(&config),
            sender: FileSender::new(&config),
            heartbeat: Bytes::from(vec![0u8; config.heartbeat_packet_size]),
            config,
            role,
            connection,
            receiver,
            connected: false,
            file_sent: false,
            send_accumulator: 0.0,
            stats_accumulator: 0.0,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 포트를 열고 연결 시작 (클라이언트는 connect, 서버는 listen)
    pub async fn start(&mut self) -> Result<()> {
        match &self.role {
            Role::Client { server, .. } => {
                let server = *server;
                self.connection.start(self.config.client_port).await?;
                info!(
                    "클라이언트 시작: 포트 {}, 서버 {}에 연결 시도",
                    self.config.client_port, server
                );
                self.connection.connect(server);
            }
            Role::Server { output_dir } => {
                self.connection.start(self.config.server_port).await?;
                info!(
                    "서버 대기: 포트 {}, 저장 위치 {:?}",
                    self.config.server_port, output_dir
                );
                self.connection.listen();
            }
        }
        Ok(())
    }

    /// 한 틱 처리
    ///
    /// 연결 실패는 `Error::ConnectFailed`. 수신 세션 실패는 이벤트로 보고하고 계속 진행.
    pub async fn tick(&mut self) -> Result<Vec<NodeEvent>> {
        let delta_time = self.config.delta_time;
        let mut events = Vec::new();

        if self.connection.is_connected() {
            let rtt_ms = self.connection.stats().rtt_ms();
            self.flow.update(delta_time, rtt_ms);
        }

        let now_connected = self.connection.is_connected();
        if self.connected && !now_connected {
            info!("연결 끊김, 흐름 제어 초기화");
            self.flow.reset();
            self.connected = false;
            events.push(NodeEvent::Disconnected);
        }
        if !self.connected && now_connected {
            info!("연결됨");
            self.connected = true;
            events.push(NodeEvent::Connected);
        }
        if !self.connected && self.connection.connect_failed() {
            error!("연결 실패");
            return Err(Error::ConnectFailed);
        }

        let pending_file = match &self.role {
            Role::Client { file, .. } if !self.file_sent => Some(file.clone()),
            _ => None,
        };
        if let Some(file) = pending_file {
            let report = self.sender.send_file(&file, &mut self.connection).await?;
            self.file_sent = true;
            if self.config.log_checksums {
                log_checksum(&file, self.config.checksum_block_size).await;
            }
            events.push(NodeEvent::FileSent(report));
        } else if self.role.is_server() {
            if let Some(event) = self.receive().await? {
                events.push(event);
            }
        }

        self.send_heartbeats().await?;

        // 서버에서는 수신자가 유일한 소비자
        if !self.role.is_server() {
            while self.connection.try_receive()?.is_some() {}
        }

        self.connection.update(delta_time);

        self.stats_accumulator += delta_time;
        while self.stats_accumulator >= self.config.stats_interval {
            if self.connection.is_connected() {
                debug!("{}", self.connection.stats().summary());
            }
            self.stats_accumulator -= self.config.stats_interval;
        }

        Ok(events)
    }

    /// `shutdown`이 완료되거나 치명적 에러가 날 때까지 틱 반복
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("종료");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            // 이벤트는 각 단계에서 이미 로그로 남김
            self.tick().await?;
        }
    }

    async fn receive(&mut self) -> Result<Option<NodeEvent>> {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(None);
        };

        match receiver.accept(&mut self.connection, self.config.tick()).await {
            Ok(Some(report)) => {
                if self.config.log_checksums {
                    if let Some(path) = &report.path {
                        log_checksum(path, self.config.checksum_block_size).await;
                    }
                }
                Ok(Some(NodeEvent::FileReceived(report)))
            }
            Ok(None) => Ok(None),
            Err(e @ (Error::DestinationOpen { .. } | Error::Timeout { .. } | Error::Io(_))) => {
                warn!("수신 세션 중단: {}", e);
                Ok(Some(NodeEvent::ReceiveFailed(e)))
            }
            Err(e) => Err(e),
        }
    }

    async fn send_heartbeats(&mut self) -> Result<()> {
        let interval = 1.0 / self.flow.send_rate();
        self.send_accumulator += self.config.delta_time;
        while self.send_accumulator > interval {
            self.connection.send_packet(&self.heartbeat).await?;
            self.send_accumulator -= interval;
        }
        Ok(())
    }
}

async fn log_checksum(path: &Path, block_size: usize) {
    match file_checksum_with_block(path, block_size).await {
        Ok(crc) => info!("CRC-32 {:?}: {:08X}", path, crc),
        Err(e) => warn!("체크섬 계산 실패: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::flow::FlowMode;
    use crate::memory::MemoryConnection;

    fn server_addr() -> SocketAddr {
        "127.0.0.1:30000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_transfer_through_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hello over ticks").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let (a, b, _link) = MemoryConnection::pair();
        let config = Config::default();
        let mut client = Node::new(
            config.clone(),
            Role::Client {
                server: server_addr(),
                file: source.clone(),
            },
            a,
        );
        let mut server = Node::new(config, Role::Server { output_dir: out.clone() }, b);
        client.start().await.unwrap();
        server.start().await.unwrap();

        let events = client.tick().await.unwrap();
        assert!(events.iter().any(|e| matches!(e, NodeEvent::FileSent(_))));

        let events = server.tick().await.unwrap();
        let report = events
            .into_iter()
            .find_map(|e| match e {
                NodeEvent::FileReceived(report) => Some(report),
                _ => None,
            })
            .expect("file received");
        assert_eq!(report.filename, "notes.txt");
        assert_eq!(report.bytes_written, 16);
        assert_eq!(std::fs::read(out.join("notes.txt")).unwrap(), b"hello over ticks");

        // 두 번째 틱에서는 다시 보내지 않음
        let events = client.tick().await.unwrap();
        assert!(!events.iter().any(|e| matches!(e, NodeEvent::FileSent(_))));
    }

    #[tokio::test]
    async fn test_frames_queued_outside_accept_window_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.csv");
        std::fs::write(&source, b"hello,world!").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let (mut a, b, _link) = MemoryConnection::pair();
        a.start(30001).await.unwrap();
        a.connect(server_addr());

        // 수신 대기 구간 0: 틱 사이에 도착한 프레임만 존재
        let config = Config {
            delta_time: 0.0,
            ..Config::default()
        };
        let mut server = Node::new(config, Role::Server { output_dir: out.clone() }, b);
        server.start().await.unwrap();
        server.tick().await.unwrap();

        FileSender::default().send_file(&source, &mut a).await.unwrap();

        let mut received = None;
        for _ in 0..5 {
            for event in server.tick().await.unwrap() {
                if let NodeEvent::FileReceived(report) = event {
                    received = Some(report);
                }
            }
        }

        let report = received.expect("file received");
        assert_eq!(report.bytes_written, 12);
        assert_eq!(report.path, Some(out.join("report.csv")));
        assert_eq!(std::fs::read(out.join("report.csv")).unwrap(), b"hello,world!");
    }

    #[tokio::test]
    async fn test_flow_reset_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (_a, b, link) = MemoryConnection::pair();
        let config = Config {
            initial_penalty: 0.01,
            ..Config::default()
        };
        let mut server = Node::new(
            config,
            Role::Server {
                output_dir: dir.path().to_path_buf(),
            },
            b,
        );
        server.start().await.unwrap();

        let events = server.tick().await.unwrap();
        assert!(matches!(events.first(), Some(NodeEvent::Connected)));
        assert_eq!(server.flow().mode(), FlowMode::Responsive);

        link.set_rtt(Duration::from_millis(300));
        server.tick().await.unwrap();
        assert_eq!(server.flow().mode(), FlowMode::Throttled);
        assert_eq!(server.flow().penalty(), 0.02);

        link.sever();
        let events = server.tick().await.unwrap();
        assert!(matches!(events.first(), Some(NodeEvent::Disconnected)));
        assert_eq!(server.flow().mode(), FlowMode::Throttled);
        assert_eq!(server.flow().penalty(), 0.01);
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_stops_client() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        std::fs::write(&source, b"x").unwrap();

        let (a, _b, link) = MemoryConnection::pair();
        link.refuse_connections();
        let mut client = Node::new(
            Config::default(),
            Role::Client {
                server: server_addr(),
                file: source,
            },
            a,
        );
        client.start().await.unwrap();

        assert!(matches!(client.tick().await, Err(Error::ConnectFailed)));
    }

    #[tokio::test]
    async fn test_missing_output_dir_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        std::fs::write(&source, b"abc").unwrap();

        let (a, b, _link) = MemoryConnection::pair();
        let mut client = Node::new(
            Config::default(),
            Role::Client {
                server: server_addr(),
                file: source,
            },
            a,
        );
        let mut server = Node::new(
            Config::default(),
            Role::Server {
                output_dir: dir.path().join("missing"),
            },
            b,
        );
        client.start().await.unwrap();
        server.start().await.unwrap();

        client.tick().await.unwrap();
        let events = server.tick().await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, NodeEvent::ReceiveFailed(Error::DestinationOpen { .. }))));
    }
}
