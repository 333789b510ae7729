//! 프로세스 내 연결 쌍
//!
//! 무손실, 순서 보장. 테스트와 임베딩용.
//! `MemoryLink`로 RTT, 연결 끊김, 연결 거부를 흉내낼 수 있음.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::trace;

use crate::connection::Connection;
use crate::stats::ConnectionStats;
use crate::{Error, Result};

/// 양쪽 끝이 공유하는 링크 상태
#[derive(Debug)]
struct LinkState {
    rtt: Duration,
    up: bool,
    refuse: bool,
}

/// 링크 제어 핸들
#[derive(Debug, Clone)]
pub struct MemoryLink {
    state: Arc<RwLock<LinkState>>,
}

impl MemoryLink {
    /// 보고되는 RTT 설정
    pub fn set_rtt(&self, rtt: Duration) {
        self.state.write().rtt = rtt;
    }

    /// 링크 끊기 (이후 전송은 버려짐)
    pub fn sever(&self) {
        self.state.write().up = false;
    }

    /// 링크 복구
    pub fn restore(&self) {
        self.state.write().up = true;
    }

    /// 클라이언트 연결 시도를 실패로 만듦
    pub fn refuse_connections(&self) {
        let mut state = self.state.write();
        state.refuse = true;
        state.up = false;
    }

    pub fn is_up(&self) -> bool {
        self.state.read().up
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Client,
    Server,
}

/// 메모리 연결의 한쪽 끝
#[derive(Debug)]
pub struct MemoryConnection {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    link: Arc<RwLock<LinkState>>,
    started: bool,
    mode: Mode,
    sent_packets: u64,
    received_packets: u64,
}

impl MemoryConnection {
    /// 연결된 한 쌍과 링크 제어 핸들 생성
    pub fn pair() -> (MemoryConnection, MemoryConnection, MemoryLink) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let link = Arc::new(RwLock::new(LinkState {
            rtt: Duration::ZERO,
            up: true,
            refuse: false,
        }));

        let a = Self::new(a_tx, a_rx, link.clone());
        let b = Self::new(b_tx, b_rx, link.clone());
        (a, b, MemoryLink { state: link })
    }

    fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        link: Arc<RwLock<LinkState>>,
    ) -> Self {
        Self {
            tx,
            rx,
            link,
            started: false,
            mode: Mode::Idle,
            sent_packets: 0,
            received_packets: 0,
        }
    }

    fn received(&mut self, packet: Bytes) -> Option<Bytes> {
        self.received_packets += 1;
        Some(packet)
    }
}

impl Connection for MemoryConnection {
    async fn start(&mut self, _port: u16) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr) {
        trace!("메모리 연결: {}", addr);
        self.mode = Mode::Client;
    }

    fn listen(&mut self) {
        self.mode = Mode::Server;
    }

    fn update(&mut self, _delta_time: f32) {}

    fn is_connected(&self) -> bool {
        self.started && self.mode != Mode::Idle && self.link.read().up
    }

    fn connect_failed(&self) -> bool {
        self.mode == Mode::Client && self.link.read().refuse
    }

    async fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        if !self.started {
            return Err(Error::NotStarted);
        }
        if !self.link.read().up {
            trace!("링크 끊김, 패킷 버림: {} bytes", payload.len());
            return Ok(());
        }
        self.tx
            .send(Bytes::copy_from_slice(payload))
            .map_err(|_| Error::ConnectionClosed)?;
        self.sent_packets += 1;
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        match self.rx.try_recv() {
            Ok(packet) => Ok(self.received(packet)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ConnectionClosed),
        }
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(packet)) => Ok(self.received(packet)),
            Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            rtt: self.link.read().rtt,
            sent_packets: self.sent_packets,
            acked_packets: self.sent_packets,
            received_packets: self.received_packets,
            ..Default::default()
        }
    }
}
