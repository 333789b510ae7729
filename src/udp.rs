//! UDP 가상 연결
//!
//! - 프로토콜 ID 필터링
//! - 클라이언트: Connecting → Connected (서버 패킷 첫 수신) / ConnectFail (타임아웃)
//! - 서버: Listening → Connected (임의 피어의 첫 패킷) → 타임아웃 시 다시 Listening
//! - sequence/ack 헤더로 RTT, 손실, 대역폭을 측정만 함 (재전송 없음)
//!
//! 헤더 (16 bytes, LE): protocol_id | sequence | ack | ack_bits

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::stats::ConnectionStats;
use crate::{Config, Error, Result, MAX_FRAME_LEN};

/// 헤더 크기
pub const HEADER_LEN: usize = 16;

/// ack 없이 이 시간이 지나면 손실로 간주
const RTT_MAX: Duration = Duration::from_secs(1);

/// ack_bits 로 표현하는 이전 sequence 수
const ACK_WINDOW: u32 = 32;

/// RTT 평활 계수
const RTT_SMOOTHING: f32 = 0.1;

/// 대역폭 측정 구간
const BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);

/// 수신 버퍼의 페이로드 여유
const MAX_DATAGRAM_PAYLOAD: usize = 2 * MAX_FRAME_LEN;

/// wrap-around를 고려한 sequence 비교: `a`가 `b`보다 최신인지
fn sequence_more_recent(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < u32::MAX / 2
}

#[derive(Debug, Clone, Copy)]
struct PendingPacket {
    sequence: u32,
    sent_at: Instant,
    size: usize,
}

/// ack 기반 측정기
#[derive(Debug)]
struct AckTracker {
    local_sequence: u32,
    remote_sequence: Option<u32>,
    received: VecDeque<u32>,
    pending: VecDeque<PendingPacket>,
    sent_history: VecDeque<(Instant, usize)>,
    acked_history: VecDeque<(Instant, usize)>,
    rtt: f32,
    sent_packets: u64,
    acked_packets: u64,
    lost_packets: u64,
    received_packets: u64,
}

impl AckTracker {
    fn new() -> Self {
        Self {
            // 0은 "ack 없음"으로 예약
            local_sequence: 1,
            remote_sequence: None,
            received: VecDeque::with_capacity(ACK_WINDOW as usize + 1),
            pending: VecDeque::new(),
            sent_history: VecDeque::new(),
            acked_history: VecDeque::new(),
            rtt: 0.0,
            sent_packets: 0,
            acked_packets: 0,
            lost_packets: 0,
            received_packets: 0,
        }
    }

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.local_sequence;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        if self.local_sequence == 0 {
            self.local_sequence = 1;
        }
        sequence
    }

    fn on_sent(&mut self, sequence: u32, size: usize, now: Instant) {
        self.pending.push_back(PendingPacket {
            sequence,
            sent_at: now,
            size,
        });
        self.sent_history.push_back((now, size));
        self.sent_packets += 1;
    }

    fn on_received(&mut self, sequence: u32) {
        self.received_packets += 1;
        match self.remote_sequence {
            Some(remote) if !sequence_more_recent(sequence, remote) => {}
            _ => self.remote_sequence = Some(sequence),
        }

        if self.received.len() > ACK_WINDOW as usize {
            self.received.pop_front();
        }
        self.received.push_back(sequence);
    }

    /// 상대에게 보낼 (ack, ack_bits)
    fn ack_header(&self) -> (u32, u32) {
        let Some(ack) = self.remote_sequence else {
            return (0, 0);
        };

        let mut bits = 0u32;
        for &sequence in &self.received {
            if sequence_more_recent(ack, sequence) {
                let distance = ack.wrapping_sub(sequence) - 1;
                if distance < ACK_WINDOW {
                    bits |= 1 << distance;
                }
            }
        }
        (ack, bits)
    }

    fn is_acked(sequence: u32, ack: u32, ack_bits: u32) -> bool {
        if sequence == ack {
            return true;
        }
        if !sequence_more_recent(ack, sequence) {
            return false;
        }
        let distance = ack.wrapping_sub(sequence) - 1;
        distance < ACK_WINDOW && ack_bits & (1 << distance) != 0
    }

    fn on_acks(&mut self, ack: u32, ack_bits: u32, now: Instant) {
        if ack == 0 {
            return;
        }

        let mut still_pending = VecDeque::with_capacity(self.pending.len());
        for packet in self.pending.drain(..) {
            if Self::is_acked(packet.sequence, ack, ack_bits) {
                let sample = now.duration_since(packet.sent_at).as_secs_f32();
                self.rtt += (sample - self.rtt) * RTT_SMOOTHING;
                self.acked_packets += 1;
                self.acked_history.push_back((now, packet.size));
            } else {
                still_pending.push_back(packet);
            }
        }
        self.pending = still_pending;
    }

    fn update(&mut self, now: Instant) {
        while let Some(packet) = self.pending.front() {
            if now.duration_since(packet.sent_at) <= RTT_MAX {
                break;
            }
            self.pending.pop_front();
            self.lost_packets += 1;
        }

        for history in [&mut self.sent_history, &mut self.acked_history] {
            while let Some(&(at, _)) = history.front() {
                if now.duration_since(at) <= BANDWIDTH_WINDOW {
                    break;
                }
                history.pop_front();
            }
        }
    }

    fn stats(&self) -> ConnectionStats {
        let kbps = |history: &VecDeque<(Instant, usize)>| {
            let bytes: usize = history.iter().map(|&(_, size)| size).sum();
            bytes as f32 * 8.0 / 1000.0 / BANDWIDTH_WINDOW.as_secs_f32()
        };

        ConnectionStats {
            rtt: Duration::from_secs_f32(self.rtt.max(0.0)),
            sent_packets: self.sent_packets,
            acked_packets: self.acked_packets,
            lost_packets: self.lost_packets,
            received_packets: self.received_packets,
            sent_bandwidth_kbps: kbps(&self.sent_history),
            acked_bandwidth_kbps: kbps(&self.acked_history),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Listening,
    Connecting,
    ConnectFail,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    None,
    Client,
    Server,
}

/// UDP 가상 연결
#[derive(Debug)]
pub struct UdpConnection {
    protocol_id: u32,
    timeout: f32,
    socket: Option<UdpSocket>,
    state: State,
    mode: Mode,
    address: Option<SocketAddr>,
    timeout_accumulator: f32,
    tracker: AckTracker,
}

impl UdpConnection {
    pub fn new(config: &Config) -> Self {
        Self {
            protocol_id: config.protocol_id,
            timeout: config.connection_timeout,
            socket: None,
            state: State::Disconnected,
            mode: Mode::None,
            address: None,
            timeout_accumulator: 0.0,
            tracker: AckTracker::new(),
        }
    }

    /// 바인딩된 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
        Ok(socket.local_addr()?)
    }

    /// 현재 피어 주소
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.address
    }

    fn clear_data(&mut self) {
        self.timeout_accumulator = 0.0;
        self.tracker = AckTracker::new();
    }

    /// 수신 데이터그램 검사, 이 연결의 페이로드면 반환
    fn accept_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Option<Bytes> {
        if datagram.len() < HEADER_LEN {
            trace!("짧은 데이터그램 무시: {} bytes from {}", datagram.len(), from);
            return None;
        }

        let mut header = &datagram[..HEADER_LEN];
        let protocol_id = header.get_u32_le();
        if protocol_id != self.protocol_id {
            trace!("프로토콜 ID 불일치: {:08X} from {}", protocol_id, from);
            return None;
        }
        let sequence = header.get_u32_le();
        let ack = header.get_u32_le();
        let ack_bits = header.get_u32_le();

        if self.mode == Mode::Server && self.state != State::Connected {
            info!("클라이언트 연결: {}", from);
            self.clear_data();
            self.state = State::Connected;
            self.address = Some(from);
        }

        if self.address != Some(from) {
            return None;
        }

        if self.mode == Mode::Client && self.state == State::Connecting {
            info!("서버 연결 완료: {}", from);
            self.state = State::Connected;
        }

        self.timeout_accumulator = 0.0;
        self.tracker.on_received(sequence);
        self.tracker.on_acks(ack, ack_bits, Instant::now());

        Some(Bytes::copy_from_slice(&datagram[HEADER_LEN..]))
    }
}

impl Connection for UdpConnection {
    async fn start(&mut self, port: u16) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { port, source })?;
        info!("UDP 연결 시작: {}", socket.local_addr()?);
        self.socket = Some(socket);
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr) {
        info!("연결 시도: {}", addr);
        self.clear_data();
        self.mode = Mode::Client;
        self.state = State::Connecting;
        self.address = Some(addr);
    }

    fn listen(&mut self) {
        info!("접속 대기");
        self.clear_data();
        self.mode = Mode::Server;
        self.state = State::Listening;
        self.address = None;
    }

    fn update(&mut self, delta_time: f32) {
        self.tracker.update(Instant::now());
        self.timeout_accumulator += delta_time;

        if self.timeout_accumulator <= self.timeout {
            return;
        }

        match self.state {
            State::Connecting => {
                warn!("연결 실패: {:?} 응답 없음", self.address);
                self.state = State::ConnectFail;
            }
            State::Connected => {
                warn!("연결 타임아웃: {:?}", self.address);
                self.clear_data();
                if self.mode == Mode::Server {
                    self.state = State::Listening;
                    self.address = None;
                } else {
                    self.state = State::Disconnected;
                }
            }
            _ => {}
        }
    }

    fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    fn connect_failed(&self) -> bool {
        self.state == State::ConnectFail
    }

    async fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let Some(address) = self.address else {
            trace!("피어 없음, 패킷 버림: {} bytes", payload.len());
            return Ok(());
        };

        let sequence = self.tracker.next_sequence();
        let (ack, ack_bits) = self.tracker.ack_header();

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u32_le(self.protocol_id);
        buf.put_u32_le(sequence);
        buf.put_u32_le(ack);
        buf.put_u32_le(ack_bits);
        buf.put_slice(payload);

        let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
        socket.send_to(&buf, address).await?;
        self.tracker.on_sent(sequence, buf.len(), Instant::now());
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        let mut buf = [0u8; HEADER_LEN + MAX_DATAGRAM_PAYLOAD];
        loop {
            let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
            match socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    if let Some(payload) = self.accept_datagram(&buf[..len], from) {
                        return Ok(Some(payload));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!("ICMP 도달 불가 무시");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; HEADER_LEN + MAX_DATAGRAM_PAYLOAD];

        loop {
            let received = {
                let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
                tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
            };

            match received {
                Err(_) => return Ok(None),
                Ok(Ok((len, from))) => {
                    if let Some(payload) = self.accept_datagram(&buf[..len], from) {
                        return Ok(Some(payload));
                    }
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!("ICMP 도달 불가 무시");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn stats(&self) -> ConnectionStats {
        self.tracker.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_more_recent_wraps() {
        assert!(sequence_more_recent(2, 1));
        assert!(!sequence_more_recent(1, 2));
        assert!(!sequence_more_recent(5, 5));
        assert!(sequence_more_recent(3, u32::MAX - 2));
        assert!(!sequence_more_recent(u32::MAX - 2, 3));
    }

    #[test]
    fn test_ack_bits() {
        let mut tracker = AckTracker::new();
        assert_eq!(tracker.ack_header(), (0, 0));

        for sequence in [1, 2, 4, 6] {
            tracker.on_received(sequence);
        }
        // ack=6, 5는 없음, 4 → bit1, 2 → bit3, 1 → bit4
        assert_eq!(tracker.ack_header(), (6, 0b11010));

        // 늦게 도착한 5
        tracker.on_received(5);
        assert_eq!(tracker.ack_header(), (6, 0b11011));
    }

    #[test]
    fn test_acks_measure_rtt_and_loss() {
        let start = Instant::now();
        let mut tracker = AckTracker::new();

        for _ in 0..4 {
            let sequence = tracker.next_sequence();
            tracker.on_sent(sequence, 100, start);
        }
        // 4, 3, 1 ack, 2 누락
        tracker.on_acks(4, 0b101, start + Duration::from_millis(100));
        assert_eq!(tracker.acked_packets, 3);
        assert!(tracker.rtt > 0.0);

        tracker.update(start + Duration::from_millis(1500));
        assert_eq!(tracker.lost_packets, 1);
        assert!(tracker.pending.is_empty());

        let stats = tracker.stats();
        assert_eq!(stats.sent_packets, 4);
        assert_eq!(stats.acked_packets, 3);
        assert_eq!(stats.lost_packets, 1);
    }

    #[test]
    fn test_ack_zero_is_ignored() {
        let now = Instant::now();
        let mut tracker = AckTracker::new();
        let sequence = tracker.next_sequence();
        tracker.on_sent(sequence, 10, now);
        tracker.on_acks(0, u32::MAX, now);
        assert_eq!(tracker.acked_packets, 0);
    }

    #[test]
    fn test_connect_timeout() {
        let mut connection = UdpConnection::new(&Config::default());
        connection.connect("127.0.0.1:9".parse().unwrap());
        connection.update(5.0);
        assert!(!connection.connect_failed());
        connection.update(5.5);
        assert!(connection.connect_failed());
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_loopback_handshake() {
        let config = Config::default();
        let mut server = UdpConnection::new(&config);
        let mut client = UdpConnection::new(&config);
        server.start(0).await.unwrap();
        client.start(0).await.unwrap();

        let server_port = server.local_addr().unwrap().port();
        server.listen();
        client.connect(SocketAddr::from(([127, 0, 0, 1], server_port)));
        assert!(!server.is_connected());

        client.send_packet(b"hello").await.unwrap();
        let payload = server
            .receive_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("payload");
        assert_eq!(payload.as_ref(), b"hello");
        assert!(server.is_connected());

        server.send_packet(b"world").await.unwrap();
        let payload = client
            .receive_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("payload");
        assert_eq!(payload.as_ref(), b"world");
        assert!(client.is_connected());
        assert_eq!(client.stats().acked_packets, 1);
        assert!(client.try_receive().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_protocol_is_dropped() {
        let config = Config::default();
        let mut server = UdpConnection::new(&config);
        server.start(0).await.unwrap();
        server.listen();
        let server_port = server.local_addr().unwrap().port();

        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut datagram = vec![0u8; HEADER_LEN + 4];
        datagram[..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        stranger
            .send_to(&datagram, ("127.0.0.1", server_port))
            .await
            .unwrap();

        let received = server
            .receive_timeout(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(received.is_none());
        assert!(!server.is_connected());
    }
}
