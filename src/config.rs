//! 프로토콜 설정

use std::time::Duration;

use crate::{
    DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT, HEARTBEAT_PACKET_SIZE, MAX_CONTENT_LEN, PROTOCOL_ID,
};

/// RFT 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프로토콜 ID (다른 ID의 패킷은 무시)
    pub protocol_id: u32,

    /// 서버 포트
    pub server_port: u16,

    /// 클라이언트 포트
    pub client_port: u16,

    /// 드라이버 루프 고정 타임스텝 (초)
    pub delta_time: f32,

    /// 연결 타임아웃 (초)
    pub connection_timeout: f32,

    /// Heartbeat 패킷 크기 (바이트)
    pub heartbeat_packet_size: usize,

    /// 통계 출력 주기 (초)
    pub stats_interval: f32,

    /// RTT 임계값 (밀리초), 초과하면 Throttled
    pub rtt_threshold_ms: f32,

    /// 초기 페널티 시간 (초)
    pub initial_penalty: f32,

    /// 최소 페널티 시간 (초)
    pub min_penalty: f32,

    /// 최대 페널티 시간 (초)
    pub max_penalty: f32,

    /// 페널티 증감 판단 구간 (초)
    /// - Responsive 유지 시간이 이보다 짧게 끝나면 페널티 2배
    /// - Responsive가 이만큼 지속될 때마다 페널티 절반
    pub penalty_window: f32,

    /// Responsive 모드 전송률 (packets/sec)
    pub responsive_send_rate: f32,

    /// Throttled 모드 전송률 (packets/sec)
    pub throttled_send_rate: f32,

    /// Content 프레임당 파일 바이트 수 (최대 MAX_CONTENT_LEN)
    pub chunk_size: usize,

    /// 체크섬 계산 시 읽기 블록 크기
    pub checksum_block_size: usize,

    /// 수신 대기 한 번의 최대 시간 (밀리초)
    pub recv_poll_interval_ms: u64,

    /// 송신/수신 완료 후 파일 CRC-32를 로그로 남김 (전송하지 않음)
    pub log_checksums: bool,

    /// 세션 시작 후 프레임 없이 허용되는 시간 (밀리초)
    /// None이면 무한 대기
    pub recv_idle_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            server_port: DEFAULT_SERVER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            delta_time: 1.0 / 30.0,
            connection_timeout: 10.0,
            heartbeat_packet_size: HEARTBEAT_PACKET_SIZE,
            stats_interval: 0.25,
            rtt_threshold_ms: 250.0,
            initial_penalty: 4.0,
            min_penalty: 1.0,
            max_penalty: 60.0,
            penalty_window: 10.0,
            responsive_send_rate: 30.0,
            throttled_send_rate: 10.0,
            chunk_size: MAX_CONTENT_LEN,
            checksum_block_size: 1024,
            recv_poll_interval_ms: 100,
            log_checksums: true,
            recv_idle_timeout_ms: Some(10_000),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            connection_timeout: 30.0,
            rtt_threshold_ms: 400.0,
            initial_penalty: 8.0,
            chunk_size: 128,
            recv_poll_interval_ms: 250,
            recv_idle_timeout_ms: Some(30_000),
            ..Self::default()
        }
    }

    /// 고정 타임스텝
    pub fn tick(&self) -> Duration {
        Duration::from_secs_f32(self.delta_time)
    }

    /// 수신 대기 간격
    pub fn recv_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recv_poll_interval_ms)
    }

    /// 세션 유휴 타임아웃
    pub fn recv_idle_timeout(&self) -> Option<Duration> {
        self.recv_idle_timeout_ms.map(Duration::from_millis)
    }

    /// Content 프레임 크기 (프레임 상한으로 제한)
    pub fn content_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CONTENT_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.protocol_id, 0x1122_3344);
        assert_eq!(config.server_port, 30000);
        assert_eq!(config.client_port, 30001);
        assert_eq!(config.content_chunk_size(), 256);
        assert_eq!(config.checksum_block_size, 1024);
    }

    #[test]
    fn test_chunk_size_is_clamped_to_frame_limit() {
        let config = Config {
            chunk_size: 4096,
            ..Config::default()
        };
        assert_eq!(config.content_chunk_size(), MAX_CONTENT_LEN);

        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert_eq!(config.content_chunk_size(), 1);
    }
}
