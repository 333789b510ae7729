//! 전송 통계

use std::path::PathBuf;
use std::time::Duration;

/// 연결 진단 정보 (하위 연결이 제공)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    /// RTT 추정값
    pub rtt: Duration,

    /// 송신 패킷 수
    pub sent_packets: u64,

    /// 확인(ack)된 패킷 수
    pub acked_packets: u64,

    /// 손실 패킷 수
    pub lost_packets: u64,

    /// 수신 패킷 수
    pub received_packets: u64,

    /// 송신 대역폭 (kbps)
    pub sent_bandwidth_kbps: f32,

    /// 확인 대역폭 (kbps)
    pub acked_bandwidth_kbps: f32,
}

impl ConnectionStats {
    /// RTT (밀리초)
    pub fn rtt_ms(&self) -> f32 {
        self.rtt.as_secs_f32() * 1000.0
    }

    /// 손실률 (0.0 ~ 1.0)
    pub fn loss_rate(&self) -> f64 {
        if self.sent_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.sent_packets as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "rtt {:.1}ms, sent {}, acked {}, lost {} ({:.1}%), sent bandwidth = {:.1}kbps, acked bandwidth = {:.1}kbps",
            self.rtt_ms(),
            self.sent_packets,
            self.acked_packets,
            self.lost_packets,
            self.loss_rate() * 100.0,
            self.sent_bandwidth_kbps,
            self.acked_bandwidth_kbps,
        )
    }
}

/// 송신 결과
#[derive(Debug, Clone)]
pub struct SendReport {
    /// 전송한 기본 파일 이름
    pub filename: String,

    /// 파일 크기 (Size 프레임 값)
    pub file_size: u64,

    /// 전송한 프레임 수
    pub frames_sent: u64,

    /// 전송한 파일 바이트 (Content 페이로드 합)
    pub bytes_sent: u64,

    /// 소요 시간
    pub elapsed: Duration,
}

/// 수신 결과
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    /// 정리된 파일 이름
    pub filename: String,

    /// 기록한 대상 파일 경로 (Mode 프레임을 받지 못했으면 None)
    pub path: Option<PathBuf>,

    /// Size 프레임으로 받은 예상 크기 (검증하지 않음)
    pub expected_size: Option<u64>,

    /// 기록한 바이트 수
    pub bytes_written: u64,

    /// 세션 활성화부터 EndOfFile까지 시간
    pub elapsed: Duration,

    /// 해석할 수 없어 무시한 데이터그램 수
    pub ignored_datagrams: u64,

    /// 세션 활성화 전에 받아 버린 Content 프레임 수
    pub discarded_content: u64,
}

impl TransferReport {
    /// 처리율 (bits/sec)
    pub fn throughput_bps(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_written as f64 * 8.0 / elapsed
    }

    /// 처리율 (Mbit/s)
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_bps() / 1_000_000.0
    }

    /// 예상 크기와 기록 크기 일치 여부 (Size 프레임이 없으면 None)
    pub fn size_matches(&self) -> Option<bool> {
        self.expected_size.map(|expected| expected == self.bytes_written)
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "File: {} | Bytes: {} | Time: {:.6}s | Speed: {:.6} Mbit/s",
            self.filename,
            self.bytes_written,
            self.elapsed.as_secs_f64(),
            self.throughput_mbps(),
        )
    }
}
