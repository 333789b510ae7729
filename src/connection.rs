//! 하위 연결 계약
//!
//! 패킷 전달, 연결 수명주기, RTT 측정은 이 계층 아래의 책임.
//! 파일 전송 프레임과 heartbeat가 같은 연결을 공유하므로 전역 인스턴스 대신
//! `&mut C`로 명시적으로 전달함.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

use crate::stats::ConnectionStats;
use crate::Result;

/// 순서 보장 패킷 연결
pub trait Connection: Send {
    /// 로컬 포트에서 시작
    fn start(&mut self, port: u16) -> impl Future<Output = Result<()>> + Send;

    /// 클라이언트 모드: 대상 주소로 연결 시도
    fn connect(&mut self, addr: SocketAddr);

    /// 서버 모드: 접속 대기
    fn listen(&mut self);

    /// 타임아웃/통계 갱신 (초 단위 경과 시간)
    fn update(&mut self, delta_time: f32);

    fn is_connected(&self) -> bool;

    fn connect_failed(&self) -> bool;

    /// 데이터그램 하나 전송
    fn send_packet(&mut self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 대기 없이 수신 (없으면 None)
    fn try_receive(&mut self) -> Result<Option<Bytes>>;

    /// 최대 `timeout`까지 대기하며 수신 (시간 초과 시 None)
    fn receive_timeout(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// 진단 정보
    fn stats(&self) -> ConnectionStats;
}
