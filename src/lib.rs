//! # RFT (Rate-adaptive File Transfer)
//!
//! 순서가 보장되는 패킷 연결 위에서 동작하는 파일 전송 프로토콜
//!
//! ## 핵심 구성
//! - **FlowController**: RTT 기반 2단계(Responsive/Throttled) 전송률 제어
//! - **Frame**: opcode 태그 프레임, 데이터그램 1개 = 프레임 1개
//! - **FileSender / FileReceiver**: 파일 → 프레임 시퀀스 → 파일
//! - **checksum**: CRC-32/IEEE 파일 무결성 검사 (전송 경로와는 독립)
//! - **Connection**: 하위 전송 계층 계약 (메모리 / UDP 구현 포함)
//! - **Node**: 고정 타임스텝 드라이버 루프 (heartbeat, 통계, 흐름 제어)

pub mod checksum;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod memory;
pub mod node;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod udp;

pub use checksum::{checksum, file_checksum};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use flow::{FlowController, FlowMode};
pub use frame::{FileMode, Frame, FrameError, Opcode};
pub use memory::{MemoryConnection, MemoryLink};
pub use node::{Node, NodeEvent, Role};
pub use receiver::FileReceiver;
pub use sender::FileSender;
pub use stats::{ConnectionStats, SendReport, TransferReport};
pub use udp::UdpConnection;

/// 프로토콜 ID (패킷 식별용)
pub const PROTOCOL_ID: u32 = 0x1122_3344;

/// 기본 서버 포트
pub const DEFAULT_SERVER_PORT: u16 = 30000;

/// 기본 클라이언트 포트
pub const DEFAULT_CLIENT_PORT: u16 = 30001;

/// Heartbeat 패킷 크기 (바이트)
pub const HEARTBEAT_PACKET_SIZE: usize = 256;

/// Filename 프레임 페이로드 최대 길이
pub const MAX_FILENAME_LEN: usize = 255;

/// Content 프레임 페이로드 최대 길이
///
/// opcode를 포함한 데이터그램은 257바이트로, 무관한 heartbeat 패킷(256)보다 1바이트 큼
pub const MAX_CONTENT_LEN: usize = 256;

/// 프레임 하나의 최대 데이터그램 크기 (opcode 포함)
pub const MAX_FRAME_LEN: usize = 1 + MAX_CONTENT_LEN;
