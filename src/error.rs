//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::FrameError;

/// RFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 송신측이 원본 파일을 열 수 없음 (프레임은 하나도 전송되지 않음)
    #[error("원본 파일 열기 실패: {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 수신측이 대상 파일을 만들 수 없음 (수신 루프 중단)
    #[error("대상 파일 생성 실패: {path}: {source}")]
    DestinationOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("프레임 에러: {0}")]
    Frame(#[from] FrameError),

    #[error("파일 이름이 너무 김: {len} bytes (최대 {max})")]
    FilenameTooLong { len: usize, max: usize },

    #[error("포트 바인딩 실패: port={port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("연결이 시작되지 않음")]
    NotStarted,

    #[error("연결 실패")]
    ConnectFailed,

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("수신 타임아웃: {idle_ms}ms 동안 프레임 없음")]
    Timeout { idle_ms: u64 },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
