//! CRC-32/IEEE 무결성 검사
//!
//! 반사 다항식 0xEDB88320, 초기값 0xFFFFFFFF, 결과는 레지스터의 1의 보수.
//! 전송 경로에서는 사용하지 않음. 전송 전/후 비교가 필요한 호출자가 직접 호출.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::{Error, Result};

/// 파일 읽기 블록 크기
pub const CHECKSUM_BLOCK_SIZE: usize = 1024;

/// 메모리 데이터의 CRC-32
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// 파일 전체의 CRC-32 (1024바이트 블록 단위로 읽음)
pub async fn file_checksum(path: impl AsRef<Path>) -> Result<u32> {
    file_checksum_with_block(path, CHECKSUM_BLOCK_SIZE).await
}

/// 블록 크기를 지정한 파일 CRC-32
pub async fn file_checksum_with_block(path: impl AsRef<Path>, block_size: usize) -> Result<u32> {
    let path = path.as_ref();
    let mut file = File::open(path).await.map_err(|source| Error::SourceOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    let crc = hasher.finalize();
    debug!("체크섬 계산: {:?} ({} bytes) = {:08X}", path, total, crc);
    Ok(crc)
}
