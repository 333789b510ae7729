//! 송신자
//!
//! 파일 하나를 프레임 시퀀스로 전송:
//! `Filename → Size → Mode(Binary) → Content* → EndOfFile`
//!
//! 확인/재전송/pacing 없음. 신뢰성은 하위 연결에 위임.

use std::io;
use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::frame::{FileMode, Frame};
use crate::stats::SendReport;
use crate::{Config, Error, Result, MAX_FILENAME_LEN};

/// 파일 송신자
#[derive(Debug, Clone)]
pub struct FileSender {
    chunk_size: usize,
}

impl Default for FileSender {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl FileSender {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_size: config.content_chunk_size(),
        }
    }

    /// 파일 전송
    ///
    /// 파일을 열 수 없으면 `Error::SourceOpen`, 이 경우 프레임은 전송되지 않음.
    pub async fn send_file<C: Connection>(
        &self,
        path: impl AsRef<Path>,
        connection: &mut C,
    ) -> Result<SendReport> {
        let path = path.as_ref();
        let start = Instant::now();

        let mut file = File::open(path).await.map_err(|source| Error::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(Error::SourceOpen {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "일반 파일이 아님"),
            });
        }
        let file_size = metadata.len();

        let filename = base_name(&path.to_string_lossy()).to_string();
        if filename.len() > MAX_FILENAME_LEN {
            return Err(Error::FilenameTooLong {
                len: filename.len(),
                max: MAX_FILENAME_LEN,
            });
        }

        info!("파일 이름 전송: {} (Length: {})", filename, filename.len());

        let mut report = SendReport {
            filename: filename.clone(),
            file_size,
            frames_sent: 0,
            bytes_sent: 0,
            elapsed: Default::default(),
        };

        self.send_frame(connection, &Frame::Filename(filename), &mut report)
            .await?;
        self.send_frame(connection, &Frame::Size(file_size), &mut report)
            .await?;
        self.send_frame(connection, &Frame::Mode(FileMode::Binary), &mut report)
            .await?;

        info!("파일 전송 시작: {} ({} bytes)", report.filename, file_size);

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = read_chunk(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            let frame = Frame::Content(Bytes::copy_from_slice(&buf[..n]));
            self.send_frame(connection, &frame, &mut report).await?;
            report.bytes_sent += n as u64;
        }
        drop(file);

        self.send_frame(connection, &Frame::EndOfFile, &mut report)
            .await?;

        report.elapsed = start.elapsed();
        info!(
            "파일 전송 완료: {} ({} bytes, {} frames, {:.3}s)",
            report.filename,
            report.bytes_sent,
            report.frames_sent,
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }

    async fn send_frame<C: Connection>(
        &self,
        connection: &mut C,
        frame: &Frame,
        report: &mut SendReport,
    ) -> Result<()> {
        let bytes = frame.encode()?;
        connection.send_packet(&bytes).await?;
        report.frames_sent += 1;
        debug!("프레임 전송: {:?} ({} bytes)", frame.opcode(), bytes.len());
        Ok(())
    }
}

/// 마지막 `/` 또는 `\` 뒤의 이름
pub fn base_name(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// 버퍼가 가득 차거나 파일 끝까지 읽음
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
