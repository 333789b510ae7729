//! 수신자
//!
//! 프레임 시퀀스를 받아 파일을 복원.
//! - Filename / Size: 세션 정보 저장
//! - Mode: 대상 파일 생성, 세션 활성화
//! - Content: 활성 세션이면 기록, 아니면 버림
//! - EndOfFile: 파일 닫고 종료 (유일한 정상 종료)
//!
//! 재정렬/중복 제거 없음. 프레임 순서는 하위 연결이 보장해야 함.

use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::frame::{FileMode, Frame};
use crate::stats::TransferReport;
use crate::{Config, Error, Result};

/// 열린 대상 파일
struct Output {
    writer: BufWriter<File>,
    mode: FileMode,
    path: PathBuf,
}

impl Output {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let data = match self.mode {
            FileMode::Binary => Cow::Borrowed(data),
            FileMode::Text => to_platform_text(data),
        };
        self.writer.write_all(&data).await
    }

    async fn close(mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

/// 수신 세션 상태
#[derive(Default)]
struct TransferSession {
    filename: String,
    expected_size: Option<u64>,
    bytes_written: u64,
    output: Option<Output>,
    path: Option<PathBuf>,
    started_at: Option<Instant>,
    ignored_datagrams: u64,
    discarded_content: u64,
}

impl TransferSession {
    fn into_report(self, fallback_start: Instant) -> TransferReport {
        let started = self.started_at.unwrap_or(fallback_start);
        TransferReport {
            filename: self.filename,
            path: self.path,
            expected_size: self.expected_size,
            bytes_written: self.bytes_written,
            elapsed: started.elapsed(),
            ignored_datagrams: self.ignored_datagrams,
            discarded_content: self.discarded_content,
        }
    }
}

/// 파일 수신자
#[derive(Debug, Clone)]
pub struct FileReceiver {
    output_dir: PathBuf,
    poll_interval: Duration,
    idle_timeout: Option<Duration>,
}

impl FileReceiver {
    pub fn new(config: &Config, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            poll_interval: config.recv_poll_interval(),
            idle_timeout: config.recv_idle_timeout(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 파일 하나를 끝까지 수신
    ///
    /// EndOfFile 또는 치명적 에러(대상 파일 생성 실패, 유휴 타임아웃, 연결 종료)까지 반환하지 않음.
    pub async fn run<C: Connection>(&self, connection: &mut C) -> Result<TransferReport> {
        loop {
            if let Some(report) = self.accept(connection, self.poll_interval).await? {
                return Ok(report);
            }
        }
    }

    /// 최대 `wait` 동안 세션 시작(인식 가능한 첫 프레임)을 기다림
    ///
    /// 시작되지 않으면 `Ok(None)`. 시작되면 EndOfFile까지 수신.
    pub async fn accept<C: Connection>(
        &self,
        connection: &mut C,
        wait: Duration,
    ) -> Result<Option<TransferReport>> {
        let begin = Instant::now();
        let deadline = begin + wait;
        let mut session = TransferSession::default();
        let mut last_frame: Option<Instant> = None;

        loop {
            let wait = self.next_wait(last_frame, deadline);
            if let Some(datagram) = connection.receive_timeout(wait).await? {
                match Frame::decode(&datagram) {
                    Ok(Frame::EndOfFile) => {
                        if let Some(output) = session.output.take() {
                            output.close().await?;
                        }
                        info!("End of file received.");

                        let report = session.into_report(begin);
                        info!("파일 수신 완료: {}", report.summary());
                        return Ok(Some(report));
                    }
                    Ok(frame) => {
                        last_frame = Some(Instant::now());
                        self.handle_frame(&mut session, frame).await?;
                    }
                    Err(e) => {
                        session.ignored_datagrams += 1;
                        debug!("데이터그램 무시: {}", e);
                    }
                }
            }

            // 무시된 데이터그램이 계속 와도 시간 제한은 매번 확인
            match (last_frame, self.idle_timeout) {
                (None, _) if Instant::now() >= deadline => return Ok(None),
                (Some(last), Some(idle)) if last.elapsed() >= idle => {
                    warn!(
                        "수신 타임아웃: {} ({} bytes 기록)",
                        session.filename, session.bytes_written
                    );
                    return Err(Error::Timeout {
                        idle_ms: idle.as_millis() as u64,
                    });
                }
                _ => {}
            }
        }
    }

    /// 다음 수신 대기 시간 (0이어도 이미 도착한 데이터그램은 읽음)
    fn next_wait(&self, last_frame: Option<Instant>, deadline: Instant) -> Duration {
        let remaining = match (last_frame, self.idle_timeout) {
            (None, _) => deadline.saturating_duration_since(Instant::now()),
            (Some(last), Some(idle)) => idle.saturating_sub(last.elapsed()),
            (Some(_), None) => self.poll_interval,
        };
        self.poll_interval.min(remaining)
    }

    async fn handle_frame(&self, session: &mut TransferSession, frame: Frame) -> Result<()> {
        match frame {
            Frame::Filename(name) => {
                info!("파일 이름 수신: {} (Length: {})", name, name.len());
                session.filename = name;
            }

            Frame::Size(size) => {
                debug!("파일 크기 수신: {} bytes", size);
                session.expected_size = Some(size);
            }

            Frame::Mode(mode) => {
                if let Some(previous) = session.output.take() {
                    warn!("이미 열린 파일 교체: {:?}", previous.path);
                    previous.close().await?;
                }

                let output = self.open_destination(&session.filename, mode).await?;
                info!(
                    "파일 수신 시작: {:?} ({} bytes, {:?})",
                    output.path,
                    session.expected_size.unwrap_or(0),
                    mode
                );
                session.path = Some(output.path.clone());
                session.output = Some(output);
                session.started_at = Some(Instant::now());
            }

            Frame::Content(data) => match session.output.as_mut() {
                Some(output) => {
                    output.write(&data).await?;
                    session.bytes_written += data.len() as u64;
                }
                None => {
                    session.discarded_content += 1;
                    debug!("세션 활성화 전 Content 버림: {} bytes", data.len());
                }
            },

            Frame::EndOfFile => {}
        }

        Ok(())
    }

    async fn open_destination(&self, filename: &str, mode: FileMode) -> Result<Output> {
        let name = destination_name(filename);
        let path = self
            .output_dir
            .join(name.as_deref().unwrap_or(filename));
        let created = match name {
            Ok(_) => File::create(&path).await,
            Err(e) => Err(e),
        };

        match created {
            Ok(file) => Ok(Output {
                writer: BufWriter::new(file),
                mode,
                path,
            }),
            Err(source) => {
                warn!("대상 파일 생성 실패: {:?}: {}", path, source);
                Err(Error::DestinationOpen { path, source })
            }
        }
    }
}

/// 출력 디렉터리 밖으로 나가지 않는 파일 이름
fn destination_name(filename: &str) -> io::Result<String> {
    let name: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    if name.is_empty() || name == "." || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("사용할 수 없는 파일 이름: {:?}", filename),
        ));
    }
    Ok(name)
}

/// 텍스트 모드: `\n`을 플랫폼 줄바꿈으로
fn to_platform_text(data: &[u8]) -> Cow<'_, [u8]> {
    if cfg!(windows) && data.contains(&b'\n') {
        let mut out = Vec::with_capacity(data.len() + data.len() / 16);
        for &b in data {
            if b == b'\n' {
                out.push(b'\r');
            }
            out.push(b);
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_name() {
        assert_eq!(destination_name("report.csv").unwrap(), "report.csv");
        assert_eq!(destination_name("../etc/passwd").unwrap(), ".._etc_passwd");
        assert_eq!(destination_name("a\\b").unwrap(), "a_b");
        assert!(destination_name("").is_err());
        assert!(destination_name(".").is_err());
        assert!(destination_name("..").is_err());
    }

    #[test]
    fn test_text_mode_line_endings() {
        let converted = to_platform_text(b"a\nb\n");
        if cfg!(windows) {
            assert_eq!(converted.as_ref(), b"a\r\nb\r\n");
        } else {
            assert_eq!(converted.as_ref(), b"a\nb\n");
        }
    }
}
