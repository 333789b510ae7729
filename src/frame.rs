//! 프레임 정의
//!
//! 데이터그램 하나에 프레임 하나. 첫 바이트가 opcode.
//!
//! | opcode | 프레임 | 페이로드 |
//! |---|---|---|
//! | 0x01 | Filename | 최대 255 bytes |
//! | 0x02 | Size | 8 bytes LE |
//! | 0x03 | Content | 최대 256 bytes |
//! | 0x04 | EndOfFile | 없음 |
//! | 0x05 | Mode | 1 byte (1 = binary) |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{MAX_CONTENT_LEN, MAX_FILENAME_LEN};

/// 프레임 opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Filename = 0x01,
    Size = 0x02,
    Content = 0x03,
    EndOfFile = 0x04,
    Mode = 0x05,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Opcode::Filename),
            0x02 => Some(Opcode::Size),
            0x03 => Some(Opcode::Content),
            0x04 => Some(Opcode::EndOfFile),
            0x05 => Some(Opcode::Mode),
            _ => None,
        }
    }

    /// 페이로드 최대 길이
    pub fn max_payload_len(self) -> usize {
        match self {
            Opcode::Filename => MAX_FILENAME_LEN,
            Opcode::Size => SIZE_FIELD_LEN,
            Opcode::Content => MAX_CONTENT_LEN,
            Opcode::EndOfFile => 0,
            Opcode::Mode => 1,
        }
    }
}

/// 대상 파일 열기 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Binary,
    Text,
}

impl FileMode {
    fn to_byte(self) -> u8 {
        match self {
            FileMode::Binary => 1,
            FileMode::Text => 0,
        }
    }

    fn from_byte(value: u8) -> Self {
        if value == 1 {
            FileMode::Binary
        } else {
            FileMode::Text
        }
    }
}

/// 프레임 디코딩/인코딩 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("빈 데이터그램")]
    Empty,

    #[error("알 수 없는 opcode: 0x{0:02X}")]
    UnrecognizedOpcode(u8),

    #[error("페이로드 초과: {opcode:?} {len} bytes (최대 {max})")]
    PayloadTooLong { opcode: Opcode, len: usize, max: usize },

    #[error("페이로드 부족: {opcode:?} expected {expected} bytes, got {got}")]
    Truncated {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },
}

/// 애플리케이션 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 기본 파일 이름 (디코딩 시 출력 가능한 ASCII로 정리됨)
    Filename(String),

    /// 전체 파일 크기
    Size(u64),

    /// 대상 파일 열기 모드, 수신측 세션을 활성화함
    Mode(FileMode),

    /// 파일 데이터 (순서대로)
    Content(Bytes),

    /// 종료 표시
    EndOfFile,
}

impl Frame {
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Filename(_) => Opcode::Filename,
            Frame::Size(_) => Opcode::Size,
            Frame::Mode(_) => Opcode::Mode,
            Frame::Content(_) => Opcode::Content,
            Frame::EndOfFile => Opcode::EndOfFile,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Frame::Filename(name) => name.len(),
            Frame::Size(_) => SIZE_FIELD_LEN,
            Frame::Mode(_) => 1,
            Frame::Content(data) => data.len(),
            Frame::EndOfFile => 0,
        }
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(1 + self.payload_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// 버퍼 뒤에 직렬화 (길이 검증 포함)
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), FrameError> {
        let opcode = self.opcode();
        let len = self.payload_len();
        let max = opcode.max_payload_len();
        if len > max {
            return Err(FrameError::PayloadTooLong { opcode, len, max });
        }

        buf.put_u8(opcode as u8);
        match self {
            Frame::Filename(name) => buf.put_slice(name.as_bytes()),
            Frame::Size(size) => put_u64_le(buf, *size),
            Frame::Mode(mode) => buf.put_u8(mode.to_byte()),
            Frame::Content(data) => buf.put_slice(data),
            Frame::EndOfFile => {}
        }
        Ok(())
    }

    /// 데이터그램에서 역직렬화
    pub fn decode(datagram: &[u8]) -> Result<Self, FrameError> {
        let (&first, payload) = datagram.split_first().ok_or(FrameError::Empty)?;
        let opcode = Opcode::from_u8(first).ok_or(FrameError::UnrecognizedOpcode(first))?;

        let max = opcode.max_payload_len();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLong {
                opcode,
                len: payload.len(),
                max,
            });
        }

        match opcode {
            Opcode::Filename => Ok(Frame::Filename(sanitize_filename(payload))),
            Opcode::Size => get_u64_le(payload).map(Frame::Size),
            Opcode::Mode => match payload.first() {
                Some(&byte) => Ok(Frame::Mode(FileMode::from_byte(byte))),
                None => Err(FrameError::Truncated {
                    opcode,
                    expected: 1,
                    got: 0,
                }),
            },
            Opcode::Content => Ok(Frame::Content(Bytes::copy_from_slice(payload))),
            Opcode::EndOfFile => Ok(Frame::EndOfFile),
        }
    }
}

/// 파일 이름 정리: [32, 126] 밖의 바이트는 '_'로 치환
pub fn sanitize_filename(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '_' })
        .collect()
}

/// 64비트 정수 필드 크기
pub const SIZE_FIELD_LEN: usize = 8;

/// 고정폭 64비트 little-endian 필드 쓰기
///
/// 호스트 바이트 순서와 무관. 여러 바이트 숫자 필드는 모두 이 함수 쌍을 사용.
pub fn put_u64_le(buf: &mut BytesMut, value: u64) {
    buf.put_u64_le(value);
}

/// 고정폭 64비트 little-endian 필드 읽기
///
/// 정확히 8바이트가 아니면 `Truncated` / `PayloadTooLong`
pub fn get_u64_le(mut field: &[u8]) -> Result<u64, FrameError> {
    if field.len() < SIZE_FIELD_LEN {
        return Err(FrameError::Truncated {
            opcode: Opcode::Size,
            expected: SIZE_FIELD_LEN,
            got: field.len(),
        });
    }
    if field.len() > SIZE_FIELD_LEN {
        return Err(FrameError::PayloadTooLong {
            opcode: Opcode::Size,
            len: field.len(),
            max: SIZE_FIELD_LEN,
        });
    }
    Ok(field.get_u64_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(Frame::Filename("a".into()).encode().unwrap()[0], 0x01);
        assert_eq!(Frame::Size(0).encode().unwrap()[0], 0x02);
        assert_eq!(Frame::Content(Bytes::from_static(b"x")).encode().unwrap()[0], 0x03);
        assert_eq!(Frame::EndOfFile.encode().unwrap().as_ref(), &[0x04]);
        assert_eq!(Frame::Mode(FileMode::Binary).encode().unwrap().as_ref(), &[0x05, 1]);
    }

    #[test]
    fn test_size_is_little_endian() {
        let bytes = Frame::Size(0x0102_0304_0506_0708).encode().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x02, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(
            Frame::decode(&bytes).unwrap(),
            Frame::Size(0x0102_0304_0506_0708)
        );
    }

    #[test]
    fn test_filename_sanitized_on_decode() {
        let datagram = [0x01, b'a', 0x00, b'b', 0x7F, 0xC3, b'~', b' '];
        assert_eq!(
            Frame::decode(&datagram).unwrap(),
            Frame::Filename("a_b__~ ".into())
        );
    }

    #[test]
    fn test_mode_byte() {
        assert_eq!(Frame::decode(&[0x05, 1]).unwrap(), Frame::Mode(FileMode::Binary));
        assert_eq!(Frame::decode(&[0x05, 0]).unwrap(), Frame::Mode(FileMode::Text));
        assert_eq!(Frame::decode(&[0x05, 7]).unwrap(), Frame::Mode(FileMode::Text));
        assert_eq!(
            Frame::decode(&[0x05]),
            Err(FrameError::Truncated {
                opcode: Opcode::Mode,
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn test_unrecognized_and_empty() {
        assert_eq!(Frame::decode(&[]), Err(FrameError::Empty));
        assert_eq!(Frame::decode(&[0x00; 256]), Err(FrameError::UnrecognizedOpcode(0x00)));
        assert_eq!(Frame::decode(&[0x06, 1, 2]), Err(FrameError::UnrecognizedOpcode(0x06)));
    }

    #[test]
    fn test_truncated_size_is_reported() {
        assert_eq!(
            Frame::decode(&[0x02, 1, 2, 3]),
            Err(FrameError::Truncated {
                opcode: Opcode::Size,
                expected: 8,
                got: 3
            })
        );
    }

    #[test]
    fn test_length_bounds() {
        let content = Frame::Content(Bytes::from(vec![0u8; MAX_CONTENT_LEN + 1]));
        assert!(matches!(
            content.encode(),
            Err(FrameError::PayloadTooLong { opcode: Opcode::Content, len: 257, max: 256 })
        ));

        let full = Frame::Content(Bytes::from(vec![0xAB; MAX_CONTENT_LEN]));
        let bytes = full.encode().unwrap();
        assert_eq!(bytes.len(), crate::MAX_FRAME_LEN);
        assert_eq!(Frame::decode(&bytes).unwrap(), full);

        let name = "n".repeat(MAX_FILENAME_LEN + 1);
        assert!(Frame::Filename(name).encode().is_err());

        let mut datagram = vec![0x01];
        datagram.extend(std::iter::repeat(b'n').take(MAX_FILENAME_LEN + 1));
        assert!(matches!(
            Frame::decode(&datagram),
            Err(FrameError::PayloadTooLong { opcode: Opcode::Filename, .. })
        ));

        assert!(matches!(
            Frame::decode(&[0x04, 0]),
            Err(FrameError::PayloadTooLong { opcode: Opcode::EndOfFile, len: 1, max: 0 })
        ));
    }
}
