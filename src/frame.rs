//! 와이어 프레임 코덱
//!
//! 모든 int32는 빅엔디언.
//!
//! - 데이터 프레임: `seq:i32 | payload_size:i32 | payload` (항상 `HEADER_LEN + max_payload`로 패딩)
//! - 종료 알림: ASCII `DONE_TRANSFER|<last_seq>`
//! - 닫기 알림: ASCII `CLOSE_TRANSFER`
//! - ACK: `seq:i32 | window:i32` (구버전 4바이트 ACK도 수신 허용)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, Sequence, FINAL_ACK_SEQUENCE, HEADER_LEN};

const DONE_PREFIX: &[u8] = b"DONE_TRANSFER|";
const CLOSE_TOKEN: &[u8] = b"CLOSE_TRANSFER";

/// 데이터 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub sequence: Sequence,

    /// 의미 있는 바이트만 담는다 (패딩 제외)
    pub payload: Bytes,
}

impl DataFrame {
    pub fn new(sequence: Sequence, payload: Bytes) -> Self {
        Self { sequence, payload }
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// 수신자 → 송신자 ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub sequence: Sequence,

    /// 수신자가 광고한 여유 슬롯 수 (4바이트 ACK이면 None)
    pub window: Option<u32>,
}

impl Ack {
    pub fn new(sequence: Sequence, window: u32) -> Self {
        Self {
            sequence,
            window: Some(window),
        }
    }

    /// 최종 ACK (-1)
    pub fn final_ack(window: u32) -> Self {
        Self::new(FINAL_ACK_SEQUENCE, window)
    }

    pub fn is_final(&self) -> bool {
        self.sequence == FINAL_ACK_SEQUENCE
    }
}

/// 디코딩된 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(DataFrame),
    EndOfStream { last_sequence: Sequence },
    Close,
    Ack(Ack),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Data(_) => "data",
            Message::EndOfStream { .. } => "end-of-stream",
            Message::Close => "close",
            Message::Ack(_) => "ack",
        }
    }
}

/// 프레임 인코더/디코더
///
/// 데이터 프레임의 패딩 길이가 `max_payload`에 의존하므로 양쪽이 같은 값을 써야 한다.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 데이터 프레임 데이터그램 길이
    pub fn datagram_len(&self) -> usize {
        HEADER_LEN + self.max_payload
    }

    /// 데이터 프레임 인코딩 (패딩 포함)
    pub fn encode_data(&self, sequence: Sequence, payload: &[u8]) -> Bytes {
        debug_assert!(payload.len() <= self.max_payload);
        let mut buf = BytesMut::with_capacity(self.datagram_len());
        buf.put_i32(sequence);
        buf.put_i32(payload.len() as i32);
        buf.put_slice(payload);
        buf.resize(self.datagram_len(), 0);
        buf.freeze()
    }

    pub fn encode_ack(&self, ack: Ack) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_i32(ack.sequence);
        if let Some(window) = ack.window {
            buf.put_i32(window.min(i32::MAX as u32) as i32);
        }
        buf.freeze()
    }

    pub fn encode(&self, message: &Message) -> Bytes {
        match message {
            Message::Data(frame) => self.encode_data(frame.sequence, &frame.payload),
            Message::EndOfStream { last_sequence } => {
                Bytes::from(format!("DONE_TRANSFER|{}", last_sequence))
            }
            Message::Close => Bytes::from_static(CLOSE_TOKEN),
            Message::Ack(ack) => self.encode_ack(*ack),
        }
    }

    /// 수신 버퍼를 정확히 하나의 메시지로 분류
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        // 텍스트 알림이 먼저: 4..8 바이트가 어떤 max_payload보다도 큰 크기로 읽히므로
        // 유효한 데이터 프레임과 겹칠 수 없다.
        let text = trim_nul(bytes);
        if text == CLOSE_TOKEN {
            return Ok(Message::Close);
        }
        if let Some(rest) = text.strip_prefix(DONE_PREFIX) {
            return parse_last_sequence(rest).map(|last_sequence| Message::EndOfStream { last_sequence });
        }

        match bytes.len() {
            4 | 8 => self.decode_ack(bytes),
            len if len < HEADER_LEN => Err(Error::Truncated { len }),
            _ => self.decode_data(bytes),
        }
    }

    fn decode_ack(&self, mut bytes: &[u8]) -> Result<Message> {
        let sequence = bytes.get_i32();
        if sequence < FINAL_ACK_SEQUENCE {
            return Err(Error::InvalidSequence { sequence });
        }
        let window = if bytes.remaining() >= 4 {
            let window = bytes.get_i32();
            if window < 0 {
                return Err(Error::MalformedNotice {
                    text: format!("음수 윈도우: {}", window),
                });
            }
            Some(window as u32)
        } else {
            None
        };
        Ok(Message::Ack(Ack { sequence, window }))
    }

    fn decode_data(&self, bytes: &[u8]) -> Result<Message> {
        let mut header = &bytes[..HEADER_LEN];
        let sequence = header.get_i32();
        let size = header.get_i32();

        if sequence < 0 {
            return Err(Error::InvalidSequence { sequence });
        }
        if size < 0 || size as usize > self.max_payload {
            return Err(Error::PayloadTooLarge {
                size: size as i64,
                max: self.max_payload,
            });
        }
        let size = size as usize;
        if HEADER_LEN + size > bytes.len() {
            return Err(Error::Truncated { len: bytes.len() });
        }

        let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + size]);
        Ok(Message::Data(DataFrame { sequence, payload }))
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

fn parse_last_sequence(rest: &[u8]) -> Result<Sequence> {
    let malformed = || Error::MalformedNotice {
        text: String::from_utf8_lossy(rest).into_owned(),
    };
    let text = std::str::from_utf8(rest).map_err(|_| malformed())?;
    let last: Sequence = text.trim().parse().map_err(|_| malformed())?;
    // 빈 소스는 -1
    if last < -1 {
        return Err(Error::InvalidSequence { sequence: last });
    }
    Ok(last)
}
