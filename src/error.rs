//! 에러 타입 정의

use thiserror::Error;

/// SWP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    /// 소켓 송수신 실패. 해당 엔드포인트에는 치명적이다.
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 윈도우가 가득 참 (정상 상태, 재시도 대상)
    #[error("윈도우 가득 참: in_flight={in_flight}, capacity={capacity}")]
    WindowFull { in_flight: usize, capacity: usize },

    #[error("잘린 데이터그램: {len} bytes")]
    Truncated { len: usize },

    #[error("페이로드 크기 초과: size={size}, max={max}")]
    PayloadTooLarge { size: i64, max: usize },

    #[error("유효하지 않은 시퀀스 번호: {sequence}")]
    InvalidSequence { sequence: i32 },

    #[error("잘못된 제어 메시지: {text:?}")]
    MalformedNotice { text: String },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("채널 닫힘")]
    ChannelClosed,

    #[error("종료 핸드쉐이크 정체: 종료 알림 {notices}회 무응답")]
    HandshakeStalled { notices: u64 },

    /// 청크 수가 시퀀스 공간(int32)을 넘음
    #[error("시퀀스 공간 초과: 청크 {chunks}개 필요, 최대 {max}개")]
    TooManyChunks { chunks: u64, max: u64 },
}

impl Error {
    /// 디코딩 단계에서 발생한 에러인지 (프레임 폐기 대상)
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Error::Truncated { .. }
                | Error::PayloadTooLarge { .. }
                | Error::InvalidSequence { .. }
                | Error::MalformedNotice { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
