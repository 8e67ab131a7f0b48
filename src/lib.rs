//! # SWP (Sliding Window Protocol)
//!
//! UDP 위에서 동작하는 슬라이딩 윈도우 ARQ 신뢰 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 크기 링 윈도우**: `sequence mod capacity` 로 슬롯 인덱싱
//! - **개별 ACK + 연속 구간 슬라이딩**: 비순차 ACK는 안전하지만 갭이 메워질 때까지 무효
//! - **타임아웃 재전송**: 재전송 타이머가 주기적으로 윈도우를 스캔
//! - **흐름 제어**: 수신자가 ACK에 남은 슬롯 수를 실어 보내고 송신자는 그만큼만 슬라이드
//! - **2단계 종료**: `DONE_TRANSFER|<last>` → 최종 ACK(-1) → `CLOSE_TRANSFER`

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod loopback;
pub mod receiver;
pub mod recv_window;
pub mod send_window;
pub mod sender;
pub mod stats;
pub mod stream;
pub mod termination;
pub mod timer;

pub use channel::{DatagramChannel, UdpChannel};
pub use config::{Config, ReceiverOptions, SenderOptions};
pub use error::{Error, Result};
pub use frame::{Ack, DataFrame, FrameCodec, Message};
pub use loopback::{MemoryChannel, MemoryNetwork};
pub use receiver::{receive_file, ReceiveReport, Receiver};
pub use recv_window::{Intake, ReceiveWindow};
pub use send_window::{AckKind, AckOutcome, SendWindow};
pub use sender::{check_chunk_count, send_file, Sender, TransferReport};
pub use stats::TransferStats;
pub use stream::{ByteSink, ByteSource};
pub use termination::{ReceiverPhase, SenderPhase};

/// 데이터 프레임 헤더 길이 (sequence + payload size)
pub const HEADER_LEN: usize = 8;

/// 기본 최대 페이로드 (1500 MTU 기준 UDP 1472 바이트 - 헤더)
pub const DEFAULT_MAX_PAYLOAD: usize = 1464;

/// 기본 윈도우 용량 (슬롯 수)
pub const DEFAULT_WINDOW_CAPACITY: usize = 40;

/// UDP 데이터그램 최대 페이로드
pub const MAX_DATAGRAM: usize = 65507;

/// 최종 ACK 시퀀스 (수신 완료, 송신자는 종료 가능)
pub const FINAL_ACK_SEQUENCE: i32 = -1;

/// ACK 포트 = 데이터 포트 + 오프셋
pub const ACK_PORT_OFFSET: u16 = 5;

/// 시퀀스 번호 (와이어 상 int32, 음수는 예약)
pub type Sequence = i32;
