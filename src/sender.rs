//! 송신 엔진
//!
//! 세 태스크로 동작한다.
//! - 메인 루프: 소스에서 청크를 읽어 윈도우에 넣고 전송, 소진되면 종료 핸드쉐이크
//! - ACK 리스너: ACK 채널에서 ACK를 받아 윈도우를 슬라이드
//! - 재전송 타이머: [`RetransmitTimer`]
//!
//! 윈도우는 `parking_lot::Mutex` 하나로 보호하고, 락을 쥔 채로 소켓 I/O를 하지 않는다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncRead;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::{debug, info, trace, warn};

use crate::channel::{DatagramChannel, UdpChannel};
use crate::config::{Config, SenderOptions};
use crate::frame::{Ack, FrameCodec, Message};
use crate::send_window::{AckKind, Admitted, SendWindow};
use crate::stats::TransferStats;
use crate::stream::ByteSource;
use crate::termination::{SenderPhase, SenderTermination};
use crate::timer::{RetransmitPolicy, RetransmitTimer};
use crate::{Error, Result, Sequence, MAX_DATAGRAM};

/// 송신 완료 보고
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// 소스에서 읽어 보낸 바이트 수
    pub bytes_sent: u64,

    pub chunks: u64,

    /// 마지막 청크 시퀀스 (빈 소스면 -1)
    pub last_sequence: Sequence,

    pub stats: TransferStats,
}

/// 태스크 간 공유 상태
struct SenderShared {
    window: Arc<Mutex<SendWindow>>,
    termination: Mutex<SenderTermination>,
    stats: Arc<RwLock<TransferStats>>,

    /// 슬라이드로 슬롯이 비었음
    slot_freed: Notify,

    /// 최종 ACK 도착
    final_ack: Notify,

    running: Arc<AtomicBool>,
}

impl SenderShared {
    fn on_ack(&self, ack: Ack) {
        self.stats.write().acks_received += 1;

        if ack.is_final() {
            if self.termination.lock().on_final_ack() {
                self.final_ack.notify_one();
            } else {
                debug!("종료 알림 전 최종 ACK 무시");
            }
            return;
        }

        let outcome = self
            .window
            .lock()
            .on_ack(ack.sequence, ack.window, Instant::now());

        match outcome.kind {
            AckKind::Fresh { payload_size } => {
                self.stats.write().bytes_acknowledged += payload_size as u64;
                debug!(
                    "ACK seq={} window={:?} slid={}",
                    ack.sequence, ack.window, outcome.slid
                );
            }
            AckKind::Duplicate => {
                self.stats.write().duplicate_acks += 1;
                trace!("중복 ACK seq={}", ack.sequence);
            }
            AckKind::WindowUpdate => {
                trace!("윈도우 갱신 ACK seq={} window={:?}", ack.sequence, ack.window);
            }
            AckKind::Unsent => {
                warn!("보내지 않은 시퀀스의 ACK 무시: seq={}", ack.sequence);
            }
        }

        if outcome.slid > 0 {
            self.slot_freed.notify_one();
        }
    }
}

/// 송신자
///
/// 데이터 채널로 프레임과 알림을 보내고, 별도의 ACK 채널로 ACK를 받는다.
/// 한 인스턴스는 한 번의 전송에만 쓴다.
pub struct Sender<C> {
    config: Config,
    codec: FrameCodec,
    data_channel: Arc<C>,
    ack_channel: Arc<C>,
    destination: SocketAddr,
    shared: Arc<SenderShared>,
}

impl<C: DatagramChannel> Sender<C> {
    /// 새 송신자 생성
    pub fn new(config: Config, data_channel: C, ack_channel: C, destination: SocketAddr) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(SenderShared {
            window: Arc::new(Mutex::new(SendWindow::new(config.window_capacity))),
            termination: Mutex::new(SenderTermination::new(config.stall_warning_notices)),
            stats: Arc::new(RwLock::new(TransferStats::new())),
            slot_freed: Notify::new(),
            final_ack: Notify::new(),
            running: Arc::new(AtomicBool::new(false)),
        });

        Ok(Self {
            codec: FrameCodec::new(config.max_payload),
            config,
            data_channel: Arc::new(data_channel),
            ack_channel: Arc::new(ack_channel),
            destination,
            shared,
        })
    }

    /// 현재 단계
    pub fn phase(&self) -> SenderPhase {
        self.shared.termination.lock().phase()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.shared.stats.read().clone()
    }

    /// 소스 전체를 전송하고 종료 핸드쉐이크까지 마친다
    pub async fn transfer<R>(self, mut source: ByteSource<R>) -> Result<TransferReport>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.stats.write().start_time = Instant::now();

        info!(
            "SWP Sender → {} (window={}, max_payload={})",
            self.destination, self.config.window_capacity, self.config.max_payload
        );

        let mut listener = tokio::spawn(ack_listener(
            self.shared.clone(),
            self.ack_channel.clone(),
            self.codec,
            self.config.recv_poll(),
        ));

        let timer = RetransmitTimer::new(
            self.shared.window.clone(),
            self.shared.stats.clone(),
            self.data_channel.clone(),
            self.destination,
            RetransmitPolicy::from_config(&self.config),
            self.config.sweep_interval(),
        );
        let mut timer = tokio::spawn(timer.run(self.shared.running.clone()));

        let outcome = tokio::select! {
            result = self.drive(&mut source) => result,
            joined = &mut listener => Err(task_failure("ACK listener", joined)),
            joined = &mut timer => Err(task_failure("retransmit timer", joined)),
        };

        self.shared.running.store(false, Ordering::SeqCst);
        listener.abort();
        timer.abort();

        let (chunks, last_sequence) = outcome?;
        let stats = self.stats();
        info!("전송 완료: {}", stats.sender_summary());

        Ok(TransferReport {
            bytes_sent: source.bytes_read(),
            chunks,
            last_sequence,
            stats,
        })
    }

    /// 메인 루프: (청크 수, 마지막 시퀀스)
    async fn drive<R>(&self, source: &mut ByteSource<R>) -> Result<(u64, Sequence)>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut chunks = 0u64;

        while let Some(chunk) = source.next_chunk(self.codec.max_payload()).await? {
            let admitted = self.admit(chunk).await?;
            self.data_channel
                .send_to(&admitted.datagram, self.destination)
                .await?;
            self.shared.stats.write().frames_sent += 1;
            trace!("Sent seq={}", admitted.sequence);
            chunks += 1;
        }

        let last_sequence = self.shared.window.lock().next_sequence() - 1;
        self.shared
            .termination
            .lock()
            .source_exhausted(last_sequence);
        info!(
            "소스 소진: {} bytes, {} chunks, last_seq={}",
            source.bytes_read(),
            chunks,
            last_sequence
        );

        self.await_final_ack(last_sequence).await?;

        let close = self.codec.encode(&Message::Close);
        self.data_channel.send_to(&close, self.destination).await?;
        self.shared.termination.lock().mark_closed();
        info!("CLOSE_TRANSFER 전송, 세션 종료");

        Ok((chunks, last_sequence))
    }

    /// 윈도우에 자리가 날 때까지 기다렸다가 청크 수용
    async fn admit(&self, chunk: Bytes) -> Result<Admitted> {
        loop {
            let result = self
                .shared
                .window
                .lock()
                .admit(&chunk, &self.codec, Instant::now());

            match result {
                Ok(admitted) => return Ok(admitted),
                Err(Error::WindowFull { in_flight, capacity }) => {
                    trace!("윈도우 가득 참 ({}/{}), 대기", in_flight, capacity);
                    self.shared.stats.write().window_full_waits += 1;

                    // ACK가 유실돼도 타임아웃마다 다시 확인한다
                    let _ = tokio::time::timeout(
                        self.config.retransmit_timeout(),
                        self.shared.slot_freed.notified(),
                    )
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 최종 ACK가 올 때까지 종료 알림 반복 전송
    async fn await_final_ack(&self, last_sequence: Sequence) -> Result<()> {
        let notice = self.codec.encode(&Message::EndOfStream { last_sequence });

        loop {
            let sent = self.shared.termination.lock().notices_sent();
            if let Some(max) = self.config.max_notice_attempts {
                if sent >= max {
                    warn!("종료 핸드쉐이크 포기: 알림 {}회 무응답", sent);
                    return Err(Error::HandshakeStalled { notices: sent });
                }
            }

            self.shared.termination.lock().notice_sent();
            self.data_channel.send_to(&notice, self.destination).await?;
            self.shared.stats.write().notices_sent += 1;
            debug!("DONE_TRANSFER|{} 전송 ({}회째)", last_sequence, sent + 1);

            if tokio::time::timeout(self.config.notice_interval(), self.shared.final_ack.notified())
                .await
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

/// ACK 채널 수신 루프
async fn ack_listener<C: DatagramChannel>(
    shared: Arc<SenderShared>,
    channel: Arc<C>,
    codec: FrameCodec,
    poll: Duration,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while shared.running.load(Ordering::Relaxed) {
        let (len, from) = match tokio::time::timeout(poll, channel.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => continue,
        };

        match codec.decode(&buf[..len]) {
            Ok(Message::Ack(ack)) => shared.on_ack(ack),
            Ok(other) => {
                debug!("ACK 채널에서 {} 메시지 무시 (from {})", other.kind(), from);
            }
            Err(e) => {
                shared.stats.write().decode_errors += 1;
                warn!("ACK 디코딩 실패 (from {}): {}", from, e);
            }
        }
    }

    Ok(())
}

/// 보조 태스크가 메인 루프보다 먼저 끝난 경우의 에러
fn task_failure(task: &str, joined: std::result::Result<Result<()>, JoinError>) -> Error {
    match joined {
        Ok(Err(e)) => {
            warn!("{} 실패: {}", task, e);
            e
        }
        Ok(Ok(())) => Error::ChannelClosed,
        Err(e) => Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} 태스크 중단: {}", task, e),
        )),
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("호스트를 찾을 수 없음: {}", host),
            ))
        })
}

/// `bytes`를 `max_payload` 청크로 나눴을 때 시퀀스 공간에 들어가는지
pub fn check_chunk_count(bytes: u64, max_payload: usize) -> Result<()> {
    let chunks = bytes.div_ceil(max_payload as u64);
    let max = Sequence::MAX as u64;
    if chunks > max {
        return Err(Error::TooManyChunks { chunks, max });
    }
    Ok(())
}

/// UDP로 파일 전송
///
/// 데이터 소켓은 임의 포트, ACK 소켓은 `destination_port + ack_port_offset`에 바인드한다.
pub async fn send_file(options: &SenderOptions, config: Config) -> Result<TransferReport> {
    let destination = resolve(&options.destination_host, options.destination_port).await?;
    let unspecified: IpAddr = if destination.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };

    let data_channel = UdpChannel::bind(SocketAddr::new(unspecified, 0)).await?;
    let ack_port = config.ack_port_for(options.destination_port);
    let ack_channel = UdpChannel::bind(SocketAddr::new(unspecified, ack_port)).await?;

    let file_len = tokio::fs::metadata(&options.source_path).await?.len();
    check_chunk_count(file_len.min(options.max_bytes), config.max_payload)?;

    let source = ByteSource::open(&options.source_path, options.max_bytes).await?;
    info!(
        "{} → {} (최대 {} bytes, ACK 포트 {})",
        options.source_path.display(),
        destination,
        options.max_bytes,
        ack_port
    );

    Sender::new(config, data_channel, ack_channel, destination)?
        .transfer(source)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{MemoryChannel, MemoryNetwork};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    /// 수신자 없이 송신자만 띄우고 ACK는 직접 주입한다
    fn sender_pair(net: &MemoryNetwork, config: Config) -> (Sender<MemoryChannel>, MemoryChannel) {
        let data = net.bind(addr("10.0.0.1:4000")).unwrap();
        let ack = net.bind(addr("10.0.0.1:9005")).unwrap();
        let peer = net.bind(addr("10.0.0.2:9000")).unwrap();
        let sender = Sender::new(config, data, ack, addr("10.0.0.2:9000")).unwrap();
        (sender, peer)
    }

    #[test]
    fn test_chunk_count_fits_sequence_space() {
        let max = Sequence::MAX as u64;
        assert!(check_chunk_count(0, 1464).is_ok());
        assert!(check_chunk_count(max * 1464, 1464).is_ok());
        assert!(matches!(
            check_chunk_count(max * 1464 + 1, 1464),
            Err(Error::TooManyChunks { chunks, .. }) if chunks == max + 1
        ));
        // 실제 파일 크기와 무관하게 상한만 큰 경우는 send_file이 min으로 거른다
        assert!(check_chunk_count(u64::MAX, 1464).is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let net = MemoryNetwork::new();
        let config = Config {
            window_capacity: 0,
            ..Config::loopback()
        };
        let data = net.bind(addr("10.0.0.1:4000")).unwrap();
        let ack = net.bind(addr("10.0.0.1:9005")).unwrap();
        assert!(Sender::new(config, data, ack, addr("10.0.0.2:9000")).is_err());
    }

    #[tokio::test]
    async fn test_empty_source_handshake() {
        let net = MemoryNetwork::new();
        let (sender, peer) = sender_pair(&net, Config::loopback());
        let codec = FrameCodec::new(Config::loopback().max_payload);
        assert_eq!(sender.phase(), SenderPhase::Transferring);

        let handle = tokio::spawn(sender.transfer(ByteSource::unbounded(&b""[..])));

        // 첫 종료 알림을 받은 뒤 최종 ACK 응답
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(
            codec.decode(&buf[..len]).unwrap(),
            Message::EndOfStream { last_sequence: -1 }
        );
        peer.send_to(&codec.encode_ack(Ack::final_ack(4)), addr("10.0.0.1:9005"))
            .await
            .unwrap();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.last_sequence, -1);
        assert_eq!(report.chunks, 0);
        assert_eq!(report.bytes_sent, 0);

        let sent = net.sent_to(addr("10.0.0.2:9000"));
        let last = codec.decode(sent.last().unwrap()).unwrap();
        assert_eq!(last, Message::Close);
    }

    #[tokio::test]
    async fn test_handshake_stalls_with_limit() {
        let net = MemoryNetwork::new();
        let config = Config {
            max_notice_attempts: Some(3),
            ..Config::loopback()
        };
        let (sender, _peer) = sender_pair(&net, config);

        let err = sender
            .transfer(ByteSource::unbounded(&b""[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeStalled { notices: 3 }));
        assert_eq!(net.sent_to(addr("10.0.0.2:9000")).len(), 3);
    }
}
