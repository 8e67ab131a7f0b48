//! 수신 엔진
//!
//! - 리스너 태스크: 데이터그램을 받아 명령 채널로 전달
//! - flush 타이머 태스크: 주기적으로 `Flush` 명령 전달
//! - 메인 처리 루프: 수신 윈도우와 싱크를 단독 소유 (수용과 flush가 직렬화됨)
//!
//! ACK는 데이터 소켓에서 `(송신자 IP, ack_port)`로 보낸다.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

use crate::channel::{DatagramChannel, UdpChannel};
use crate::config::{Config, ReceiverOptions};
use crate::frame::{Ack, DataFrame, FrameCodec, Message};
use crate::recv_window::{Intake, ReceiveWindow};
use crate::stats::TransferStats;
use crate::stream::ByteSink;
use crate::termination::{ReceiverPhase, ReceiverTermination};
use crate::{Error, Result, Sequence, MAX_DATAGRAM};

/// 수신 완료 보고
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    /// 싱크에 기록한 바이트 수
    pub bytes_written: u64,

    /// 종료 알림으로 받은 마지막 시퀀스 (알림 없이 끝났으면 None)
    pub last_sequence: Option<Sequence>,

    pub stats: TransferStats,
}

/// 내부 명령
enum ReceiverCmd {
    Datagram(Bytes, SocketAddr),
    Flush,
    Failed(Error),
}

/// 수신자 내부 상태 (단일 태스크에서만 접근)
struct ReceiverInner<'a, C, W> {
    config: &'a Config,
    codec: FrameCodec,
    channel: Arc<C>,
    ack_port: u16,
    window: ReceiveWindow,
    termination: ReceiverTermination,
    sink: &'a mut ByteSink<W>,
    stats: TransferStats,

    /// 가장 최근 데이터그램의 송신 IP (ACK 목적지)
    peer: Option<IpAddr>,
    last_datagram_at: Instant,
}

impl<'a, C, W> ReceiverInner<'a, C, W>
where
    C: DatagramChannel,
    W: AsyncWrite + Unpin + Send,
{
    fn new(config: &'a Config, channel: Arc<C>, ack_port: u16, sink: &'a mut ByteSink<W>) -> Self {
        Self {
            codec: FrameCodec::new(config.max_payload),
            window: ReceiveWindow::new(config.window_capacity),
            termination: ReceiverTermination::new(),
            stats: TransferStats::new(),
            peer: None,
            last_datagram_at: Instant::now(),
            config,
            channel,
            ack_port,
            sink,
        }
    }

    async fn run_loop(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<ReceiverCmd>,
        running: &AtomicBool,
        snapshot: &RwLock<TransferStats>,
    ) -> Result<()> {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                ReceiverCmd::Datagram(bytes, from) => {
                    self.last_datagram_at = Instant::now();
                    self.handle_datagram(&bytes, from).await?;
                }
                ReceiverCmd::Flush => {
                    self.flush_ready().await?;
                    self.check_linger();
                }
                ReceiverCmd::Failed(e) => return Err(e),
            }

            // 통계 업데이트
            *snapshot.write().await = self.stats.clone();

            if self.termination.phase() == ReceiverPhase::Closed {
                return Ok(());
            }
        }

        // 정지 요청이 아니면 내부 태스크가 사라진 것
        if running.load(Ordering::SeqCst) {
            Err(Error::ChannelClosed)
        } else {
            Ok(())
        }
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("디코딩 실패 (from {}, {} bytes): {}", from, bytes.len(), e);
                return Ok(());
            }
        };
        self.peer = Some(from.ip());

        match message {
            Message::Data(frame) => self.handle_data(frame).await,
            Message::EndOfStream { last_sequence } => self.handle_end_of_stream(last_sequence).await,
            Message::Close => {
                info!(
                    "CLOSE_TRANSFER 수신 (next_flush={})",
                    self.window.next_flush_sequence()
                );
                self.termination.on_close();
                Ok(())
            }
            Message::Ack(ack) => {
                debug!("데이터 포트로 온 ACK 무시: seq={} (from {})", ack.sequence, from);
                Ok(())
            }
        }
    }

    async fn handle_data(&mut self, frame: DataFrame) -> Result<()> {
        self.stats.frames_received += 1;
        let sequence = frame.sequence;

        match self.window.on_data_frame(sequence, frame.payload) {
            Intake::Stored { available } => {
                debug!("Received seq={} (available={})", sequence, available);
                self.send_ack(Ack::new(sequence, available as u32)).await?;
            }
            Intake::Duplicate { available } => {
                self.stats.duplicate_frames += 1;
                trace!("중복 프레임 seq={}, 재확인", sequence);
                self.send_ack(Ack::new(sequence, available as u32)).await?;
            }
            Intake::NoCapacity => {
                self.stats.dropped_no_capacity += 1;
                debug!("여유 슬롯 없음, seq={} 폐기", sequence);
            }
            Intake::Collision { occupant } => {
                self.stats.slot_collisions += 1;
                warn!(
                    "슬롯 충돌: seq={}가 seq={} 자리와 겹침, 폐기",
                    sequence, occupant
                );
            }
            Intake::OutOfWindow => {
                self.stats.dropped_out_of_window += 1;
                debug!(
                    "윈도우 밖 seq={} (next_flush={}), 폐기",
                    sequence,
                    self.window.next_flush_sequence()
                );
            }
        }

        // 연속 구간이 생겼으면 바로 내보낸다
        self.flush_ready().await
    }

    async fn handle_end_of_stream(&mut self, last_sequence: Sequence) -> Result<()> {
        if self.termination.last_sequence().is_none() {
            info!(
                "DONE_TRANSFER|{} 수신 (next_flush={})",
                last_sequence,
                self.window.next_flush_sequence()
            );
        }

        self.flush_ready().await?;

        let next_flush = self.window.next_flush_sequence();
        if self.termination.on_end_of_stream(last_sequence, next_flush) {
            debug!("최종 ACK 전송 (last_seq={})", last_sequence);
            let window = self.window.available_slots() as u32;
            self.send_ack(Ack::final_ack(window)).await?;
        }
        Ok(())
    }

    /// 연속 구간을 싱크에 쓰고 시퀀스마다 ACK
    async fn flush_ready(&mut self) -> Result<()> {
        let ready = self.window.drain_ready();
        if ready.is_empty() {
            return Ok(());
        }

        for slot in &ready {
            self.sink.append(&slot.payload).await?;
            self.stats.bytes_flushed += slot.payload.len() as u64;
        }
        self.sink.flush().await?;

        let window = self.window.available_slots() as u32;
        for slot in &ready {
            self.send_ack(Ack::new(slot.sequence, window)).await?;
        }

        trace!(
            "flush {}개, next_flush={}",
            ready.len(),
            self.window.next_flush_sequence()
        );
        Ok(())
    }

    async fn send_ack(&mut self, ack: Ack) -> Result<()> {
        let Some(ip) = self.peer else {
            return Ok(());
        };
        let destination = SocketAddr::new(ip, self.ack_port);
        self.channel
            .send_to(&self.codec.encode_ack(ack), destination)
            .await?;
        self.stats.acks_sent += 1;
        Ok(())
    }

    /// CLOSE_TRANSFER가 유실된 경우 스스로 닫는다.
    /// DRAINING은 `last`까지 모두 내보낸 뒤에만 되므로 미완료 상태로 닫히지 않는다.
    fn check_linger(&mut self) {
        if self.termination.phase() != ReceiverPhase::Draining {
            return;
        }
        let idle = self.last_datagram_at.elapsed();
        if idle >= self.config.drain_linger() {
            info!("CLOSE_TRANSFER 없이 {:?} 경과, 수신 종료", idle);
            self.termination.on_close();
        }
    }
}

/// 수신자
pub struct Receiver<C> {
    config: Config,
    channel: Arc<C>,
    ack_port: u16,
    stats: Arc<RwLock<TransferStats>>,
    running: Arc<AtomicBool>,
}

impl<C: DatagramChannel> Receiver<C> {
    /// 새 수신자 생성. ACK는 송신자 IP의 `ack_port`로 간다.
    pub fn new(config: Config, channel: C, ack_port: u16) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            channel: Arc::new(channel),
            ack_port,
            stats: Arc::new(RwLock::new(TransferStats::new())),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 한 세션을 CLOSED까지 수신
    pub async fn run<W>(&self, sink: &mut ByteSink<W>) -> Result<ReceiveReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.running.store(true, Ordering::SeqCst);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ReceiverCmd>(self.config.command_queue_size);

        info!(
            "SWP Receiver started on {} (ACK port {})",
            self.channel.local_addr()?,
            self.ack_port
        );

        let listener = tokio::spawn(listen(
            self.channel.clone(),
            cmd_tx.clone(),
            self.running.clone(),
            self.config.recv_poll(),
        ));
        let ticker = tokio::spawn(flush_ticker(
            cmd_tx,
            self.running.clone(),
            self.config.flush_interval(),
        ));

        let mut inner = ReceiverInner::new(&self.config, self.channel.clone(), self.ack_port, sink);
        let result = inner
            .run_loop(&mut cmd_rx, &self.running, &self.stats)
            .await;

        self.running.store(false, Ordering::SeqCst);
        listener.abort();
        ticker.abort();
        result?;

        inner.sink.flush().await?;
        let stats = inner.stats.clone();
        *self.stats.write().await = stats.clone();
        info!("수신 완료: {}", stats.receiver_summary());

        Ok(ReceiveReport {
            bytes_written: inner.sink.bytes_written(),
            last_sequence: inner.termination.last_sequence(),
            stats,
        })
    }

    /// 정지 요청. 진행 중인 `run`은 에러 없이 반환된다.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 통계 스냅샷
    pub async fn get_stats(&self) -> TransferStats {
        self.stats.read().await.clone()
    }
}

/// 수신 태스크
async fn listen<C: DatagramChannel>(
    channel: Arc<C>,
    cmd_tx: mpsc::Sender<ReceiverCmd>,
    running: Arc<AtomicBool>,
    poll: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(poll, channel.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let datagram = Bytes::copy_from_slice(&buf[..len]);
                if cmd_tx.send(ReceiverCmd::Datagram(datagram, from)).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!("수신 에러: {}", e);
                let _ = cmd_tx.send(ReceiverCmd::Failed(e)).await;
                break;
            }
            Err(_) => {
                // 타임아웃, 계속
            }
        }
    }
}

/// flush 타이머 태스크
async fn flush_ticker(cmd_tx: mpsc::Sender<ReceiverCmd>, running: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if cmd_tx.send(ReceiverCmd::Flush).await.is_err() {
            break;
        }
    }
}

/// UDP로 파일 수신
///
/// `listen_port`에서 데이터를 받고 ACK는 송신자의 `listen_port + ack_port_offset`으로 보낸다.
pub async fn receive_file(options: &ReceiverOptions, config: Config) -> Result<ReceiveReport> {
    let bind_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), options.listen_port);
    let channel = UdpChannel::bind(bind_addr).await?;
    let ack_port = config.ack_port_for(options.listen_port);

    let mut sink = ByteSink::create(&options.destination_path).await?;
    info!("→ {}", options.destination_path.display());

    Receiver::new(config, channel, ack_port)?.run(&mut sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{MemoryChannel, MemoryNetwork};

    const RECEIVER: &str = "10.0.0.2:9000";
    const PEER_DATA: &str = "10.0.0.1:4000";
    const PEER_ACKS: &str = "10.0.0.1:9005";

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn config() -> Config {
        Config {
            window_capacity: 4,
            max_payload: 10,
            ..Config::loopback()
        }
    }

    /// 송신자 역할을 손으로 하는 피어
    struct Peer {
        data: MemoryChannel,
        acks: MemoryChannel,
        codec: FrameCodec,
    }

    impl Peer {
        fn bind(net: &MemoryNetwork) -> Self {
            Self {
                data: net.bind(addr(PEER_DATA)).unwrap(),
                acks: net.bind(addr(PEER_ACKS)).unwrap(),
                codec: FrameCodec::new(10),
            }
        }

        async fn send(&self, message: Message) {
            let bytes = self.codec.encode(&message);
            self.data.send_to(&bytes, addr(RECEIVER)).await.unwrap();
        }

        async fn data(&self, sequence: Sequence, payload: &[u8]) {
            self.send(Message::Data(DataFrame::new(sequence, Bytes::copy_from_slice(payload))))
                .await;
        }

        /// 잠시 기다리며 도착한 ACK를 모두 수집
        async fn collect_acks(&self, wait: Duration) -> Vec<Ack> {
            let mut acks = Vec::new();
            let mut buf = [0u8; 64];
            while let Ok(result) = tokio::time::timeout(wait, self.acks.recv_from(&mut buf)).await {
                let (len, _) = result.unwrap();
                match self.codec.decode(&buf[..len]).unwrap() {
                    Message::Ack(ack) => acks.push(ack),
                    other => panic!("unexpected {:?}", other),
                }
            }
            acks
        }
    }

    type Outcome = Result<(ReceiveReport, Vec<u8>)>;

    fn spawn_receiver(net: &MemoryNetwork, config: Config) -> tokio::task::JoinHandle<Outcome> {
        let channel = net.bind(addr(RECEIVER)).unwrap();
        let receiver = Receiver::new(config, channel, 9005).unwrap();
        tokio::spawn(async move {
            let mut sink = ByteSink::new(Vec::new());
            let report = receiver.run(&mut sink).await?;
            Ok((report, sink.into_inner()))
        })
    }

    #[tokio::test]
    async fn test_reorders_before_flush() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let handle = spawn_receiver(&net, config());

        peer.data(1, b"bbbbbbbbbb").await;
        peer.data(2, b"ccccc").await;
        let acks = peer.collect_acks(Duration::from_millis(30)).await;
        assert_eq!(acks, vec![Ack::new(1, 3), Ack::new(2, 2)]);

        peer.data(0, b"aaaaaaaaaa").await;
        let acks = peer.collect_acks(Duration::from_millis(30)).await;
        // 수용 ACK 후 한 번의 flush로 0, 1, 2
        assert_eq!(
            acks,
            vec![Ack::new(0, 1), Ack::new(0, 4), Ack::new(1, 4), Ack::new(2, 4)]
        );

        peer.send(Message::EndOfStream { last_sequence: 2 }).await;
        let acks = peer.collect_acks(Duration::from_millis(30)).await;
        assert_eq!(acks, vec![Ack::final_ack(4)]);

        peer.send(Message::Close).await;
        let (report, data) = handle.await.unwrap().unwrap();
        assert_eq!(data, b"aaaaaaaaaabbbbbbbbbbccccc");
        assert_eq!(report.bytes_written, 25);
        assert_eq!(report.last_sequence, Some(2));
    }

    #[tokio::test]
    async fn test_final_ack_waits_for_last_flush() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let handle = spawn_receiver(&net, config());

        peer.data(0, b"0123456789").await;
        peer.data(1, b"0123456789").await;
        // 마지막 청크보다 알림이 먼저 도착
        peer.send(Message::EndOfStream { last_sequence: 2 }).await;
        let acks = peer.collect_acks(Duration::from_millis(40)).await;
        assert!(acks.iter().all(|ack| !ack.is_final()));

        peer.data(2, b"xyz").await;
        peer.send(Message::EndOfStream { last_sequence: 2 }).await;
        let acks = peer.collect_acks(Duration::from_millis(40)).await;
        assert_eq!(acks.last(), Some(&Ack::final_ack(4)));

        peer.send(Message::Close).await;
        let (report, data) = handle.await.unwrap().unwrap();
        assert_eq!(data.len(), 23);
        assert_eq!(report.stats.bytes_flushed, 23);
    }

    #[tokio::test]
    async fn test_duplicate_is_reacked_but_written_once() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let handle = spawn_receiver(&net, config());

        peer.data(0, b"once").await;
        peer.data(0, b"once").await;
        let acks = peer.collect_acks(Duration::from_millis(30)).await;
        assert_eq!(acks, vec![Ack::new(0, 3), Ack::new(0, 4), Ack::new(0, 4)]);

        peer.send(Message::EndOfStream { last_sequence: 0 }).await;
        peer.send(Message::Close).await;
        let (report, data) = handle.await.unwrap().unwrap();
        assert_eq!(data, b"once");
        assert_eq!(report.stats.duplicate_frames, 1);
    }

    #[tokio::test]
    async fn test_empty_session_and_garbage() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let handle = spawn_receiver(&net, config());

        peer.data.send_to(&[1, 2, 3], addr(RECEIVER)).await.unwrap();
        peer.send(Message::EndOfStream { last_sequence: -1 }).await;
        let acks = peer.collect_acks(Duration::from_millis(30)).await;
        assert_eq!(acks, vec![Ack::final_ack(4)]);

        peer.send(Message::Close).await;
        let (report, data) = handle.await.unwrap().unwrap();
        assert!(data.is_empty());
        assert_eq!(report.last_sequence, Some(-1));
        assert_eq!(report.stats.decode_errors, 1);
    }

    #[tokio::test]
    async fn test_drain_linger_closes_without_close_notice() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let config = Config {
            drain_linger_ms: 50,
            ..config()
        };
        let handle = spawn_receiver(&net, config);

        peer.data(0, b"tail").await;
        peer.send(Message::EndOfStream { last_sequence: 0 }).await;

        let (report, data) = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("receiver should close on its own")
            .unwrap()
            .unwrap();
        assert_eq!(data, b"tail");
        assert_eq!(report.last_sequence, Some(0));
    }

    #[tokio::test]
    async fn test_linger_waits_for_missing_chunks() {
        let net = MemoryNetwork::new();
        let peer = Peer::bind(&net);
        let config = Config {
            drain_linger_ms: 50,
            ..config()
        };
        let channel = net.bind(addr(RECEIVER)).unwrap();
        let receiver = Arc::new(Receiver::new(config, channel, 9005).unwrap());
        let running = receiver.clone();
        let handle = tokio::spawn(async move {
            let mut sink = ByteSink::new(Vec::new());
            let report = running.run(&mut sink).await?;
            Ok::<_, Error>((report, sink.into_inner()))
        });

        // 알림이 1, 2보다 먼저 도착한 뒤 linger보다 긴 침묵
        peer.data(0, b"0123456789").await;
        peer.send(Message::EndOfStream { last_sequence: 2 }).await;
        let acks = peer.collect_acks(Duration::from_millis(300)).await;
        assert!(acks.iter().all(|ack| !ack.is_final()));
        assert!(receiver.is_running());
        assert!(!handle.is_finished());

        peer.data(2, b"xyz").await;
        peer.data(1, b"abcdefghij").await;
        peer.send(Message::EndOfStream { last_sequence: 2 }).await;
        let acks = peer.collect_acks(Duration::from_millis(40)).await;
        assert_eq!(acks.last(), Some(&Ack::final_ack(4)));

        // 이제 DRAINING이므로 CLOSE_TRANSFER 없이도 닫힌다
        let (report, data) = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("receiver should close after draining")
            .unwrap()
            .unwrap();
        assert_eq!(data, b"0123456789abcdefghijxyz");
        assert_eq!(report.last_sequence, Some(2));
    }

    #[tokio::test]
    async fn test_stop_ends_run() {
        let net = MemoryNetwork::new();
        let channel = net.bind(addr(RECEIVER)).unwrap();
        let receiver = Arc::new(Receiver::new(config(), channel, 9005).unwrap());

        let running = receiver.clone();
        let handle = tokio::spawn(async move {
            let mut sink = ByteSink::new(Vec::new());
            running.run(&mut sink).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(receiver.is_running());
        receiver.stop();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.bytes_written, 0);
        assert_eq!(report.last_sequence, None);
        assert!(!receiver.is_running());
        assert_eq!(receiver.get_stats().await.frames_received, 0);
    }
}
