//! SWP 송신자
//!
//! 파일의 앞부분 최대 `<bytes>` 바이트를 `<host>:<port>`로 전송한다.
//! ACK는 이 호스트의 `<port> + 5`에서 받는다.
//!
//! 사용법:
//!   cargo run --release --bin swp-sender -- <host> <port> <file> <bytes> [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin swp-sender -- 127.0.0.1 9000 data.bin 1048576
//!   cargo run --release --bin swp-sender -- 10.0.0.2 9000 data.bin 1048576 --preset unstable

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swp::{send_file, Config, SenderOptions};

const USAGE: &str = r#"SWP Sender - Sliding Window Protocol 송신자

사용법:
  swp-sender <host> <port> <file> <bytes> [OPTIONS]

인자:
  <host>                  수신자 호스트명 또는 IP
  <port>                  수신자 데이터 포트 (ACK는 <port>+5 에서 수신)
  <file>                  보낼 파일
  <bytes>                 최대 전송 바이트 (파일이 짧으면 파일 끝까지)

옵션:
  --preset <NAME>         default | loopback | unstable
  --window <N>            윈도우 슬롯 수 (기본: 40, 수신자와 같아야 함)
  --payload <N>           프레임당 최대 페이로드 (기본: 1464, 수신자와 같아야 함)
  --timeout-ms <MS>       재전송 타임아웃 (기본: 2000)
  --backoff               재전송마다 타임아웃 두 배 (상한 --max-timeout-ms)
  --max-timeout-ms <MS>   백오프 상한 (기본: 16000)
  --max-notices <N>       종료 알림 최대 시도 횟수 (기본: 무제한)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#;

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} 값이 필요함", name))?;
    value
        .parse()
        .map_err(|_| format!("{}: 유효한 숫자 필요 ({})", name, value))
}

fn parse_args(args: &[String]) -> Result<(SenderOptions, Config), String> {
    let mut positional = Vec::new();
    let mut config = Config::default();
    let mut overrides: Vec<(&str, &String)> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            "--backoff" => overrides.push(("--backoff", &args[i])),
            flag @ ("--preset" | "--window" | "--payload" | "--timeout-ms" | "--max-timeout-ms"
            | "--max-notices") => {
                let value = args.get(i + 1).ok_or_else(|| format!("{} 값이 필요함", flag))?;
                if flag == "--preset" {
                    config = match value.as_str() {
                        "default" => Config::default(),
                        "loopback" => Config::loopback(),
                        "unstable" => Config::unstable_network(),
                        other => return Err(format!("알 수 없는 preset: {}", other)),
                    };
                } else {
                    overrides.push((flag, value));
                }
                i += 1;
            }
            other if other.starts_with('-') => return Err(format!("알 수 없는 옵션: {}", other)),
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    // preset 위치와 무관하게 개별 옵션이 우선
    for (flag, value) in overrides {
        match flag {
            "--backoff" => config.retransmit_backoff = true,
            "--window" => config.window_capacity = parse_number(flag, Some(value))?,
            "--payload" => config.max_payload = parse_number(flag, Some(value))?,
            "--timeout-ms" => config.retransmit_timeout_ms = parse_number(flag, Some(value))?,
            "--max-timeout-ms" => config.max_retransmit_timeout_ms = parse_number(flag, Some(value))?,
            "--max-notices" => config.max_notice_attempts = Some(parse_number(flag, Some(value))?),
            _ => {}
        }
    }

    if positional.len() != 4 {
        return Err(format!("인자 4개가 필요함 (받은 개수: {})", positional.len()));
    }

    let options = SenderOptions {
        destination_host: positional[0].clone(),
        destination_port: parse_number("<port>", positional.get(1))?,
        source_path: PathBuf::from(&positional[2]),
        max_bytes: parse_number("<bytes>", positional.get(3))?,
    };
    config.validate().map_err(|e| e.to_string())?;

    Ok((options, config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let (options, config) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    match send_file(&options, config).await {
        Ok(report) => {
            info!(
                "{} bytes 전송 완료 ({} chunks, last_seq={})",
                report.bytes_sent, report.chunks, report.last_sequence
            );
            Ok(())
        }
        Err(e) => {
            error!("전송 실패: {}", e);
            Err(e.into())
        }
    }
}
