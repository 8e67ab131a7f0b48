//! SWP 수신자
//!
//! `<port>`에서 한 세션을 받아 `<file>`에 기록한다 (기존 내용은 절단).
//! ACK는 송신자 IP의 `<port> + 5`로 보낸다.
//!
//! 사용법:
//!   cargo run --release --bin swp-receiver -- <port> <file> [OPTIONS]

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swp::{receive_file, Config, ReceiverOptions};

const USAGE: &str = r#"SWP Receiver - Sliding Window Protocol 수신자

사용법:
  swp-receiver <port> <file> [OPTIONS]

인자:
  <port>                  데이터 수신 포트 (ACK는 송신자의 <port>+5 로 전송)
  <file>                  저장할 파일 (생성 또는 절단)

옵션:
  --preset <NAME>         default | loopback | unstable
  --window <N>            윈도우 슬롯 수 (기본: 40, 송신자와 같아야 함)
  --payload <N>           프레임당 최대 페이로드 (기본: 1464, 송신자와 같아야 함)
  --linger-ms <MS>        종료 알림 후 CLOSE 대기 시간 (기본: 5000)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#;

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} 값이 필요함", name))?;
    value
        .parse()
        .map_err(|_| format!("{}: 유효한 숫자 필요 ({})", name, value))
}

fn parse_args(args: &[String]) -> Result<(ReceiverOptions, Config), String> {
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
            flag @ ("--preset" | "--window" | "--payload" | "--linger-ms") => {
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

    for (flag, value) in overrides {
        match flag {
            "--window" => config.window_capacity = parse_number(flag, Some(value))?,
            "--payload" => config.max_payload = parse_number(flag, Some(value))?,
            "--linger-ms" => config.drain_linger_ms = parse_number(flag, Some(value))?,
            _ => {}
        }
    }

    if positional.len() != 2 {
        return Err(format!("인자 2개가 필요함 (받은 개수: {})", positional.len()));
    }

    let options = ReceiverOptions {
        listen_port: parse_number("<port>", positional.first())?,
        destination_path: PathBuf::from(&positional[1]),
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

    match receive_file(&options, config).await {
        Ok(report) => {
            info!(
                "{} bytes 수신 완료 → {}",
                report.bytes_written,
                options.destination_path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("수신 실패: {}", e);
            Err(e.into())
        }
    }
}
