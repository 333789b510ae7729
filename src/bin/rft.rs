//! RFT - Rate-adaptive File Transfer
//!
//! 주소를 주면 클라이언트(송신), 없으면 서버(수신)로 동작.
//!
//! 사용법:
//!   cargo run --release --bin rft -- [ADDR] [OPTIONS]
//!
//! 예시:
//!   # 서버: 받은 파일을 downloads/에 저장
//!   cargo run --release --bin rft -- -o downloads
//!
//!   # 클라이언트: report.csv 전송
//!   cargo run --release --bin rft -- 192.168.0.10 -f report.csv

use std::io::{self, BufRead, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rft::{Config, Node, Role, UdpConnection};

/// 실행 설정
struct Args {
    server: Option<SocketAddr>,
    file: Option<PathBuf>,
    output_dir: PathBuf,
    verbose: bool,
    config: Config,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            server: None,
            file: None,
            output_dir: PathBuf::from("."),
            verbose: false,
            config: Config::default(),
        }
    }
}

/// `a.b.c.d` 또는 `a.b.c.d:port`
fn parse_server_addr(value: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    value
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, default_port)))
}

fn print_help() {
    println!(
        r#"RFT - Rate-adaptive File Transfer

RTT 기반 흐름 제어를 하는 UDP 가상 연결 위의 파일 전송
- ADDR을 주면 클라이언트: 파일 하나를 서버로 전송
- ADDR이 없으면 서버: 받은 파일을 출력 디렉터리에 저장

사용법:
  cargo run --release --bin rft -- [ADDR] [OPTIONS]

인자:
  ADDR                    서버 주소 (a.b.c.d 또는 a.b.c.d:port, 기본 포트 30000)

옵션:
  -f, --file <PATH>       전송할 파일 (클라이언트, 없으면 입력 받음)
  -o, --output-dir <DIR>  저장 디렉터리 (서버, 기본: .)
  --unstable              불안정 네트워크 프리셋 사용
  -v, --verbose           디버그 로그 (연결 통계 포함)
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 필터 (예: rft=trace)

예시:
  # 서버
  cargo run --release --bin rft -- -o downloads

  # 클라이언트
  cargo run --release --bin rft -- 127.0.0.1 -f report.csv
"#
    );
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--output-dir" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--unstable" => {
                parsed.config = Config::unstable_network();
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            value => match parse_server_addr(value, parsed.config.server_port) {
                Some(addr) => parsed.server = Some(addr),
                None => {
                    eprintln!("Unknown argument: {}", value);
                    std::process::exit(2);
                }
            },
        }
        i += 1;
    }

    parsed
}

/// 파일 이름을 표준 입력으로 받음
fn prompt_filename() -> io::Result<PathBuf> {
    print!("Enter the filename to send: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(PathBuf::from(line.trim()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.config;
    let role = match args.server {
        Some(server) => {
            let file = match args.file {
                Some(file) => file,
                None => prompt_filename()?,
            };
            info!("RFT client starting...");
            info!("Server: {}", server);
            info!("File: {:?}", file);
            Role::Client { server, file }
        }
        None => {
            info!("RFT server starting...");
            info!("Output directory: {:?}", args.output_dir);
            Role::Server {
                output_dir: args.output_dir,
            }
        }
    };
    info!("Tick: {:.1}ms", config.delta_time * 1000.0);
    info!("Connection timeout: {:.1}s", config.connection_timeout);

    let connection = UdpConnection::new(&config);
    let mut node = Node::new(config, role, connection);

    if let Err(e) = node.start().await {
        error!("Could not start connection: {}", e);
        std::process::exit(1);
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(e) = node.run(shutdown).await {
        error!("Stopped: {}", e);
        std::process::exit(1);
    }

    info!("Bye");
    Ok(())
}
