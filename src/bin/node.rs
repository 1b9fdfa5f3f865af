//! SARQ 노드 - Stop-And-wait ARQ
//!
//! 점대점 비신뢰 링크 위 stop-and-wait 신뢰성 노드
//! - 콘솔에서 한 줄 입력 = SDU 하나
//! - 수신 메시지와 프로토콜 수명주기(송신/ACK/타임아웃/재전송/포기) 출력
//!
//! 사용법:
//!   cargo run --release --bin sarq-node -- [OPTIONS]
//!
//! 예시:
//!   # 두 터미널에서 맞물려 실행
//!   cargo run --release --bin sarq-node -- --id 1 --peer-id 2 --bind 127.0.0.1:9001 --peer 127.0.0.1:9002
//!   cargo run --release --bin sarq-node -- --id 2 --peer-id 1 --bind 127.0.0.1:9002 --peer 127.0.0.1:9001
//!
//!   # 30% 인위 손실로 재전송 경로 시험
//!   cargo run --release --bin sarq-node -- -i 1 -p 2 -b 127.0.0.1:9001 --peer 127.0.0.1:9002 --loss 0.3

use std::io::Write;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sarq::{ArqEvent, ArqNode, Config, Error};

/// 노드 실행 설정
struct NodeArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    config: Config,
}

impl Default for NodeArgs {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9001".parse().unwrap(),
            peer_addr: "127.0.0.1:9002".parse().unwrap(),
            config: Config::new(1, 2),
        }
    }
}

fn parse_args() -> NodeArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut node_args = NodeArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    node_args.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--peer" => {
                if i + 1 < args.len() {
                    node_args.peer_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--id" | "-i" => {
                if i + 1 < args.len() {
                    node_args.config.local_id = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--peer-id" | "-p" => {
                if i + 1 < args.len() {
                    node_args.config.peer_id = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout-ms" => {
                if i + 1 < args.len() {
                    node_args.config.retx_timeout_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-retx" => {
                if i + 1 < args.len() {
                    node_args.config.max_retransmissions =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    node_args.config.loss_rate = args[i + 1].parse().expect("유효한 비율 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"SARQ Node - Stop-And-wait ARQ 노드

점대점 비신뢰 링크 위 stop-and-wait 신뢰성 노드
- 콘솔 한 줄이 SDU 하나로 제출됨
- 미확인 프레임은 타임아웃 시 상한까지 재전송 후 포기

사용법:
  cargo run --release --bin sarq-node -- [OPTIONS]

옵션:
  -b, --bind <ADDR>      로컬 바인드 주소 (기본: 127.0.0.1:9001)
      --peer <ADDR>      상대 노드 주소 (기본: 127.0.0.1:9002)
  -i, --id <ID>          로컬 노드 ID (기본: 1)
  -p, --peer-id <ID>     상대 노드 ID (기본: 2)
      --timeout-ms <MS>  재전송 타임아웃 (기본: 1500)
      --max-retx <N>     최대 재전송 횟수 (기본: 3)
      --loss <RATIO>     송신 인위 손실률 0.0~1.0 (테스트용, 기본: 0.0)
  -h, --help             이 도움말 출력

예시:
  # 두 터미널에서 맞물려 실행
  cargo run --release --bin sarq-node -- -i 1 -p 2 -b 127.0.0.1:9001 --peer 127.0.0.1:9002
  cargo run --release --bin sarq-node -- -i 2 -p 1 -b 127.0.0.1:9002 --peer 127.0.0.1:9001
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    node_args
}

fn print_prompt() {
    print!("Give a word to send : ");
    let _ = std::io::stdout().flush();
}

fn print_event(event: &ArqEvent) {
    match event {
        ArqEvent::MessageReceived { src_id, seq, payload } => {
            println!(
                "\n-------------------------------------------------\nRCVD from {} : {} (length:{}, seq:{})\n-------------------------------------------------",
                src_id,
                String::from_utf8_lossy(payload),
                payload.len(),
                seq
            );
        }
        ArqEvent::SendStarted { seq, dest_id } => {
            println!("[ARQ] sending to {} (seq:{})", dest_id, seq);
        }
        ArqEvent::AckSent { seq } => {
            println!("[ARQ] ACK sent (seq:{})", seq);
        }
        ArqEvent::AckReceived { seq } => {
            println!("[ARQ] ACK received for seq {}", seq);
            print_prompt();
        }
        ArqEvent::Timeout { seq } => {
            println!("[ARQ] timeout! (seq:{})", seq);
        }
        ArqEvent::Retransmit { seq, attempt } => {
            println!("[ARQ] retransmission {} (seq:{})", attempt, seq);
        }
        ArqEvent::GiveUp { seq } => {
            println!("[ARQ] max retransmission, give up (seq:{})", seq);
            print_prompt();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();
    let max_payload = args.config.max_payload_len;

    println!("------------------ SARQ protocol starts! ------------------");
    info!(
        "node id {}, peer id {}, bind {}, peer {}",
        args.config.local_id, args.config.peer_id, args.bind_addr, args.peer_addr
    );

    let (node, mut events) = ArqNode::bind(args.config, args.bind_addr, args.peer_addr).await?;

    // 수명주기 알림 출력 태스크
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    // 콘솔 입력 루프: 한 줄 = SDU 하나
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    print_prompt();
    while let Some(line) = lines.next_line().await? {
        let mut word = line.into_bytes();
        if word.is_empty() {
            print_prompt();
            continue;
        }
        if word.len() > max_payload {
            // 초과분은 잘라서 제출 (코어는 초과 SDU를 보지 않음)
            word.truncate(max_payload);
            println!("max reached! word forced to be ready");
        }

        match node.submit(&word) {
            Ok(()) => {
                println!("word is ready! ::: {}", String::from_utf8_lossy(&word));
            }
            Err(Error::SendPending) => {
                println!("previous word still in flight, try again");
            }
            Err(e) => {
                println!("submit failed: {}", e);
            }
        }
    }

    node.shutdown();
    Ok(())
}
