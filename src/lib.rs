//! # SARQ (Stop-And-wait ARQ)
//!
//! 점대점 비신뢰 링크 위의 stop-and-wait ARQ 신뢰성 엔진
//!
//! ## 핵심 특징
//! - **단일 미확인 프레임**: 한 번에 하나의 데이터 PDU만 ACK 대기
//! - **타임아웃 재전송**: 상한 횟수까지 동일 프레임 재전송 후 포기
//! - **기회적 ACK**: 양쪽이 동시에 보낼 때 수신 프레임에 대한 ACK를 끼워 전송
//! - **이벤트 플래그 FSM**: 비동기 생산자가 플래그를 올리고 FSM이 상태별 우선순위로 소비
//! - **저부담 코어**: FSM 한 사이클은 블로킹 없이 유한 동작만 수행

pub mod arq;
pub mod config;
pub mod error;
pub mod event;
pub mod link;
pub mod message;
pub mod node;
pub mod timer;

pub use arq::{ArqCore, ArqEvent, ArqState};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventFlag, EventFlags};
pub use link::{FrameKind, FrameSink, OutgoingFrame, RxSlots, UdpLink};
pub use message::{Pdu, PduKind};
pub use node::ArqNode;
pub use timer::RetxTimer;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x53415251; // "SARQ"

/// 기본 최대 페이로드 길이 (바이트)
pub const DEFAULT_MAX_PAYLOAD: usize = 200;

/// 기본 시퀀스 번호 모듈러스
pub const DEFAULT_SEQ_MODULUS: u8 = 8;

/// 기본 최대 재전송 횟수
pub const DEFAULT_MAX_RETRANSMISSIONS: u8 = 3;

/// 기본 재전송 타임아웃 (밀리초)
pub const DEFAULT_RETX_TIMEOUT_MS: u64 = 1500;
