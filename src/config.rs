//! 프로토콜 설정

use std::time::Duration;

use crate::{DEFAULT_MAX_PAYLOAD, DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_RETX_TIMEOUT_MS, DEFAULT_SEQ_MODULUS};

/// SARQ 세션 설정
///
/// 시작 시 한 번 공급되며 세션 동안 불변
#[derive(Debug, Clone)]
pub struct Config {
    /// 로컬 노드 ID
    pub local_id: u8,

    /// 상대 노드 ID (점대점이므로 하나)
    pub peer_id: u8,

    /// 최대 재전송 횟수 (도달 시 프레임 포기)
    pub max_retransmissions: u8,

    /// 시퀀스 번호 모듈러스
    pub seq_modulus: u8,

    /// 최대 페이로드 길이 (바이트)
    pub max_payload_len: usize,

    /// 재전송 타임아웃 (밀리초)
    pub retx_timeout_ms: u64,

    /// 송신 프레임 인위 손실률 (0.0 ~ 1.0, 테스트용)
    pub loss_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_id: 1,
            peer_id: 0,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            seq_modulus: DEFAULT_SEQ_MODULUS,
            max_payload_len: DEFAULT_MAX_PAYLOAD,
            retx_timeout_ms: DEFAULT_RETX_TIMEOUT_MS,
            loss_rate: 0.0,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new(local_id: u8, peer_id: u8) -> Self {
        Self {
            local_id,
            peer_id,
            ..Self::default()
        }
    }

    /// 재전송 타임아웃을 Duration으로 반환
    pub fn retx_timeout(&self) -> Duration {
        Duration::from_millis(self.retx_timeout_ms)
    }

    /// 불안정한 링크용 설정 (짧은 타임아웃, 많은 재시도)
    pub fn unstable_link(local_id: u8, peer_id: u8) -> Self {
        Self {
            local_id,
            peer_id,
            max_retransmissions: 6,
            retx_timeout_ms: 800,
            ..Self::default()
        }
    }
}
