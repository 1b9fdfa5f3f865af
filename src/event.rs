//! 이벤트 플래그 레지스트리
//!
//! 비동기 생산자(링크 수신/송신 완료, 타이머, 입력)가 올리고
//! FSM만 내리는 에지 트리거 단일 비트 신호 집합.
//! FSM이 처리 후 명시적으로 내리지 않으면 다음 사이클에 다시 처리됨.

use std::sync::atomic::{AtomicBool, Ordering};

/// 이벤트 플래그 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlag {
    /// 데이터 PDU 수신됨
    DataReceived,

    /// 애플리케이션 송신 요청 준비됨
    SendRequested,

    /// 데이터 프레임 송신 완료 (링크 로컬 확인)
    SendCompleted,

    /// ACK 프레임 송신 완료
    AckSendCompleted,

    /// ACK PDU 수신됨
    AckReceived,

    /// 재전송 타이머 만료
    TimeoutFired,
}

/// 이벤트 플래그 레지스트리
///
/// 비트 단위 원자성만 보장. 플래그 간 순서는 FSM의 상태별
/// 검사 우선순위가 부여한다.
#[derive(Debug, Default)]
pub struct EventFlags {
    data_received: AtomicBool,
    send_requested: AtomicBool,
    send_completed: AtomicBool,
    ack_send_completed: AtomicBool,
    ack_received: AtomicBool,
    timeout_fired: AtomicBool,
}

impl EventFlags {
    /// 새 레지스트리 생성 (모든 플래그 내려간 상태)
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, flag: EventFlag) -> &AtomicBool {
        match flag {
            EventFlag::DataReceived => &self.data_received,
            EventFlag::SendRequested => &self.send_requested,
            EventFlag::SendCompleted => &self.send_completed,
            EventFlag::AckSendCompleted => &self.ack_send_completed,
            EventFlag::AckReceived => &self.ack_received,
            EventFlag::TimeoutFired => &self.timeout_fired,
        }
    }

    /// 플래그 올리기 (비동기 생산자 컨텍스트에서 호출)
    pub fn set(&self, flag: EventFlag) {
        self.slot(flag).store(true, Ordering::SeqCst);
    }

    /// 플래그 내리기 (FSM 전용)
    pub fn clear(&self, flag: EventFlag) {
        self.slot(flag).store(false, Ordering::SeqCst);
    }

    /// 플래그 상태 확인
    pub fn is_set(&self, flag: EventFlag) -> bool {
        self.slot(flag).load(Ordering::SeqCst)
    }

    /// 전체 플래그 초기화 (초기화 시에만 사용)
    pub fn clear_all(&self) {
        for flag in [
            EventFlag::DataReceived,
            EventFlag::SendRequested,
            EventFlag::SendCompleted,
            EventFlag::AckSendCompleted,
            EventFlag::AckReceived,
            EventFlag::TimeoutFired,
        ] {
            self.clear(flag);
        }
    }
}
