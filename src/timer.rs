//! 재전송 타이머
//!
//! 단일 카운트다운. 만료 전에 stop되지 않으면 `TimeoutFired` 플래그를
//! 정확히 한 번 올리고 stopped 상태가 된다. 프로토콜 불변식상 동시에
//! 하나의 카운트다운만 존재하므로 start-중복은 방어적 재시작으로 처리.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::event::{EventFlag, EventFlags};

/// 재전송 타이머
#[derive(Debug)]
pub struct RetxTimer {
    interval: Duration,
    flags: Arc<EventFlags>,

    /// 현재 카운트다운 실행 여부
    running: Arc<AtomicBool>,

    /// 세대 번호. start/stop마다 증가하며 이전 카운트다운 태스크를 무효화
    generation: Arc<AtomicU64>,
}

impl RetxTimer {
    /// 새 타이머 생성 (stopped 상태)
    pub fn new(interval: Duration, flags: Arc<EventFlags>) -> Self {
        Self {
            interval,
            flags,
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 카운트다운 시작. 이미 실행 중이면 간격을 처음부터 다시 잰다.
    pub fn start(&self) {
        let my_gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);

        let interval = self.interval;
        let flags = self.flags.clone();
        let running = self.running.clone();
        let generation = self.generation.clone();

        tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            // 그 사이 stop()이나 재시작이 있었으면 이 카운트다운은 무효
            if generation.load(Ordering::SeqCst) != my_gen {
                return;
            }
            if running
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!("재전송 타이머 만료 ({}ms)", interval.as_millis());
                flags.set(EventFlag::TimeoutFired);
            }
        });
    }

    /// 카운트다운 취소. 이미 stopped이면 no-op.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// 실행 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
