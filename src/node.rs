//! 애플리케이션 노드
//!
//! 플래그/슬롯/타이머/링크/FSM을 한데 엮고 FSM 구동 태스크를 돌린다.
//! 애플리케이션은 `submit`으로 SDU를 제출하고 이벤트 채널로
//! 수신 메시지와 프로토콜 수명주기 알림을 받는다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::info;

use crate::arq::{ArqCore, ArqEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{EventFlag, EventFlags};
use crate::link::{RxSlots, UdpLink};

/// FSM 구동 주기. 한 사이클은 유한 동작이므로 짧게 돈다.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// SARQ 노드
pub struct ArqNode {
    config: Config,
    local_addr: SocketAddr,
    flags: Arc<EventFlags>,
    outbox: Arc<Mutex<Option<Bytes>>>,
    link: UdpLink,
    running: Arc<AtomicBool>,
}

impl ArqNode {
    /// 주소에 바인딩하고 노드 시작
    pub async fn bind(
        config: Config,
        bind_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ArqEvent>)> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        Self::with_socket(config, socket, peer_addr)
    }

    /// 이미 바인딩된 소켓으로 노드 시작
    pub fn with_socket(
        config: Config,
        socket: Arc<UdpSocket>,
        peer_addr: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ArqEvent>)> {
        let local_addr = socket.local_addr()?;
        let flags = Arc::new(EventFlags::new());
        let slots = Arc::new(RxSlots::new());

        let link = UdpLink::new(socket, peer_addr, &config, flags.clone(), slots.clone());
        let frame_tx = link.start();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut core = ArqCore::new(config.clone(), flags.clone(), slots, frame_tx, event_tx);
        let outbox = core.outbox();

        let running = Arc::new(AtomicBool::new(true));
        let driver_running = running.clone();
        tokio::spawn(async move {
            while driver_running.load(Ordering::SeqCst) {
                core.poll();
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });

        info!(
            "SARQ 노드 시작: id {} @ {}, peer {} @ {}",
            config.local_id, local_addr, config.peer_id, peer_addr
        );

        Ok((
            Self {
                config,
                local_addr,
                flags,
                outbox,
                link,
                running,
            },
            event_rx,
        ))
    }

    /// SDU 제출. 길이 초과나 이전 제출 미처리 시 거부.
    pub fn submit(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_len {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload_len,
            });
        }
        if self.flags.is_set(EventFlag::SendRequested) {
            return Err(Error::SendPending);
        }

        *self.outbox.lock() = Some(Bytes::copy_from_slice(payload));
        self.flags.set(EventFlag::SendRequested);
        Ok(())
    }

    /// 로컬 바인딩 주소
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 세션 설정
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 노드 종료 (FSM 구동/링크 태스크 정지)
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.link.stop();
    }
}
