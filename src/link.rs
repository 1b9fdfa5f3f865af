//! 링크 계층 (UDP 전송)
//!
//! - 송신 태스크: FSM이 큐에 넣은 프레임을 UDP로 내보내고 완료 플래그를 올림
//! - 수신 태스크: 도착 프레임을 디코딩해 종류별 슬롯에 넣고 플래그를 올림
//! - 인위 손실률(loss_rate)로 재전송 경로를 로컬에서 시험 가능
//!
//! FSM은 여기서 블로킹 없이 큐잉만 한다. 송신 완료 플래그는 프레임에
//! 찍힌 종류(Data/Ack)에 따라 올라간다. 전송 계층이 종류를 판단하는 게
//! 아니라 FSM이 보낼 때 이미 알고 찍어 둔 것.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::{EventFlag, EventFlags};
use crate::message::{self, Pdu, PduKind};
use crate::Config;

/// 송신 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 데이터 PDU
    Data,

    /// ACK PDU
    Ack,
}

/// 송신 큐에 들어가는 프레임
#[derive(Debug)]
pub struct OutgoingFrame {
    /// 인코딩된 PDU 바이트
    pub bytes: Vec<u8>,

    /// 프레임 종류 (완료 플래그 선택용, FSM이 찍음)
    pub kind: FrameKind,

    /// 목적지 노드 ID
    pub dest_id: u8,
}

/// FSM 쪽에서 쥐는 송신 큐 핸들
pub type FrameSink = mpsc::UnboundedSender<OutgoingFrame>;

/// 수신 프레임 슬롯
///
/// 수신 태스크가 채우고 플래그를 올리면 FSM이 꺼내 간다.
/// stop-and-wait이므로 종류별 하나면 충분.
#[derive(Debug, Default)]
pub struct RxSlots {
    data: Mutex<Option<Pdu>>,
    ack: Mutex<Option<Pdu>>,
}

impl RxSlots {
    /// 새 슬롯 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터 PDU 넣기 (수신 태스크 전용)
    pub fn put_data(&self, pdu: Pdu) {
        if self.data.lock().replace(pdu).is_some() {
            // 상대가 stop-and-wait을 지키면 일어나지 않음
            warn!("미소비 데이터 프레임 덮어씀");
        }
    }

    /// ACK PDU 넣기 (수신 태스크 전용)
    pub fn put_ack(&self, pdu: Pdu) {
        if self.ack.lock().replace(pdu).is_some() {
            warn!("미소비 ACK 프레임 덮어씀");
        }
    }

    /// 데이터 PDU 꺼내기 (FSM 전용)
    pub fn take_data(&self) -> Option<Pdu> {
        self.data.lock().take()
    }

    /// ACK PDU 꺼내기 (FSM 전용)
    pub fn take_ack(&self) -> Option<Pdu> {
        self.ack.lock().take()
    }
}

/// UDP 링크
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    peer_id: u8,
    loss_rate: f64,
    flags: Arc<EventFlags>,
    slots: Arc<RxSlots>,
    running: Arc<AtomicBool>,
}

impl UdpLink {
    /// 새 링크 생성
    pub fn new(
        socket: Arc<UdpSocket>,
        peer_addr: SocketAddr,
        config: &Config,
        flags: Arc<EventFlags>,
        slots: Arc<RxSlots>,
    ) -> Self {
        Self {
            socket,
            peer_addr,
            peer_id: config.peer_id,
            loss_rate: config.loss_rate,
            flags,
            slots,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 송수신 태스크 시작, FSM용 송신 큐 핸들 반환
    pub fn start(&self) -> FrameSink {
        self.running.store(true, Ordering::SeqCst);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.spawn_tx_task(frame_rx);
        self.spawn_rx_task();

        info!(
            "UDP 링크 시작: peer {} ({})",
            self.peer_id, self.peer_addr
        );
        frame_tx
    }

    /// 태스크 종료 요청
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn spawn_tx_task(&self, mut frame_rx: mpsc::UnboundedReceiver<OutgoingFrame>) {
        let socket = self.socket.clone();
        let peer_addr = self.peer_addr;
        let peer_id = self.peer_id;
        let loss_rate = self.loss_rate;
        let flags = self.flags.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if frame.dest_id != peer_id {
                    warn!("점대점 링크에 알 수 없는 목적지 {}", frame.dest_id);
                }

                if loss_rate > 0.0 && rand::random::<f64>() < loss_rate {
                    debug!("인위 손실: {:?} 프레임 폐기", frame.kind);
                } else if let Err(e) = socket.send_to(&frame.bytes, peer_addr).await {
                    // 송신 실패도 완료로 처리. 복구는 ARQ 재전송 몫.
                    warn!("UDP 송신 실패: {}", e);
                }

                match frame.kind {
                    FrameKind::Data => flags.set(EventFlag::SendCompleted),
                    FrameKind::Ack => flags.set(EventFlag::AckSendCompleted),
                }
            }
        });
    }

    fn spawn_rx_task(&self) {
        let socket = self.socket.clone();
        let flags = self.flags.clone();
        let slots = self.slots.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while running.load(Ordering::SeqCst) {
                let len = match socket.recv_from(&mut buf).await {
                    Ok((len, _addr)) => len,
                    Err(e) => {
                        warn!("UDP 수신 실패: {}", e);
                        continue;
                    }
                };

                match message::decode(&buf[..len]) {
                    Ok(pdu) => match pdu.kind() {
                        PduKind::Data => {
                            slots.put_data(pdu);
                            flags.set(EventFlag::DataReceived);
                        }
                        PduKind::Ack => {
                            slots.put_ack(pdu);
                            flags.set(EventFlag::AckReceived);
                        }
                    },
                    Err(e) => {
                        // 깨진 프레임은 버린다. 재전송이 메꿔 줌.
                        debug!("프레임 디코딩 실패, 폐기: {}", e);
                    }
                }
            }
        });
    }
}
