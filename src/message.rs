//! PDU 코덱
//!
//! stop-and-wait이므로 PDU는 두 종류뿐: Data, Ack.
//! 헤더는 bincode 직렬화, Data 페이로드는 헤더 뒤에 그대로 붙음.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// PDU 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PduKind {
    /// 데이터 프레임
    Data = 1,

    /// 확인응답 프레임
    Ack = 2,
}

/// PDU 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PduHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// PDU 종류
    pub kind: PduKind,

    /// 시퀀스 번호
    pub seq: u8,

    /// 송신 노드 ID
    pub src_id: u8,

    /// 페이로드 길이 (Ack는 0)
    pub payload_len: u16,

    /// 페이로드 CRC32 (Ack는 0)
    pub crc32: u32,
}

impl PduHeader {
    fn new(kind: PduKind, seq: u8, src_id: u8, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            kind,
            seq,
            src_id,
            payload_len: payload.len() as u16,
            crc32: if payload.is_empty() { 0 } else { crc32fast::hash(payload) },
        }
    }
}

/// 디코딩된 PDU
#[derive(Debug, Clone)]
pub struct Pdu {
    /// PDU 헤더
    pub header: PduHeader,

    /// 페이로드 (Ack는 빈 값)
    pub payload: Bytes,
}

impl Pdu {
    /// PDU 종류
    pub fn kind(&self) -> PduKind {
        self.header.kind
    }

    /// 시퀀스 번호
    pub fn seq(&self) -> u8 {
        self.header.seq
    }

    /// 송신 노드 ID
    pub fn src_id(&self) -> u8 {
        self.header.src_id
    }

    /// 페이로드와 길이
    pub fn payload(&self) -> (&[u8], usize) {
        (&self.payload, self.payload.len())
    }
}

/// 데이터 PDU 인코딩
pub fn encode_data(seq: u8, src_id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let header = PduHeader::new(PduKind::Data, seq, src_id, payload);
    let header_bytes = bincode::serialize(&header)?;

    let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// ACK PDU 인코딩 (헤더만)
pub fn encode_ack(seq: u8, src_id: u8) -> Result<Vec<u8>> {
    let header = PduHeader::new(PduKind::Ack, seq, src_id, &[]);
    Ok(bincode::serialize(&header)?)
}

/// 수신 바이트에서 PDU 디코딩
///
/// 매직/버전/CRC 검증 포함. 실패한 프레임은 호출측에서 버림.
pub fn decode(bytes: &[u8]) -> Result<Pdu> {
    // 헤더 최소 크기: magic(4) + version(1) + kind(4) + seq(1) + src(1) + len(2) + crc(4)
    if bytes.len() < 14 {
        return Err(Error::TruncatedPdu { len: bytes.len() });
    }

    let header: PduHeader = bincode::deserialize(bytes)?;

    if header.magic != MAGIC_NUMBER {
        return Err(Error::InvalidMagicNumber {
            expected: MAGIC_NUMBER,
            got: header.magic,
        });
    }
    if header.version != PROTOCOL_VERSION {
        return Err(Error::InvalidVersion {
            expected: PROTOCOL_VERSION,
            got: header.version,
        });
    }

    // bincode는 가변 길이이므로 재직렬화해서 실제 헤더 크기 확인
    let header_size = bincode::serialize(&header)?.len();
    let expected_len = header_size + header.payload_len as usize;

    if bytes.len() < expected_len {
        return Err(Error::TruncatedPdu { len: bytes.len() });
    }

    let payload = Bytes::copy_from_slice(&bytes[header_size..expected_len]);

    if !payload.is_empty() {
        let crc = crc32fast::hash(&payload);
        if crc != header.crc32 {
            return Err(Error::CrcMismatch {
                expected: header.crc32,
                got: crc,
            });
        }
    }

    Ok(Pdu { header, payload })
}

/// PDU 시퀀스 번호만 조회 (전체 디코딩 후)
pub fn decode_seq(bytes: &[u8]) -> Result<u8> {
    Ok(decode(bytes)?.seq())
}
