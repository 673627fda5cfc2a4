use crate::{ProtocolError, Result, ARG_SEPARATOR, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// Frame marker distinguishing requests from responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Request,
    Response,
}

impl Code {
    pub const REQ: [u8; 4] = *b"\0REQ";
    pub const RES: [u8; 4] = *b"\0RES";

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self> {
        match bytes {
            Self::REQ => Ok(Code::Request),
            Self::RES => Ok(Code::Response),
            other => Err(ProtocolError::InvalidCode(other)),
        }
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        match self {
            Code::Request => Self::REQ,
            Code::Response => Self::RES,
        }
    }
}

/// Packet types of the job protocol.
///
/// The broker only acts on a subset of these; the rest decode normally so that
/// sessions can reject them as unsupported for their role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
}

impl PacketType {
    pub fn from_i32(value: i32) -> Option<Self> {
        use PacketType::*;
        let packet_type = match value {
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            22 => SetClientId,
            23 => CanDoTimeout,
            24 => AllYours,
            25 => WorkException,
            26 => OptionReq,
            27 => OptionRes,
            28 => WorkData,
            29 => WorkWarning,
            30 => GrabJobUniq,
            31 => JobAssignUniq,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            35 => SubmitJobSched,
            36 => SubmitJobEpoch,
            _ => return None,
        };
        Some(packet_type)
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Work updates that end the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PacketType::WorkComplete | PacketType::WorkFail)
    }
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: Code,
    pub packet_type: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(code: Code, packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Packet {
            code,
            packet_type,
            payload: payload.into(),
        }
    }

    pub fn request(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self::new(Code::Request, packet_type, payload)
    }

    pub fn response(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self::new(Code::Response, packet_type, payload)
    }

    /// Build a packet whose payload is `args` joined by NUL bytes.
    pub fn with_args(code: Code, packet_type: PacketType, args: &[&[u8]]) -> Self {
        let len = args.iter().map(|a| a.len()).sum::<usize>() + args.len().saturating_sub(1);
        let mut payload = BytesMut::with_capacity(len);
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                payload.put_u8(ARG_SEPARATOR);
            }
            payload.put_slice(arg);
        }
        Self::new(code, packet_type, payload.freeze())
    }

    /// Split the payload on NUL bytes. An empty payload yields a single empty argument.
    pub fn args(&self) -> Vec<&[u8]> {
        self.payload.split(|b| *b == ARG_SEPARATOR).collect()
    }

    /// Split the payload into at most `n` arguments; the last one keeps any NUL bytes.
    pub fn splitn_args(&self, n: usize) -> Vec<&[u8]> {
        self.payload.splitn(n, |b| *b == ARG_SEPARATOR).collect()
    }

    /// Encoded size of this packet on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode as one frame. Fails if the payload is over `MAX_PAYLOAD_SIZE`.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    pub(crate) fn write_to(&self, dst: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(self.payload.len()));
        }
        let length = i32::try_from(self.payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(self.payload.len()))?;

        dst.reserve(self.encoded_len());
        dst.put_slice(&self.code.as_bytes());
        dst.put_i32(self.packet_type.as_i32());
        dst.put_i32(length);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode exactly one frame.
    ///
    /// The declared length is not checked against the buffer: everything after
    /// the header is taken as the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (code, packet_type, _) = parse_header(bytes)?;
        Ok(Packet::new(
            code,
            packet_type,
            Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        ))
    }
}

/// Parse the fixed header, returning the declared payload length unvalidated.
pub(crate) fn parse_header(bytes: &[u8]) -> Result<(Code, PacketType, i32)> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated(bytes.len()));
    }
    let code = Code::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let raw_type = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let packet_type =
        PacketType::from_i32(raw_type).ok_or(ProtocolError::InvalidPacketType(raw_type))?;
    let length = i32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok((code, packet_type, length))
}
