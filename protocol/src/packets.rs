//! GetMyMusic packet structures
//!
//! Every packet starts with the same 8-byte header. Encoders write into a
//! caller-supplied buffer and return the number of bytes written; decoders
//! validate bounds before touching any field.

use crate::constants::{
    FILE_ENTRY_LEN, FILE_NAME_LEN, HEADER_LEN, MAX_PACKET_LEN, PacketType,
};
use crate::error::ProtocolError;
use crate::PROTOCOL_VERSION;

/// Common packet header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version (1 byte)
    pub version: u8,
    /// Packet type (1 byte)
    pub packet_type: PacketType,
    /// Header plus payload length (2 bytes)
    pub total_length: u16,
    /// Session token (4 bytes)
    pub session_token: u32,
}

impl PacketHeader {
    pub const SIZE: usize = HEADER_LEN;

    pub fn new(packet_type: PacketType, total_length: u16, session_token: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            total_length,
            session_token,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.version;
        bytes[1] = self.packet_type.to_u8();
        bytes[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.session_token.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::MalformedPacket("header truncated"));
        }

        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let packet_type =
            PacketType::from_u8(bytes[1]).ok_or(ProtocolError::UnknownPacketType(bytes[1]))?;

        let total_length = u16::from_be_bytes([bytes[2], bytes[3]]);
        if (total_length as usize) < Self::SIZE {
            return Err(ProtocolError::MalformedPacket(
                "declared length shorter than header",
            ));
        }

        let session_token = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        Ok(Self {
            version,
            packet_type,
            total_length,
            session_token,
        })
    }

    /// Number of bytes following the header
    pub fn payload_len(&self) -> usize {
        self.total_length as usize - Self::SIZE
    }
}

/// Write a header into the front of `buf`
pub fn encode_header(
    buf: &mut [u8],
    packet_type: PacketType,
    total_length: u16,
    session_token: u32,
) -> Result<usize, ProtocolError> {
    ensure_capacity(buf, HEADER_LEN)?;
    let header = PacketHeader::new(packet_type, total_length, session_token);
    buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    Ok(HEADER_LEN)
}

/// Parse a header from the front of `bytes`
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, ProtocolError> {
    PacketHeader::from_bytes(bytes)
}

/// Header-only packets: LeaveRequest, ListRequest, TokenResponse, FileReceivedAck
pub fn encode_header_only(
    buf: &mut [u8],
    packet_type: PacketType,
    session_token: u32,
) -> Result<usize, ProtocolError> {
    encode_header(buf, packet_type, HEADER_LEN as u16, session_token)
}

/// SignupRequest / LogonRequest: `username\0password\0`
pub fn encode_logon(
    buf: &mut [u8],
    is_new_account: bool,
    username: &str,
    password: &str,
) -> Result<usize, ProtocolError> {
    if username.as_bytes().contains(&0) || password.as_bytes().contains(&0) {
        return Err(ProtocolError::MalformedPayload("credentials contain nul byte"));
    }

    let user_len = username.len() + 1;
    let pass_len = password.len() + 1;
    let packet_len = checked_packet_len(HEADER_LEN + user_len + pass_len)?;
    ensure_capacity(buf, packet_len as usize)?;

    let packet_type = if is_new_account {
        PacketType::SignupRequest
    } else {
        PacketType::LogonRequest
    };
    encode_header(buf, packet_type, packet_len, 0)?;

    let mut pos = HEADER_LEN;
    buf[pos..pos + username.len()].copy_from_slice(username.as_bytes());
    pos += username.len();
    buf[pos] = 0;
    pos += 1;
    buf[pos..pos + password.len()].copy_from_slice(password.as_bytes());
    pos += password.len();
    buf[pos] = 0;
    pos += 1;

    Ok(pos)
}

/// Username and password carried by a signup/logon request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Decode from the payload (the bytes after the header, up to the
    /// declared packet end). Both strings must be nul-terminated and the
    /// second terminator must be the last byte of the packet.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let user_end = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MalformedPayload("username not terminated"))?;
        let rest = &payload[user_end + 1..];

        let pass_end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MalformedPayload("password not terminated"))?;
        if pass_end + 1 != rest.len() {
            return Err(ProtocolError::MalformedPayload(
                "trailing bytes after password",
            ));
        }

        let username = std::str::from_utf8(&payload[..user_end])
            .map_err(|_| ProtocolError::MalformedPayload("username is not UTF-8"))?;
        let password = std::str::from_utf8(&rest[..pass_end])
            .map_err(|_| ProtocolError::MalformedPayload("password is not UTF-8"))?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Name and CRC-32 of one stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub checksum: u32,
}

/// ListResponse: a run of `{name[256], crc32 BE}` entries
pub fn encode_list_response(
    buf: &mut [u8],
    session_token: u32,
    entries: &[FileEntry],
) -> Result<usize, ProtocolError> {
    let packet_len = checked_packet_len(HEADER_LEN + entries.len() * FILE_ENTRY_LEN)?;
    ensure_capacity(buf, packet_len as usize)?;

    encode_header(buf, PacketType::ListResponse, packet_len, session_token)?;

    let mut pos = HEADER_LEN;
    for entry in entries {
        write_file_name(&mut buf[pos..pos + FILE_NAME_LEN], &entry.name)?;
        pos += FILE_NAME_LEN;
        buf[pos..pos + 4].copy_from_slice(&entry.checksum.to_be_bytes());
        pos += 4;
    }

    Ok(pos)
}

/// Decode ListResponse entries; the count is implied by the payload length
pub fn decode_list_response(payload: &[u8]) -> Result<Vec<FileEntry>, ProtocolError> {
    if payload.len() % FILE_ENTRY_LEN != 0 {
        return Err(ProtocolError::MalformedPayload(
            "listing is not a whole number of entries",
        ));
    }

    payload
        .chunks_exact(FILE_ENTRY_LEN)
        .map(|entry| {
            let name = read_file_name(&entry[..FILE_NAME_LEN])?;
            let checksum = u32::from_be_bytes([
                entry[FILE_NAME_LEN],
                entry[FILE_NAME_LEN + 1],
                entry[FILE_NAME_LEN + 2],
                entry[FILE_NAME_LEN + 3],
            ]);
            Ok(FileEntry { name, checksum })
        })
        .collect()
}

/// FileRequest: header + fixed-width file name
pub fn encode_file_request(
    buf: &mut [u8],
    session_token: u32,
    name: &str,
) -> Result<usize, ProtocolError> {
    let packet_len = HEADER_LEN + FILE_NAME_LEN;
    ensure_capacity(buf, packet_len)?;

    encode_header(buf, PacketType::FileRequest, packet_len as u16, session_token)?;
    write_file_name(&mut buf[HEADER_LEN..packet_len], name)?;

    Ok(packet_len)
}

/// Download header: a FileTransfer header whose total length announces
/// `file_len` body bytes that follow without any further headers.
pub fn encode_file_header(
    buf: &mut [u8],
    session_token: u32,
    file_len: usize,
) -> Result<usize, ProtocolError> {
    let packet_len = checked_packet_len(HEADER_LEN + file_len)?;
    encode_header(buf, PacketType::FileTransfer, packet_len, session_token)
}

/// Upload announcement: FileTransfer header + fixed-width file name. The
/// `body_len` raw bytes that follow are counted in the declared length.
pub fn encode_upload_header(
    buf: &mut [u8],
    session_token: u32,
    name: &str,
    body_len: usize,
) -> Result<usize, ProtocolError> {
    let prefix_len = HEADER_LEN + FILE_NAME_LEN;
    let packet_len = checked_packet_len(prefix_len + body_len)?;
    ensure_capacity(buf, prefix_len)?;

    encode_header(buf, PacketType::FileTransfer, packet_len, session_token)?;
    write_file_name(&mut buf[HEADER_LEN..prefix_len], name)?;

    Ok(prefix_len)
}

/// Copy `name` into a fixed-width field, nul-padding the remainder
pub fn write_file_name(field: &mut [u8], name: &str) -> Result<(), ProtocolError> {
    if field.len() < FILE_NAME_LEN {
        return Err(ProtocolError::BufferTooSmall {
            needed: FILE_NAME_LEN,
            available: field.len(),
        });
    }
    // One byte is reserved for the terminator
    if name.len() >= FILE_NAME_LEN {
        return Err(ProtocolError::NameTooLong {
            len: name.len(),
            max: FILE_NAME_LEN - 1,
        });
    }

    let field = &mut field[..FILE_NAME_LEN];
    field.fill(0);
    field[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

/// Read a fixed-width file name field. Stops at the first nul and never
/// looks past `FILE_NAME_LEN` bytes, terminated or not.
pub fn read_file_name(field: &[u8]) -> Result<String, ProtocolError> {
    let field = &field[..field.len().min(FILE_NAME_LEN)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_string)
        .map_err(|_| ProtocolError::MalformedPayload("file name is not UTF-8"))
}

fn checked_packet_len(len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge {
        len,
        max: MAX_PACKET_LEN,
    })
}

fn ensure_capacity(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
