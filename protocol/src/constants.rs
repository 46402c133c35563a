//! Protocol constants and packet type definitions

/// Packet types for the GetMyMusic protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Create a new account
    SignupRequest = 0x01,

    /// Log on to an existing account
    LogonRequest = 0x02,

    /// Close the connection to the server
    LeaveRequest = 0x03,

    /// Request the list of files stored on the server
    ListRequest = 0x04,

    /// File body: upload from the client, or the download header from the server
    FileTransfer = 0x05,

    /// Request to download a file
    FileRequest = 0x06,

    /// Session token issued after signup/logon (header only)
    TokenResponse = 0x07,

    /// Listing of the user's files
    ListResponse = 0x08,

    /// Upload completed (header only)
    FileReceivedAck = 0x09,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::SignupRequest),
            0x02 => Some(PacketType::LogonRequest),
            0x03 => Some(PacketType::LeaveRequest),
            0x04 => Some(PacketType::ListRequest),
            0x05 => Some(PacketType::FileTransfer),
            0x06 => Some(PacketType::FileRequest),
            0x07 => Some(PacketType::TokenResponse),
            0x08 => Some(PacketType::ListResponse),
            0x09 => Some(PacketType::FileReceivedAck),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Size of the common header: version, type, total length, session token
pub const HEADER_LEN: usize = 8;

/// Largest packet the 16-bit length field can describe
pub const MAX_PACKET_LEN: usize = u16::MAX as usize;

/// Width of a file name field, including the terminating nul
pub const FILE_NAME_LEN: usize = 256;

/// One listing entry: file name field plus CRC-32
pub const FILE_ENTRY_LEN: usize = FILE_NAME_LEN + 4;

/// Most entries a single ListResponse can carry
pub const MAX_LIST_ENTRIES: usize = (MAX_PACKET_LEN - HEADER_LEN) / FILE_ENTRY_LEN;

/// Longest upload body a single FileTransfer packet can announce
pub const MAX_UPLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN - FILE_NAME_LEN;

/// Longest download body a FileTransfer header can announce
pub const MAX_DOWNLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

/// Maximum username length (without terminator)
pub const MAX_USERNAME_LEN: usize = 63;

/// Maximum password length (without terminator)
pub const MAX_PASSWORD_LEN: usize = 63;

/// Default TCP port of the server
pub const DEFAULT_PORT: u16 = 30450;

/// Default transfer chunk size for streamed file bodies
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Token value meaning "no session"
pub const NO_SESSION: u32 = 0;
