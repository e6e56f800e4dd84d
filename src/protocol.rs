//! Wire codec for the filehub protocol.
//!
//! Text channel: one command or reply per `\n`-terminated UTF-8 line, with a
//! fixed set of recognized prefixes and `|`-delimited fields. Any line that
//! matches no prefix is chat text. Fields must not contain the delimiter;
//! callers sanitize usernames and filenames before encoding.
//!
//! Binary channel: a [`FileMetadata`] record
//! `[name_len: u16 BE][name: UTF-8][size: u64 BE]` followed immediately by
//! exactly `size` raw payload bytes.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum file name length accepted in a metadata record.
pub const MAX_NAME_LEN: usize = 255;

/// Field delimiter inside command payloads.
pub const FIELD_DELIMITER: char = '|';

/// Decode failures for recognized command prefixes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("LOGIN requires <user>|<pass>")]
    MalformedLogin,

    #[error("UPLOAD requires <name>|<size>")]
    MalformedUpload,

    #[error("invalid upload length: {0}")]
    BadLength(String),
}

/// A client command decoded from one text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { user: String, pass: String },
    ListFiles,
    Download { name: String },
    Upload { name: String, size: u64 },
    Chat { text: String },
}

impl Command {
    /// Decode a line. Lines matching no recognized prefix are chat text;
    /// recognized prefixes with malformed payloads are errors, never chat.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = line.strip_prefix("LOGIN:") {
            let (user, pass) = rest
                .split_once(FIELD_DELIMITER)
                .ok_or(ProtocolError::MalformedLogin)?;
            return Ok(Self::Login {
                user: user.to_string(),
                pass: pass.to_string(),
            });
        }
        if line == "LIST_FILES" {
            return Ok(Self::ListFiles);
        }
        if let Some(name) = line.strip_prefix("DOWNLOAD:") {
            return Ok(Self::Download {
                name: name.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("UPLOAD:") {
            let (name, len) = rest
                .split_once(FIELD_DELIMITER)
                .ok_or(ProtocolError::MalformedUpload)?;
            let size: u64 = len
                .parse()
                .map_err(|_| ProtocolError::BadLength(len.to_string()))?;
            return Ok(Self::Upload {
                name: name.to_string(),
                size,
            });
        }
        Ok(Self::Chat {
            text: line.to_string(),
        })
    }

    /// Encode this command as one text line (no terminator).
    pub fn encode(&self) -> String {
        match self {
            Self::Login { user, pass } => format!("LOGIN:{}|{}", user, pass),
            Self::ListFiles => "LIST_FILES".to_string(),
            Self::Download { name } => format!("DOWNLOAD:{}", name),
            Self::Upload { name, size } => format!("UPLOAD:{}|{}", name, size),
            Self::Chat { text } => text.clone(),
        }
    }
}

/// A server reply encoded as one text line.
///
/// `Ok` announces that a binary frame (metadata + payload) follows
/// immediately; it is the discriminator that lets a client decide
/// text-vs-binary before touching the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    LoginSuccess,
    LoginFailed,
    FileList(Vec<String>),
    Ok,
    Error(String),
    UploadSuccess(String),
}

impl Reply {
    /// Encode this reply as one text line (no terminator).
    pub fn encode(&self) -> String {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS".to_string(),
            Self::LoginFailed => "LOGIN_FAILED".to_string(),
            Self::FileList(names) => format!("FILE_LIST:{}", names.join(",")),
            Self::Ok => "OK".to_string(),
            Self::Error(detail) => format!("ERROR:{}", detail),
            Self::UploadSuccess(name) => format!("UPLOAD_SUCCESS:{}", name),
        }
    }

    /// Decode a server line. Returns `None` for lines that are not replies
    /// (broadcast chat shares the text channel with replies).
    pub fn parse(line: &str) -> Option<Self> {
        if line == "LOGIN_SUCCESS" {
            return Some(Self::LoginSuccess);
        }
        if line == "LOGIN_FAILED" {
            return Some(Self::LoginFailed);
        }
        if line == "OK" {
            return Some(Self::Ok);
        }
        if let Some(rest) = line.strip_prefix("FILE_LIST:") {
            let names = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(',').map(str::to_string).collect()
            };
            return Some(Self::FileList(names));
        }
        if let Some(detail) = line.strip_prefix("ERROR:") {
            return Some(Self::Error(detail.to_string()));
        }
        if let Some(name) = line.strip_prefix("UPLOAD_SUCCESS:") {
            return Some(Self::UploadSuccess(name.to_string()));
        }
        None
    }
}

/// Metadata record preceding a raw file payload on the binary channel.
///
/// A receiver must read exactly `size` bytes after this record before
/// interpreting anything else on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Encode the record into bytes.
    pub fn encode(&self) -> Bytes {
        let name = self.name.as_bytes();
        let mut buf = BytesMut::with_capacity(2 + name.len() + 8);
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
        buf.put_u64(self.size);
        buf.freeze()
    }

    /// Write the record to an async writer.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file name too long: {} bytes", self.name.len()),
            ));
        }
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }

    /// Read a record from an async reader.
    pub async fn read_from<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Self> {
        let name_len = reader.read_u16().await? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file name too long: {} bytes", name_len),
            ));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name).await?;
        let name = String::from_utf8(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8")
        })?;
        let size = reader.read_u64().await?;
        Ok(Self { name, size })
    }
}
