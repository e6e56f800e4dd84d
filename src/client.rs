//! Programmatic client for the filehub protocol.
//!
//! A thin, non-interactive wrapper used by the one-shot CLI commands and the
//! integration tests. Broadcast chat shares the text channel with command
//! replies, so lines that do not parse as a recognized reply are buffered and
//! can be drained with [`Client::take_chat`].

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::channel::{ChannelError, FramedReader, FramedWriter};
use crate::protocol::{Command, FileMetadata, Reply};

/// A client connection to a filehub server.
pub struct Client {
    reader: FramedReader<OwnedReadHalf>,
    writer: FramedWriter<OwnedWriteHalf>,
    /// Chat lines that arrived while waiting for a command reply.
    pending_chat: VecDeque<String>,
}

impl Client {
    /// Connect to a server.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedReader::new(read_half),
            writer: FramedWriter::new(write_half),
            pending_chat: VecDeque::new(),
        })
    }

    /// Authenticate. Returns `true` on `LOGIN_SUCCESS`, `false` on
    /// `LOGIN_FAILED` (the server keeps the connection open for a retry).
    pub async fn login(&mut self, user: &str, pass: &str) -> io::Result<bool> {
        let cmd = Command::Login {
            user: user.to_string(),
            pass: pass.to_string(),
        };
        self.writer.write_line(&cmd.encode()).await?;
        match self.read_reply().await? {
            Reply::LoginSuccess => Ok(true),
            Reply::LoginFailed => Ok(false),
            other => Err(unexpected_reply("login", &other)),
        }
    }

    /// Fetch the server's file catalog.
    pub async fn list_files(&mut self) -> io::Result<Vec<String>> {
        self.writer.write_line(&Command::ListFiles.encode()).await?;
        match self.read_reply().await? {
            Reply::FileList(names) => Ok(names),
            Reply::Error(detail) => Err(io::Error::other(detail)),
            other => Err(unexpected_reply("list", &other)),
        }
    }

    /// Upload a file: announce on the text channel, stream the payload on
    /// the binary channel, await the acknowledgement.
    pub async fn upload(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let cmd = Command::Upload {
            name: name.to_string(),
            size: data.len() as u64,
        };
        self.writer.write_line(&cmd.encode()).await?;
        self.writer.write_all(data).await?;
        match self.read_reply().await? {
            Reply::UploadSuccess(_) => Ok(()),
            Reply::Error(detail) => Err(io::Error::other(detail)),
            other => Err(unexpected_reply("upload", &other)),
        }
    }

    /// Download a file. The `OK` discriminator line tells the client a binary
    /// frame follows; an `ERROR` line means nothing binary was sent.
    pub async fn download(&mut self, name: &str) -> io::Result<(FileMetadata, Vec<u8>)> {
        let cmd = Command::Download {
            name: name.to_string(),
        };
        self.writer.write_line(&cmd.encode()).await?;
        match self.read_reply().await? {
            Reply::Ok => {
                let meta = FileMetadata::read_from(self.reader.get_mut()).await?;
                let data = self
                    .reader
                    .read_exact(meta.size)
                    .await
                    .map_err(channel_to_io)?;
                Ok((meta, data))
            }
            Reply::Error(detail) => Err(io::Error::new(io::ErrorKind::NotFound, detail)),
            other => Err(unexpected_reply("download", &other)),
        }
    }

    /// Send a chat line. The server broadcasts it to every other
    /// authenticated session; there is no acknowledgement.
    pub async fn chat(&mut self, text: &str) -> io::Result<()> {
        let cmd = Command::Chat {
            text: text.to_string(),
        };
        self.writer.write_line(&cmd.encode()).await
    }

    /// Receive the next incoming chat line, blocking until one arrives.
    /// Returns `None` when the server closes the connection.
    pub async fn next_chat(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pending_chat.pop_front() {
            return Ok(Some(line));
        }
        loop {
            match self.reader.read_line().await.map_err(channel_to_io)? {
                Some(line) => {
                    if Reply::parse(&line).is_none() {
                        return Ok(Some(line));
                    }
                    // A stray reply with no outstanding request; drop it.
                }
                None => return Ok(None),
            }
        }
    }

    /// Drain chat lines that arrived interleaved with command replies.
    pub fn take_chat(&mut self) -> Vec<String> {
        self.pending_chat.drain(..).collect()
    }

    /// Read lines until one parses as a reply, buffering chat in between.
    async fn read_reply(&mut self) -> io::Result<Reply> {
        loop {
            let line = self
                .reader
                .read_line()
                .await
                .map_err(channel_to_io)?
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection")
                })?;
            match Reply::parse(&line) {
                Some(reply) => return Ok(reply),
                None => self.pending_chat.push_back(line),
            }
        }
    }
}

fn channel_to_io(e: ChannelError) -> io::Error {
    match e {
        ChannelError::Io(e) => e,
        ChannelError::TruncatedStream => {
            io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string())
        }
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

fn unexpected_reply(context: &str, reply: &Reply) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected {} reply: {}", context, reply.encode()),
    )
}
