//! Per-channel byte conduits over named pipes

use std::io;
use std::path::{Path, PathBuf};
use log::{error, info, trace};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;

use chanemu_core::ChannelId;

use crate::EmulatorError;

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

pub fn fifo_path(base: &Path, channel_id: ChannelId) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("_{}", channel_id));
    PathBuf::from(name)
}

/// Creates the named pipe at `path`. An existing pipe is reused.
pub fn create_fifo(path: &Path) -> Result<(), EmulatorError> {
    info!("Creating named pipe: {}", path.display());
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => Ok(()),
        Err(Errno::EEXIST) => {
            info!("The named pipe {} already exists", path.display());
            Ok(())
        }
        Err(source) => {
            error!("Error creating named pipe {}: {}", path.display(), source);
            Err(EmulatorError::PipeCreate {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Read endpoint of a channel. Reads are readiness driven, so an empty
/// pipe parks the caller instead of spinning.
pub struct ChannelReader {
    channel_id: ChannelId,
    inner: Option<BoxedReader>,
}

impl ChannelReader {
    pub fn new(channel_id: ChannelId, reader: BoxedReader) -> Self {
        Self {
            channel_id,
            inner: Some(reader),
        }
    }

    /// Returns the number of bytes read; `Ok(0)` means the peer closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self.inner.as_mut().ok_or_else(closed_endpoint)?;
        let n = reader.read(buf).await?;
        trace!("Channel {} read {} bytes", self.channel_id, n);
        Ok(n)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Releases the endpoint. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }
}

/// Failure part-way through a multi-call write.
#[derive(Debug)]
pub struct WriteFailure {
    /// Bytes accepted before the error.
    pub written: usize,
    pub source: io::Error,
}

pub struct ChannelWriter {
    channel_id: ChannelId,
    inner: Option<BoxedWriter>,
}

impl ChannelWriter {
    pub fn new(channel_id: ChannelId, writer: BoxedWriter) -> Self {
        Self {
            channel_id,
            inner: Some(writer),
        }
    }

    /// Single write; the transport may accept fewer bytes than offered.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let writer = self.inner.as_mut().ok_or_else(closed_endpoint)?;
        let n = writer.write(bytes).await?;
        trace!("Channel {} wrote {} of {} bytes", self.channel_id, n, bytes.len());
        Ok(n)
    }

    /// Loops on partial writes until `bytes` is fully accepted.
    pub async fn write_fully(&mut self, bytes: &[u8]) -> Result<(), WriteFailure> {
        let mut written = 0;
        while written < bytes.len() {
            match self.write(&bytes[written..]).await {
                Ok(0) => {
                    return Err(WriteFailure {
                        written,
                        source: io::Error::new(io::ErrorKind::WriteZero, "pipe accepted no bytes"),
                    });
                }
                Ok(n) => written += n,
                Err(source) => return Err(WriteFailure { written, source }),
            }
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.flush().await,
            None => Err(closed_endpoint()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Shuts the endpoint down. Closing twice is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }
}

fn closed_endpoint() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel endpoint is closed")
}

/// Both endpoints of one logical radio channel.
pub struct ChannelStream {
    pub id: ChannelId,
    pub reader: ChannelReader,
    pub writer: ChannelWriter,
}

impl ChannelStream {
    /// Creates (or reuses) the named pipe for `id` and opens both ends.
    ///
    /// The read end is opened first so opening the write end never blocks
    /// waiting for a reader. Must be called from within a tokio runtime.
    pub fn open(base: &Path, id: ChannelId, pipe_size: usize) -> Result<Self, EmulatorError> {
        let path = fifo_path(base, id);
        create_fifo(&path)?;

        let receiver = pipe::OpenOptions::new()
            .open_receiver(&path)
            .map_err(|source| {
                error!("Error opening reading pipe for channel {}: {}", id, source);
                EmulatorError::PipeOpen { channel: id, direction: "reading", source }
            })?;

        let sender = pipe::OpenOptions::new()
            .open_sender(&path)
            .map_err(|source| {
                error!("Error opening writing pipe for channel {}: {}", id, source);
                EmulatorError::PipeOpen { channel: id, direction: "writing", source }
            })?;

        resize_pipe(&sender, id, pipe_size)?;

        Ok(Self::from_parts(id, Box::new(receiver), Box::new(sender)))
    }

    pub fn from_parts(id: ChannelId, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            id,
            reader: ChannelReader::new(id, reader),
            writer: ChannelWriter::new(id, writer),
        }
    }

    pub fn into_parts(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }

    /// Releases both endpoints. The read end is released even if shutting
    /// down the write end fails; that failure is logged and returned.
    pub async fn close(&mut self) -> Result<(), EmulatorError> {
        let result = close_endpoints(self.id, &mut self.reader, &mut self.writer).await;
        result.map_err(|source| EmulatorError::Io { channel: self.id, source })
    }
}

async fn close_endpoints(
    id: ChannelId,
    reader: &mut ChannelReader,
    writer: &mut ChannelWriter,
) -> io::Result<()> {
    let result = writer.close().await;
    if let Err(e) = &result {
        error!("Error closing writing pipe for channel {}: {}", id, e);
    }
    reader.close();
    result
}

#[cfg(target_os = "linux")]
fn resize_pipe(sender: &pipe::Sender, id: ChannelId, pipe_size: usize) -> Result<(), EmulatorError> {
    use std::os::fd::AsRawFd;
    use nix::fcntl::{fcntl, FcntlArg};

    fcntl(sender.as_raw_fd(), FcntlArg::F_SETPIPE_SZ(pipe_size as i32)).map_err(|source| {
        error!("Error increasing pipe size for channel {}: {}", id, source);
        EmulatorError::PipeResize { channel: id, source }
    })?;
    info!("Named pipe for channel {} increased to {} bytes", id, pipe_size);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn resize_pipe(_sender: &pipe::Sender, _id: ChannelId, _pipe_size: usize) -> Result<(), EmulatorError> {
    Ok(())
}
