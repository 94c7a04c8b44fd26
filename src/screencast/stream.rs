//! Output stream the encoder writes muxed bytes to

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Container;

/// Destination for muxed container bytes
pub trait StreamSink: Send {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
}

/// Buffered file sink
pub struct FileStream {
    writer: BufWriter<File>,
}

impl FileStream {
    /// Create `path`, failing if it already exists
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create_new(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl StreamSink for FileStream {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

struct StreamState {
    sink: Box<dyn StreamSink>,
    bytes_written: u64,
    closed: bool,
}

/// Owned output stream of one recording
///
/// The encoder context gets a [`StreamWriter`]; the session keeps this handle
/// and destroys it only after the context is gone.
pub struct OutputStream {
    path: Option<PathBuf>,
    state: Arc<Mutex<StreamState>>,
}

impl OutputStream {
    /// Stream into a newly created file at `path`
    ///
    /// Fails if `path` exists; an existing file is never truncated.
    pub fn create_file(path: &Path) -> Result<Self> {
        let sink = FileStream::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self::file_backed(sink, path.to_path_buf()))
    }

    /// Stream into a new timestamped file under `dir`, creating `dir` if needed
    ///
    /// When the name is taken a `_1`, `_2`, ... suffix is appended.
    pub fn create_in(dir: &Path, container: Container) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        let stem = chrono::Local::now().format(FILE_STEM_FORMAT).to_string();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(numbered_file_name(&stem, attempt, container));
            match FileStream::create(&path) {
                Ok(sink) => return Ok(Self::file_backed(sink, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create output file: {}", path.display())
                    });
                }
            }
        }
        bail!("No free output file name for {} in {}", stem, dir.display())
    }

    fn file_backed(sink: FileStream, path: PathBuf) -> Self {
        let mut stream = Self::from_sink(Box::new(sink));
        stream.path = Some(path);
        stream
    }

    pub fn from_sink(sink: Box<dyn StreamSink>) -> Self {
        Self {
            path: None,
            state: Arc::new(Mutex::new(StreamState {
                sink,
                bytes_written: 0,
                closed: false,
            })),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn writer(&self) -> StreamWriter {
        StreamWriter {
            state: self.state.clone(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Flush and close the stream; later writes through any writer fail
    ///
    /// Returns the number of bytes written over the stream's lifetime.
    pub fn destroy(self) -> u64 {
        let mut state = self.state.lock();
        state.closed = true;
        if let Err(e) = state.sink.flush() {
            log::error!("Failed to flush output stream: {}", e);
        }
        state.bytes_written
    }

    /// Close the stream and remove the file it created, used when setup fails
    ///
    /// The file was created exclusively by this stream, so nothing else is lost.
    pub fn discard(self) {
        let path = self.path.clone();
        self.destroy();
        if let Some(path) = path {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Shared write access to an [`OutputStream`]
#[derive(Clone)]
pub struct StreamWriter {
    state: Arc<Mutex<StreamState>>,
}

impl StreamWriter {
    pub fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "output stream is closed",
            ));
        }
        state.sink.write(bytes)?;
        state.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

const FILE_STEM_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// File name for a recording started now, e.g. `20240131_235959.webm`
pub fn output_file_name(container: Container) -> String {
    let stem = chrono::Local::now().format(FILE_STEM_FORMAT).to_string();
    numbered_file_name(&stem, 0, container)
}

fn numbered_file_name(stem: &str, attempt: u32, container: Container) -> String {
    match attempt {
        0 => format!("{}.{}", stem, container.extension()),
        n => format!("{}_{}.{}", stem, n, container.extension()),
    }
}
