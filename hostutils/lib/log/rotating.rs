//! Size based log rotation.
//!
//! A [`RotatingLog`] appends to a file until the next write would push it past its size limit.
//! The file is then shifted into numbered generations (`app.log` becomes `app.log.1`, `app.log.1`
//! becomes `app.log.2` and so on) and a fresh file is opened. Generations beyond the configured
//! keep count are deleted.

use futures::future::BoxFuture;
use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWrite,
};

use crate::{DEFAULT_LOG_KEEP, DEFAULT_LOG_MAX_SIZE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A log file that rotates itself into numbered generations once it reaches a maximum size.
///
/// # Example
///
/// ```no_run
/// use hostutils::RotatingLog;
/// use tokio::io::AsyncWriteExt;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let mut log = RotatingLog::with_limits("/home/alice/log/php-8.4.log", 1024 * 1024, 3).await?;
///     log.write_all(b"started\n").await?;
///     Ok(())
/// }
/// ```
pub struct RotatingLog {
    /// The open log file, absent while a rotation or reopen is in flight
    file: Option<File>,

    /// Path of the live log file
    path: PathBuf,

    /// Maximum size in bytes before rotation
    max_size: u64,

    /// Number of rotated generations to keep
    keep: usize,

    /// Bytes written to the live file so far
    current_size: u64,

    /// Current state of the writer
    state: State,
}

enum State {
    /// Ready to accept writes
    Idle,

    /// Waiting for a new file handle, either from a rotation or a reopen after a failure
    Opening(FileFuture),

    /// Writing the pending buffer to the open file
    Writing,
}

type FileFuture = BoxFuture<'static, io::Result<File>>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RotatingLog {
    /// Opens a rotating log with the default size limit and keep count.
    pub async fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_limits(path, DEFAULT_LOG_MAX_SIZE, DEFAULT_LOG_KEEP).await
    }

    /// Opens (or creates) a rotating log at `path`.
    ///
    /// `keep` is the number of rotated generations preserved; `0` truncates in place.
    pub async fn with_limits(
        path: impl AsRef<Path>,
        max_size: u64,
        keep: usize,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = open_append(path.clone()).await?;
        let current_size = file.metadata().await?.len();

        Ok(Self {
            file: Some(file),
            path,
            max_size,
            keep,
            current_size,
            state: State::Idle,
        })
    }

    /// Path of the live log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `n`th rotated generation of this log.
    pub fn generation_path(&self, n: usize) -> PathBuf {
        generation_path(&self.path, n)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn generation_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

async fn open_append(path: PathBuf) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
}

/// Shifts every generation up by one, moves the live file to generation 1 and opens a new one.
async fn rotate(file: File, path: PathBuf, keep: usize) -> io::Result<File> {
    file.sync_all().await?;
    drop(file);

    if keep == 0 {
        return OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await;
    }

    let oldest = generation_path(&path, keep);
    if fs::try_exists(&oldest).await? {
        fs::remove_file(&oldest).await?;
    }

    for n in (1..keep).rev() {
        let from = generation_path(&path, n);
        if fs::try_exists(&from).await? {
            fs::rename(&from, generation_path(&path, n + 1)).await?;
        }
    }

    fs::rename(&path, generation_path(&path, 1)).await?;
    open_append(path).await
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AsyncWrite for RotatingLog {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        loop {
            match &mut this.state {
                State::Idle => match this.file.take() {
                    None => {
                        this.state = State::Opening(Box::pin(open_append(this.path.clone())));
                    }
                    Some(file)
                        if this.current_size > 0
                            && this.current_size + buf.len() as u64 > this.max_size =>
                    {
                        let fut = rotate(file, this.path.clone(), this.keep);
                        this.state = State::Opening(Box::pin(fut));
                    }
                    Some(file) => {
                        this.file = Some(file);
                        this.state = State::Writing;
                    }
                },
                State::Opening(fut) => match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(file)) => {
                        this.file = Some(file);
                        this.current_size = 0;
                        this.state = State::Writing;
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = State::Idle;
                        return Poll::Ready(Err(e));
                    }
                },
                State::Writing => {
                    let Some(file) = this.file.as_mut() else {
                        this.state = State::Idle;
                        continue;
                    };

                    match Pin::new(file).poll_write(cx, buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(written)) => {
                            this.current_size += written as u64;
                            this.state = State::Idle;
                            return Poll::Ready(Ok(written));
                        }
                        Poll::Ready(Err(e)) => {
                            this.state = State::Idle;
                            return Poll::Ready(Err(e));
                        }
                    }
                }
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
