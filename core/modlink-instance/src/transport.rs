//! Local point-to-point channel between agent processes.

use std::fmt;
use std::io;
use std::path::Path;
#[cfg(unix)]
use std::path::PathBuf;

/// Well-known address of the primary's relay channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    #[cfg(unix)]
    path: PathBuf,
    #[cfg(windows)]
    pipe: String,
}

impl Endpoint {
    /// `<runtime_dir>/<name>.sock` on Unix, `\\.\pipe\<name>` on Windows.
    #[must_use]
    pub fn for_instance(runtime_dir: &Path, name: &str) -> Self {
        #[cfg(unix)]
        {
            Self {
                path: runtime_dir.join(format!("{name}.sock")),
            }
        }
        #[cfg(windows)]
        {
            let _ = runtime_dir;
            Self {
                pipe: format!(r"\\.\pipe\{name}"),
            }
        }
    }

    #[cfg(unix)]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(unix)]
        {
            write!(f, "{}", self.path.display())
        }
        #[cfg(windows)]
        {
            f.write_str(&self.pipe)
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::Endpoint;
    use std::io;
    use tokio::net::{UnixListener, UnixStream};

    pub(crate) type Incoming = UnixStream;
    pub(crate) type Outgoing = UnixStream;

    pub(crate) struct Listener {
        inner: UnixListener,
    }

    impl Listener {
        pub(crate) fn bind(endpoint: &Endpoint) -> io::Result<Self> {
            // A socket file left by a crashed primary would make bind fail.
            // The caller holds the instance lock, so nothing else owns it.
            match std::fs::remove_file(endpoint.path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            if let Some(parent) = endpoint.path().parent() {
                std::fs::create_dir_all(parent)?;
            }
            let inner = UnixListener::bind(endpoint.path())?;
            Ok(Self { inner })
        }

        pub(crate) async fn accept(&mut self) -> io::Result<Incoming> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    pub(crate) async fn connect(endpoint: &Endpoint) -> io::Result<Outgoing> {
        UnixStream::connect(endpoint.path()).await
    }

    pub(crate) fn cleanup(endpoint: &Endpoint) {
        let _ = std::fs::remove_file(endpoint.path());
    }
}

#[cfg(windows)]
mod imp {
    use super::Endpoint;
    use std::io;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// `ERROR_PIPE_BUSY`: every server instance is connected.
    const PIPE_BUSY: i32 = 231;

    pub(crate) type Incoming = NamedPipeServer;
    pub(crate) type Outgoing = NamedPipeClient;

    pub(crate) struct Listener {
        name: String,
        server: NamedPipeServer,
    }

    impl Listener {
        pub(crate) fn bind(endpoint: &Endpoint) -> io::Result<Self> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&endpoint.pipe)?;
            Ok(Self {
                name: endpoint.pipe.clone(),
                server,
            })
        }

        pub(crate) async fn accept(&mut self) -> io::Result<Incoming> {
            self.server.connect().await?;
            let next = ServerOptions::new().create(&self.name)?;
            Ok(std::mem::replace(&mut self.server, next))
        }
    }

    pub(crate) async fn connect(endpoint: &Endpoint) -> io::Result<Outgoing> {
        loop {
            match ClientOptions::new().open(&endpoint.pipe) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(PIPE_BUSY) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn cleanup(_endpoint: &Endpoint) {}
}

pub(crate) use imp::{Incoming, Listener, cleanup, connect};

/// Maps a connect failure to "nobody is listening".
#[must_use]
pub(crate) fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}
