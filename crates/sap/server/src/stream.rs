//! Byte streams carrying the client and modem links

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ServerError;

/// Connected, bidirectional byte stream
///
/// The session reads from one handle on a dedicated thread and writes
/// through a clone, so the stream must support cloning and an out-of-band
/// shutdown that wakes a blocked reader.
pub trait DuplexStream: Read + Write + Send + fmt::Debug {
    /// Another handle to the same underlying stream
    fn try_clone_stream(&self) -> io::Result<Box<dyn DuplexStream>>;

    /// Shut down both directions
    fn shutdown_stream(&self) -> io::Result<()>;
}

impl DuplexStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn DuplexStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl DuplexStream for UnixStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn DuplexStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Opens the stream to the modem
pub trait ModemConnector: Send + Sync {
    /// Make one connection attempt
    fn connect(&self) -> io::Result<Box<dyn DuplexStream>>;
}

impl<F> ModemConnector for F
where
    F: Fn() -> io::Result<Box<dyn DuplexStream>> + Send + Sync,
{
    fn connect(&self) -> io::Result<Box<dyn DuplexStream>> {
        self()
    }
}

/// Address of the modem's SAP socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEndpoint {
    /// Unix domain socket
    #[cfg(unix)]
    Unix(PathBuf),
    /// TCP socket
    Tcp(SocketAddr),
}

impl fmt::Display for ModemEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

impl FromStr for ModemEndpoint {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServerError::InvalidEndpoint(s.to_string());
        match s.split_once(':') {
            #[cfg(unix)]
            Some(("unix", path)) if !path.is_empty() => Ok(Self::Unix(PathBuf::from(path))),
            Some(("tcp", addr)) => addr.parse().map(Self::Tcp).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl ModemConnector for ModemEndpoint {
    fn connect(&self) -> io::Result<Box<dyn DuplexStream>> {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => Ok(Box::new(UnixStream::connect(path)?)),
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}
