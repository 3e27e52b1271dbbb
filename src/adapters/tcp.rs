//! TCP adapter: std sockets behind the [`Socket`] and [`Listener`] ports.
//!
//! The listener is non-blocking, so `accept` never stalls the loop.
//! Accepted streams are handed to the frame layer, which switches them
//! to non-blocking with `TCP_NODELAY` during `init()`.

use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};

use log::debug;

use crate::app::ports::{Listener, Socket};

pub struct TcpSocket {
    /// `None` after `close()`.
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpSocket {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        Self {
            stream: Some(stream),
            peer,
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}

impl Socket for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    fn writev(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.stream()?.write_vectored(bufs)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.stream()?.set_nonblocking(nonblocking)
    }

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        self.stream()?.set_nodelay(nodelay)
    }

    fn peer_name(&self) -> String {
        self.peer.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!("Closing {}", self.peer);
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream()?.shutdown(Shutdown::Write)
    }
}

pub struct TcpListenerAdapter {
    listener: TcpListener,
    local: String,
}

impl TcpListenerAdapter {
    /// Bind on all interfaces.
    pub fn bind(port: u16) -> io::Result<Self> {
        Self::bind_addr(("0.0.0.0", port))
    }

    pub fn bind_addr(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?.to_string();
        Ok(Self { listener, local })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }
}

impl Listener for TcpListenerAdapter {
    fn accept(&mut self) -> io::Result<Option<Box<dyn Socket>>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(Box::new(TcpSocket::new(stream)))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_name(&self) -> String {
        self.local.clone()
    }
}
