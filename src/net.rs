//! Asynchronous TCP sockets.
//!
//! Each socket owns a single-thread [ThreadPool] and dispatches its
//! blocking calls there; `recv`, `send`, `accept` and `connect` return
//! futures that settle when the underlying call finishes. This keeps the
//! socket layer honest to the future protocol without tying the runtime
//! to an OS readiness interface.
//!
//! # Example
//!
//! ```no_run
//! use pact::net::{TcpListener, TcpStream};
//!
//! let listener = TcpListener::bind("0.0.0.0:5000")?;
//! let client = listener.accept().get()?;
//! let request = client.recv(1024).get()?;
//! client.send(request).get()?; // echo
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use log::trace;

use crate::executor::{Executor, ThreadPool};
use crate::future::{Future, Promise};

/// A connection socket offering asynchronous operations.
pub struct TcpStream {
    stream: Arc<StdTcpStream>,
    io_pool: ThreadPool,
}

impl TcpStream {
    fn from_std(stream: StdTcpStream) -> Self {
        TcpStream {
            stream: Arc::new(stream),
            io_pool: ThreadPool::new(1),
        }
    }

    /// Connects to a remote peer. The future completes with the connected
    /// socket once the connection is established.
    pub fn connect<A>(addrs: A) -> Future<Arc<TcpStream>>
    where
        A: ToSocketAddrs + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        thread::spawn(move || match StdTcpStream::connect(addrs) {
            Ok(stream) => {
                promise.set(Arc::new(TcpStream::from_std(stream)));
            }
            Err(err) => {
                promise.fail(anyhow::Error::new(err).context("tcp connect"));
            }
        });
        future
    }

    /// Launches a receive of at most `max_len` bytes. The future completes
    /// with the bytes read once at least one byte is available; an empty
    /// buffer means the peer closed the connection.
    pub fn recv(&self, max_len: usize) -> Future<Vec<u8>> {
        let promise = Promise::new();
        let future = promise.future();
        let stream = Arc::clone(&self.stream);
        self.io_pool.enqueue(Box::new(move || {
            let mut buf = vec![0u8; max_len];
            match (&*stream).read(&mut buf) {
                Ok(len) => {
                    buf.truncate(len);
                    promise.set(buf);
                }
                Err(err) => {
                    promise.fail(anyhow::Error::new(err).context("recv"));
                }
            }
        }));
        future
    }

    /// Launches sending `data`. The future resolves to true only if every
    /// byte was written; a short or failed write reports false. Retrying
    /// is the caller's decision.
    pub fn send(&self, data: Vec<u8>) -> Future<bool> {
        let promise = Promise::new();
        let future = promise.future();
        let stream = Arc::clone(&self.stream);
        self.io_pool.enqueue(Box::new(move || {
            match (&*stream).write(&data) {
                Ok(written) => {
                    promise.set(written == data.len());
                }
                Err(_) => {
                    promise.set(false);
                }
            }
        }));
        future
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

/// A listening socket whose accepts complete asynchronously.
pub struct TcpListener {
    listener: Arc<StdTcpListener>,
    accept_pool: ThreadPool,
}

impl TcpListener {
    pub fn bind(addrs: impl ToSocketAddrs) -> anyhow::Result<Self> {
        let listener = StdTcpListener::bind(addrs).context("tcp bind")?;
        Ok(TcpListener {
            listener: Arc::new(listener),
            accept_pool: ThreadPool::new(1),
        })
    }

    /// Starts waiting for a client. The future completes with the accepted
    /// connection.
    pub fn accept(&self) -> Future<Arc<TcpStream>> {
        let promise = Promise::new();
        let future = promise.future();
        let listener = Arc::clone(&self.listener);
        self.accept_pool.enqueue(Box::new(move || match listener.accept() {
            Ok((stream, peer)) => {
                trace!("accepted connection from {peer}");
                promise.set(Arc::new(TcpStream::from_std(stream)));
            }
            Err(err) => {
                promise.fail(anyhow::Error::new(err).context("accept"));
            }
        }));
        future
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
