//! Demo server for the future runtime.
//!
//! Listens for TCP clients speaking a line-oriented protocol: each request
//! is two whitespace-separated positive integers, each response is their
//! sum followed by a newline. A zero, a negative or malformed number, or
//! end of input ends the session. Every moving part is composed from the
//! crate's combinators; the interesting piece is the buffered integer
//! reader, an asynchronous loop that refills from the socket only when the
//! scan runs dry.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;

use pact::chain::{catch_async, loop_async, then, then_async};
use pact::error::TaskError;
use pact::executor::ThreadPool;
use pact::future::{completed_future, Future};
use pact::net::{TcpListener, TcpStream};
use pact::waiter::WaiterSet;

const RECV_CHUNK: usize = 16;

/// Answers each pair of whitespace-separated positive integers read from a
/// TCP connection with their sum.
#[derive(Parser, Debug)]
struct Args {
    /// The port number to listen on.
    #[arg(short, long, default_value_t = 5000)]
    port: u16,
}

/// Marker error for a session that ended cleanly, with no further request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("session ended")]
struct SessionEnd;

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    BeforeFirstDigit,
    ReadingNumber,
    AtEnd,
    Error,
}

struct Scan {
    value: i64,
    state: ScanState,
}

struct ReadBuffer {
    data: Vec<u8>,
    pos: usize,
    eof: bool,
}

/// Buffered integer lexer over a socket.
#[derive(Clone)]
struct BufferedReader {
    executor: Arc<ThreadPool>,
    socket: Arc<TcpStream>,
    buffer: Arc<Mutex<ReadBuffer>>,
}

impl BufferedReader {
    fn new(executor: Arc<ThreadPool>, socket: Arc<TcpStream>) -> Self {
        BufferedReader {
            executor,
            socket,
            buffer: Arc::new(Mutex::new(ReadBuffer {
                data: Vec::new(),
                pos: 0,
                eof: false,
            })),
        }
    }

    /// Reads one whitespace-terminated integer. Resolves to -1 on end of
    /// input or malformed data.
    fn read_int(&self) -> Future<i64> {
        let scan = Arc::new(Mutex::new(Scan {
            value: 0,
            state: ScanState::BeforeFirstDigit,
        }));

        let reader = self.clone();
        let scan_body = Arc::clone(&scan);
        let scanned = loop_async(
            &self.executor,
            |more: &bool| *more,
            move |_| reader.scan_step(&scan_body),
            true,
        );

        then(
            &self.executor,
            move |_| {
                let scan = scan.lock().unwrap();
                Ok(if scan.state == ScanState::AtEnd {
                    scan.value
                } else {
                    -1
                })
            },
            scanned,
        )
    }

    /// Consumes buffered bytes until the current number ends or the buffer
    /// runs dry; in the latter case chains a refill from the socket.
    fn scan_step(&self, scan: &Arc<Mutex<Scan>>) -> Result<Future<bool>> {
        let mut scan = scan.lock().unwrap();
        let mut buffer = self.buffer.lock().unwrap();
        while buffer.pos < buffer.data.len() {
            let c = buffer.data[buffer.pos];
            match c {
                b'0'..=b'9' => {
                    scan.state = ScanState::ReadingNumber;
                    scan.value = 10 * scan.value + i64::from(c - b'0');
                }
                b' ' | b'\t' | b'\r' | b'\n' => {
                    // The delimiter is left in the buffer; the next scan
                    // skips leading whitespace anyway.
                    if scan.state == ScanState::ReadingNumber {
                        scan.state = ScanState::AtEnd;
                        return Ok(completed_future(false));
                    }
                }
                _ => {
                    scan.state = ScanState::Error;
                    return Ok(completed_future(false));
                }
            }
            buffer.pos += 1;
        }
        if buffer.eof {
            scan.state = if scan.state == ScanState::ReadingNumber {
                ScanState::AtEnd
            } else {
                ScanState::Error
            };
            return Ok(completed_future(false));
        }
        drop(buffer);
        Ok(self.read_more())
    }

    /// Refills the buffer from the socket; resolves to true so the scan
    /// loop goes round again.
    fn read_more(&self) -> Future<bool> {
        let received = self.socket.recv(RECV_CHUNK);
        let buffer = Arc::clone(&self.buffer);
        then(
            &self.executor,
            move |chunk: Vec<u8>| {
                let mut buffer = buffer.lock().unwrap();
                let consumed = buffer.pos;
                buffer.data.drain(..consumed);
                buffer.pos = 0;
                if chunk.is_empty() {
                    buffer.eof = true;
                } else {
                    buffer.data.extend_from_slice(&chunk);
                }
                Ok(true)
            },
            received,
        )
    }
}

/// Serves one client connection.
#[derive(Clone)]
struct ClientHandler {
    executor: Arc<ThreadPool>,
    socket: Arc<TcpStream>,
    reader: BufferedReader,
}

impl ClientHandler {
    fn new(executor: Arc<ThreadPool>, socket: Arc<TcpStream>) -> Self {
        let reader = BufferedReader::new(Arc::clone(&executor), Arc::clone(&socket));
        ClientHandler {
            executor,
            socket,
            reader,
        }
    }

    /// One request: two integers in, their sum out. Resolves to whether
    /// the response was sent in full.
    fn execute_one_request(&self) -> Future<bool> {
        let first = self.reader.read_int();

        let reader = self.reader.clone();
        let second = then_async(
            &self.executor,
            move |a: i64| {
                if a > 0 {
                    Ok(reader.read_int())
                } else {
                    Err(SessionEnd.into())
                }
            },
            first.clone(),
        );

        let socket = Arc::clone(&self.socket);
        then_async(
            &self.executor,
            move |b: i64| {
                if b > 0 {
                    let sum = first.get()? + b;
                    Ok(socket.send(format!("{sum}\n").into_bytes()))
                } else {
                    Err(anyhow!("malformed request"))
                }
            },
            second,
        )
    }

    /// Serves requests until the client goes away or a request fails.
    fn run(&self) -> Future<bool> {
        let handler = self.clone();
        let served = loop_async(
            &self.executor,
            |more: &bool| *more,
            move |_| Ok(handler.execute_one_request()),
            true,
        );
        catch_async(
            &self.executor,
            |err: TaskError| {
                if err.downcast_ref::<SessionEnd>().is_some() {
                    info!("client session ended");
                    Ok(completed_future(false))
                } else {
                    Err(err.into())
                }
            },
            served,
        )
    }
}

struct Server {
    executor: Arc<ThreadPool>,
    waiter: WaiterSet,
}

impl Server {
    fn new() -> Self {
        Server {
            executor: Arc::new(ThreadPool::new(1)),
            waiter: WaiterSet::new(),
        }
    }

    fn run(&self, port: u16) -> Result<()> {
        let listener = Arc::new(TcpListener::bind(("0.0.0.0", port))?);
        info!("listening on port {port}");

        let executor = Arc::clone(&self.executor);
        let waiter = self.waiter.clone();
        let accept_loop = loop_async(
            &self.executor,
            |_: &bool| true,
            move |_| Ok(process_one_client(&executor, &waiter, &listener)),
            true,
        );
        self.waiter.add(accept_loop);
        self.waiter.wait_for_all();
        Ok(())
    }
}

/// Accepts one client, spins up its handler, and parks the session future
/// in the waiter set. Resolves as soon as the connection is accepted so
/// the accept loop can go round again.
fn process_one_client(
    executor: &Arc<ThreadPool>,
    waiter: &WaiterSet,
    listener: &Arc<TcpListener>,
) -> Future<bool> {
    let socket_f = listener.accept();

    let handler_exec = Arc::clone(executor);
    let handler_f = then(
        executor,
        move |socket: Arc<TcpStream>| Ok(Arc::new(ClientHandler::new(handler_exec, socket))),
        socket_f.clone(),
    );
    let session_f = then_async(
        executor,
        |handler: Arc<ClientHandler>| Ok(handler.run()),
        handler_f,
    );
    waiter.add(session_f);

    then(executor, |_socket: Arc<TcpStream>| Ok(true), socket_f)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    Server::new().run(args.port)
}
