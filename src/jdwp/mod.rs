//! JDWP client: socket attach, synchronous request/reply and asynchronous
//! event-set delivery.
//!
//! A dedicated reader thread demultiplexes the socket: reply packets are
//! routed to the caller blocked in [`Client::request`] by packet id,
//! composite event packets are queued on an [`EventReceiver`]. When the
//! socket dies the pending senders and the event channel are dropped, which
//! surfaces as [`Error::Disconnected`] to every waiter.

pub mod codec;
pub mod command;
pub mod event;
pub mod types;

use codec::Packet;
use event::EventSet;
use log::{debug, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;
use types::IdSizes;

const EVENT_COMMAND_SET: u8 = 64;
const EVENT_COMPOSITE: u8 = 100;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("handshake rejected by target")]
    Handshake,
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),
    #[error("command ({0}, {1}) failed with protocol error code {2}")]
    ErrorCode(u8, u8, u16),
    #[error("connection to target lost")]
    Disconnected,
    #[error("attach to {host}:{port} failed after {attempts} attempts")]
    AttachExhausted {
        host: String,
        port: u16,
        attempts: u32,
    },
}

struct ClientInner {
    writer: Mutex<TcpStream>,
    /// Kept for shutting the socket down from another thread.
    stream: TcpStream,
    pending: Mutex<HashMap<u32, Sender<Packet>>>,
    next_id: AtomicU32,
    sizes: OnceLock<IdSizes>,
}

/// Cloneable handle to one attached target VM.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Receiving side of the asynchronous event stream, owned by the dispatch
/// loop. `next` blocks until the target delivers an event set or the
/// connection dies.
pub struct EventReceiver {
    rx: Receiver<bytes::Bytes>,
    sizes: IdSizes,
}

impl EventReceiver {
    pub fn next(&self) -> Result<EventSet, Error> {
        let data = self.rx.recv().map_err(|_| Error::Disconnected)?;
        event::decode_event_set(&data, &self.sizes)
    }
}

impl Client {
    /// Attach to a debug agent, retrying a refused TCP connect with a fixed
    /// delay. Once the socket is open, a failed handshake is terminal.
    pub fn attach(
        host: &str,
        port: u16,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<(Client, EventReceiver), Error> {
        for attempt in 0..retries {
            match TcpStream::connect((host, port)) {
                Ok(stream) => return Self::handshake_and_split(stream),
                Err(e) => {
                    debug!(
                        target: "jdwp",
                        "attach attempt {}/{} to {host}:{port} failed: {e}",
                        attempt + 1,
                        retries
                    );
                    thread::sleep(retry_delay);
                }
            }
        }
        Err(Error::AttachExhausted {
            host: host.to_string(),
            port,
            attempts: retries,
        })
    }

    fn handshake_and_split(mut stream: TcpStream) -> Result<(Client, EventReceiver), Error> {
        codec::handshake(&mut stream)?;

        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let inner = Arc::new(ClientInner {
            writer: Mutex::new(writer),
            stream,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            sizes: OnceLock::new(),
        });

        let (events_tx, events_rx) = mpsc::channel();
        let reader_inner = inner.clone();
        thread::Builder::new()
            .name("jdwp-reader".into())
            .spawn(move || read_loop(reader, reader_inner, events_tx))?;

        let client = Client { inner };
        let sizes = client.id_sizes()?;
        let _ = client.inner.sizes.set(sizes);

        Ok((client, EventReceiver {
            rx: events_rx,
            sizes,
        }))
    }

    pub(crate) fn sizes(&self) -> IdSizes {
        self.inner.sizes.get().copied().unwrap_or_default()
    }

    /// Send one command and block until its reply arrives.
    pub fn request(&self, set: u8, cmd: u8, data: bytes::Bytes) -> Result<bytes::Bytes, Error> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.inner
            .pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        let res = {
            let mut writer = self.inner.writer.lock().expect("writer poisoned");
            codec::write_packet(&mut *writer, &Packet::command(id, set, cmd, data))
        };
        if let Err(e) = res {
            self.inner
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&id);
            return Err(e);
        }

        let reply = rx.recv().map_err(|_| Error::Disconnected)?;
        if reply.error != 0 {
            return Err(Error::ErrorCode(set, cmd, reply.error));
        }
        Ok(reply.data)
    }

    /// Shut the socket down, waking the reader thread and every pending
    /// request. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.inner.stream.shutdown(Shutdown::Both);
    }
}

fn read_loop(
    mut stream: TcpStream,
    inner: Arc<ClientInner>,
    events_tx: Sender<bytes::Bytes>,
) {
    loop {
        let packet = match codec::read_packet(&mut stream) {
            Ok(packet) => packet,
            Err(Error::IO(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!(target: "jdwp", "reader terminated: {e}");
                break;
            }
        };

        if packet.is_reply() {
            let waiter = inner
                .pending
                .lock()
                .expect("pending map poisoned")
                .remove(&packet.id);
            match waiter {
                // receiver may have given up, not an error
                Some(tx) => drop(tx.send(packet)),
                None => debug!(target: "jdwp", "reply {} without a waiter", packet.id),
            }
        } else if packet.command == (EVENT_COMMAND_SET, EVENT_COMPOSITE) {
            if events_tx.send(packet.data).is_err() {
                break;
            }
        } else {
            debug!(
                target: "jdwp",
                "unsolicited command packet ({}, {}) ignored",
                packet.command.0,
                packet.command.1
            );
        }
    }

    // wake everyone still blocked on a reply
    inner
        .pending
        .lock()
        .expect("pending map poisoned")
        .clear();
    debug!(target: "jdwp", "reader exited");
}
