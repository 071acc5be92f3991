//! Link to the modem's SAP socket
//!
//! A [`ModemLink`] owns one background thread. It makes a bounded number of
//! connection attempts, then reads records until the stream ends, posting
//! everything it learns to the session worker. Writes happen on the worker
//! thread through [`ModemLink::send`].

use std::io::{self, BufReader, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use nexum_sap_core::modem::{self, Inbound};
use nexum_sap_core::PendingRequests;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::machine::Event;
use crate::stream::{DuplexStream, ModemConnector};
use crate::worker::Inbox;

type Slot = Arc<Mutex<Option<Box<dyn DuplexStream>>>>;

/// Modem connection and its reader thread
#[allow(missing_debug_implementations)]
pub(crate) struct ModemLink {
    /// Write half, present once connected
    writer: Slot,
    /// Interrupts the connect backoff
    stop: Sender<()>,
    /// Set once the worker asked the link to stop
    stopping: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ModemLink {
    /// Start connecting in the background
    pub(crate) fn spawn(
        connector: Arc<dyn ModemConnector>,
        config: &ServerConfig,
        pending: Arc<PendingRequests>,
        inbox: Sender<Inbox>,
    ) -> io::Result<Self> {
        let writer: Slot = Arc::new(Mutex::new(None));
        let stopping = Arc::new(AtomicBool::new(false));
        let (stop, stop_rx) = bounded(1);

        let task = LinkTask {
            connector,
            config: config.clone(),
            pending,
            inbox,
            writer: Arc::clone(&writer),
            stopping: Arc::clone(&stopping),
            stop_rx,
        };
        let thread = thread::Builder::new()
            .name("sap-modem".into())
            .spawn(move || task.run())?;

        Ok(Self {
            writer,
            stop,
            stopping,
            thread,
        })
    }

    /// Write one framed record
    pub(crate) fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut slot = self.writer.lock();
        let stream = slot
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        stream.write_all(frame)?;
        stream.flush()
    }

    /// Stop connecting or reading and wait for the link thread
    ///
    /// No further events are posted once this returns.
    pub(crate) fn shutdown(self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop.try_send(());
        if let Some(stream) = self.writer.lock().take()
            && let Err(e) = stream.shutdown_stream()
        {
            debug!(error = %e, "Modem stream shutdown failed");
        }
        // Shutting the stream down unblocks the reader
        if self.thread.join().is_err() {
            error!("Modem link thread panicked");
        }
    }
}

struct LinkTask {
    connector: Arc<dyn ModemConnector>,
    config: ServerConfig,
    pending: Arc<PendingRequests>,
    inbox: Sender<Inbox>,
    writer: Slot,
    stopping: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
}

impl LinkTask {
    fn run(self) {
        let Some(stream) = self.connect() else {
            self.post(Event::ModemConnectFailed);
            return;
        };

        let reader = match stream.try_clone_stream() {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %e, "Failed to clone modem stream");
                self.post(Event::ModemConnectFailed);
                return;
            }
        };

        {
            let mut slot = self.writer.lock();
            if self.is_stopping() {
                let _ = stream.shutdown_stream();
                return;
            }
            *slot = Some(stream);
        }
        self.post(Event::ModemConnected);

        self.read_loop(reader);
        self.post(Event::ModemClosed);
    }

    fn connect(&self) -> Option<Box<dyn DuplexStream>> {
        let started = Instant::now();
        let attempts = self.config.modem_connect_attempts.max(1);

        for attempt in 1..=attempts {
            if self.is_stopping() {
                return None;
            }
            match self.connector.connect() {
                Ok(stream) => {
                    debug!(attempt, "Connected to modem");
                    return Some(stream);
                }
                Err(e) if started.elapsed() < self.config.modem_connect_warn_after => {
                    debug!(attempt, error = %e, "Modem connection attempt failed");
                }
                Err(e) => warn!(attempt, error = %e, "Modem connection attempt failed"),
            }
            if attempt == attempts {
                break;
            }
            match self.stop_rx.recv_timeout(self.config.modem_connect_backoff) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }

        error!(attempts, "Giving up on modem connection");
        None
    }

    fn read_loop(&self, stream: Box<dyn DuplexStream>) {
        let mut reader = BufReader::new(stream);
        loop {
            let header = match modem::read_record(&mut reader, self.config.max_record_len) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    info!("Modem closed the link");
                    return;
                }
                Err(e) => {
                    if !self.is_stopping() {
                        warn!(error = %e, "Modem link failed");
                    }
                    return;
                }
            };
            trace!(id = header.id, token = ?header.token, "Record from modem");

            match modem::decode_inbound(&header, &self.pending) {
                Ok(Inbound::Response(msg)) => self.post(Event::ModemResponse(msg)),
                Ok(Inbound::Unsolicited(msg)) => self.post(Event::ModemIndication(msg)),
                Ok(Inbound::Uncorrelated { token }) => {
                    warn!(token, "Dropping response to a request that is no longer pending");
                }
                Err(e) => warn!(error = %e, "Dropping malformed modem record"),
            }
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn post(&self, event: Event) {
        if self.is_stopping() {
            trace!(?event, "Modem link stopping, dropping event");
            return;
        }
        if self.inbox.send(Inbox::Event(event)).is_err() {
            debug!("Session worker gone");
        }
    }
}
