//! Client stream reader
//!
//! Reads SAP requests from the client and posts them to the worker. Once the
//! client is gone it waits, bounded by the deinit timeout, for the modem side
//! to wind down, then tells the worker to terminate.

use std::io::{self, BufReader};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nexum_sap_core::read_request;
use tracing::{debug, info, trace, warn};

use crate::machine::Event;
use crate::stream::DuplexStream;
use crate::worker::Inbox;

/// Start the reader thread
pub(crate) fn spawn_reader(
    stream: Box<dyn DuplexStream>,
    inbox: Sender<Inbox>,
    deinit: Receiver<()>,
    deinit_timeout: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("sap-rfcomm".into())
        .spawn(move || {
            read_requests(stream, &inbox);
            post(&inbox, Inbox::Event(Event::ClientClosed));

            match deinit.recv_timeout(deinit_timeout) {
                Ok(()) => debug!("Modem side wound down"),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout = ?deinit_timeout, "Timed out waiting for modem disconnect");
                }
                Err(RecvTimeoutError::Disconnected) => debug!("Session worker already gone"),
            }
            post(&inbox, Inbox::Terminate);
        })
}

fn read_requests(stream: Box<dyn DuplexStream>, inbox: &Sender<Inbox>) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_request(&mut reader) {
            Ok(Some(msg)) => {
                trace!(kind = %msg.kind(), "Request from client");
                post(inbox, Inbox::Event(Event::ClientRequest(msg)));
            }
            Ok(None) => {
                info!("Client closed the SAP link");
                return;
            }
            Err(e) if e.is_framing() => {
                warn!(error = %e, "Client stream failed");
                post(inbox, Inbox::Event(Event::ClientDecodeFailed));
                return;
            }
            Err(e) => {
                debug!(error = %e, "Rejecting malformed request");
                post(inbox, Inbox::Event(Event::ClientDecodeFailed));
            }
        }
    }
}

fn post(inbox: &Sender<Inbox>, msg: Inbox) {
    if inbox.send(msg).is_err() {
        debug!("Session worker gone");
    }
}
