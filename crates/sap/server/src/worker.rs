//! Session worker
//!
//! Every state change happens on this one thread. Readers, timers and the
//! control surface only post to its inbox.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use nexum_sap_core::{PendingRequests, ProtocolMessage, modem};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::host::SessionHost;
use crate::machine::{Context, DisconnectAction, Effect, Event, Machine};
use crate::modem_link::ModemLink;
use crate::state::{ConnectionState, SharedState};
use crate::stream::{DuplexStream, ModemConnector};
use crate::timer::{Scheduler, TimerHandle};

/// Message delivered to the worker
#[derive(Debug)]
pub(crate) enum Inbox {
    /// Input for the state machine
    Event(Event),
    /// A disconnect timer fired
    Timer {
        /// Generation the timer was armed with
        generation: u64,
        /// Action to take
        action: DisconnectAction,
    },
    /// The client reader is done; tear the session down
    Terminate,
}

/// Owns the state machine and everything it acts on
#[allow(missing_debug_implementations)]
pub(crate) struct Worker {
    pub(crate) machine: Machine,
    pub(crate) config: ServerConfig,
    pub(crate) inbox: Receiver<Inbox>,
    pub(crate) sender: Sender<Inbox>,
    pub(crate) client: Option<Box<dyn DuplexStream>>,
    pub(crate) modem: Option<ModemLink>,
    pub(crate) connector: Arc<dyn ModemConnector>,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) host: Arc<dyn SessionHost>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    /// Armed timer and its generation
    pub(crate) timer: Option<(u64, TimerHandle)>,
    pub(crate) generation: u64,
    /// Wakes the client reader once the modem side is gone
    pub(crate) deinit: Sender<()>,
    pub(crate) state: SharedState,
}

impl Worker {
    /// Process the inbox until the session terminates
    pub(crate) fn run(mut self) {
        info!("SAP session started");
        while let Ok(msg) = self.inbox.recv() {
            match msg {
                Inbox::Event(event) => self.dispatch(event),
                Inbox::Timer { generation, action } => self.on_timer(generation, action),
                Inbox::Terminate => break,
            }
        }
        self.teardown();
        info!("SAP session finished");
    }

    fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            if matches!(event, Event::ModemClosed | Event::ModemConnectFailed)
                && let Some(link) = self.modem.take()
            {
                link.shutdown();
            }
            if matches!(
                event,
                Event::ClientRequest(_) | Event::ModemResponse(_) | Event::ModemIndication(_)
            ) {
                self.host.activity();
            }

            let ctx = Context {
                call_ongoing: self.host.is_call_ongoing(),
                pending_requests: self.pending.len(),
            };
            for effect in self.machine.step(event, &ctx) {
                if let Some(next) = self.apply(effect) {
                    queue.push_back(next);
                }
            }
        }
    }

    fn on_timer(&mut self, generation: u64, action: DisconnectAction) {
        match self.timer {
            Some((armed, _)) if armed == generation => {
                self.timer = None;
                debug!(%action, "Disconnect timer fired");
                self.dispatch(Event::Disconnect(action));
            }
            _ => trace!(generation, %action, "Ignoring stale timer"),
        }
    }

    /// Carry out one effect, returning an event it produced
    fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::SendClient(msg) => self.send_client(&msg),
            Effect::SendModem(msg) => return self.send_modem(&msg),
            Effect::StartModemLink => {
                if let Some(link) = self.modem.take() {
                    link.shutdown();
                }
                match ModemLink::spawn(
                    Arc::clone(&self.connector),
                    &self.config,
                    Arc::clone(&self.pending),
                    self.sender.clone(),
                ) {
                    Ok(link) => self.modem = Some(link),
                    Err(e) => {
                        warn!(error = %e, "Unable to start modem link");
                        return Some(Event::ModemConnectFailed);
                    }
                }
            }
            Effect::StopModemLink => {
                if let Some(link) = self.modem.take() {
                    link.shutdown();
                }
            }
            Effect::StartTimer { action, after } => {
                self.cancel_timer();
                self.generation += 1;
                let generation = self.generation;
                let sender = self.sender.clone();
                let handle = self.scheduler.schedule(
                    after,
                    Box::new(move || {
                        let _ = sender.send(Inbox::Timer { generation, action });
                    }),
                );
                debug!(%action, ?after, "Disconnect timer armed");
                self.timer = Some((generation, handle));
            }
            Effect::CancelTimer => self.cancel_timer(),
            Effect::ShowNotification(action) => self.host.show_disconnect_notification(action),
            Effect::ClearNotification => self.host.clear_notification(),
            Effect::StateChanged { from, to } => {
                self.state.set(to);
                self.host.state_changed(from, to);
            }
            Effect::ProfileConnected => self.host.profile_connected(),
            Effect::CloseClient => self.close_client(),
            Effect::DeinitComplete => {
                let _ = self.deinit.try_send(());
            }
            Effect::DiscardPending => {
                let dropped = self.pending.clear_all();
                if dropped > 0 {
                    debug!(dropped, "Discarded pending modem requests");
                }
            }
        }
        None
    }

    fn send_client(&mut self, msg: &ProtocolMessage) {
        let Some(client) = self.client.as_mut() else {
            debug!(kind = %msg.kind(), "Client closed, dropping message");
            return;
        };
        match msg.write_to(client) {
            Ok(()) => self.host.activity(),
            Err(e) => warn!(kind = %msg.kind(), error = %e, "Failed to write to client"),
        }
    }

    fn send_modem(&mut self, msg: &ProtocolMessage) -> Option<Event> {
        let kind = msg.kind();
        let Some(link) = self.modem.as_ref() else {
            warn!(%kind, "Modem link down, dropping request");
            return Some(Event::ModemWriteFailed(kind));
        };
        let (token, frame) = match modem::encode_request(msg, &self.pending) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(%kind, error = %e, "Unable to encode modem request");
                return Some(Event::ModemWriteFailed(kind));
            }
        };
        if let Err(e) = link.send(&frame) {
            warn!(%kind, token, error = %e, "Failed to write to modem");
            self.pending.take(token);
            return Some(Event::ModemWriteFailed(kind));
        }
        trace!(%kind, token, "Request sent to modem");
        self.host.activity();
        None
    }

    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn close_client(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("Closing client stream");
            if let Err(e) = client.shutdown_stream() {
                debug!(error = %e, "Client stream shutdown failed");
            }
        }
    }

    fn teardown(&mut self) {
        self.cancel_timer();
        if let Some(link) = self.modem.take() {
            link.shutdown();
        }
        self.close_client();
        self.pending.clear_all();

        let from = self.machine.state();
        if from != ConnectionState::Disconnected {
            warn!(state = %from, "Session terminated without a clean disconnect");
            self.state.set(ConnectionState::Disconnected);
            self.host.state_changed(from, ConnectionState::Disconnected);
        }
        self.host.clear_notification();
        self.host.session_closed();
    }
}
