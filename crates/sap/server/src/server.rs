//! Public entry point of a SAP session

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded, unbounded};
use nexum_sap_core::{PendingRequests, TestMode};
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::host::{NoopHost, SessionHost};
use crate::machine::{DisconnectAction, Event, Machine};
use crate::rfcomm;
use crate::state::{ConnectionState, SharedState};
use crate::stream::{DuplexStream, ModemConnector};
use crate::timer::{Scheduler, ThreadScheduler};
use crate::worker::{Inbox, Worker};

/// Builder for a [`SapServer`]
#[allow(missing_debug_implementations)]
pub struct SapServerBuilder {
    client: Box<dyn DuplexStream>,
    connector: Arc<dyn ModemConnector>,
    host: Arc<dyn SessionHost>,
    scheduler: Arc<dyn Scheduler>,
    config: ServerConfig,
    test_mode: Option<TestMode>,
}

impl SapServerBuilder {
    /// Report session events to `host`
    pub fn host(mut self, host: Arc<dyn SessionHost>) -> Self {
        self.host = host;
        self
    }

    /// Run disconnect timers on `scheduler`
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Use `config` instead of the defaults
    pub const fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Announce SIM-access test mode on the first modem connection
    pub const fn test_mode(mut self, mode: TestMode) -> Self {
        self.test_mode = Some(mode);
        self
    }

    /// Spawn the session threads
    pub fn start(self) -> Result<SapServer> {
        let (sender, inbox) = unbounded();
        let (deinit, deinit_rx) = bounded(1);
        let state = SharedState::default();

        let reader_stream = self.client.try_clone_stream()?;
        let deinit_timeout = self.config.deinit_timeout;

        let worker = Worker {
            machine: Machine::new(self.config.clone()),
            config: self.config,
            inbox,
            sender: sender.clone(),
            client: Some(self.client),
            modem: None,
            connector: self.connector,
            pending: Arc::new(PendingRequests::new()),
            host: self.host,
            scheduler: self.scheduler,
            timer: None,
            generation: 0,
            deinit,
            state: state.clone(),
        };
        if let Some(mode) = self.test_mode {
            // Queued ahead of anything the client sends
            let _ = sender.send(Inbox::Event(Event::SetTestMode(mode)));
        }
        let worker = thread::Builder::new()
            .name("sap-worker".into())
            .spawn(move || worker.run())?;

        let reader = match rfcomm::spawn_reader(
            reader_stream,
            sender.clone(),
            deinit_rx,
            deinit_timeout,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %e, "Unable to start client reader");
                let _ = sender.send(Inbox::Terminate);
                return Err(e.into());
            }
        };

        debug!("SAP session threads started");
        Ok(SapServer {
            sender,
            state,
            worker: Some(worker),
            reader: Some(reader),
        })
    }
}

/// Handle to a running SAP session
///
/// A session serves one client. It connects to the modem when the client
/// asks for SIM access and ends when the client stream closes.
#[derive(Debug)]
pub struct SapServer {
    sender: Sender<Inbox>,
    state: SharedState,
    worker: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SapServer {
    /// Start building a session for `client`, reaching the modem through
    /// `connector`
    pub fn builder<C>(client: Box<dyn DuplexStream>, connector: C) -> SapServerBuilder
    where
        C: ModemConnector + 'static,
    {
        SapServerBuilder {
            client,
            connector: Arc::new(connector),
            host: Arc::new(NoopHost),
            scheduler: Arc::new(ThreadScheduler::new()),
            config: ServerConfig::default(),
            test_mode: None,
        }
    }

    /// Current session state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// End the session, disconnecting from the modem first
    pub fn shutdown(&self) -> Result<()> {
        self.post(Event::Shutdown)
    }

    /// Start a disconnect
    pub fn disconnect(&self, action: DisconnectAction) -> Result<()> {
        self.post(Event::Disconnect(action))
    }

    /// Announce SIM-access test mode on the next modem connection
    pub fn set_test_mode(&self, mode: TestMode) -> Result<()> {
        self.post(Event::SetTestMode(mode))
    }

    /// Report a change in voice call state
    pub fn call_state_changed(&self, ongoing: bool) -> Result<()> {
        self.post(Event::CallStateChanged { ongoing })
    }

    /// Wait for the session to end
    pub fn join(mut self) -> Result<()> {
        let threads = [
            ("sap-rfcomm", self.reader.take()),
            ("sap-worker", self.worker.take()),
        ];
        for (name, handle) in threads {
            if let Some(handle) = handle
                && handle.join().is_err()
            {
                return Err(ServerError::ThreadPanicked(name));
            }
        }
        Ok(())
    }

    fn post(&self, event: Event) -> Result<()> {
        self.sender
            .send(Inbox::Event(event))
            .map_err(|_| ServerError::SessionClosed)
    }
}
