//! SAP session state machine
//!
//! [`Machine::step`] takes one [`Event`] and a [`Context`] snapshot and
//! returns the [`Effect`]s the worker must carry out, in order. It performs
//! no I/O, so every transition can be tested without sockets or threads.

use std::time::Duration;

use nexum_sap_core::{
    ConnectionStatus, DisconnectionType, MessageKind, ProtocolMessage, TestMode,
};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::state::ConnectionState;

/// Ways to end a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DisconnectAction {
    /// Ask the client to finish and disconnect
    Graceful,
    /// Tell the client the session is over, escalate if it does not react
    Immediate,
    /// Disconnect from the modem and close the client stream; while already
    /// disconnecting, stop waiting for the modem
    Forced,
    /// Close the client stream
    CloseClient,
}

/// Facts the machine needs from outside its own state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    /// A voice call currently holds the SIM
    pub call_ongoing: bool,
    /// Modem requests awaiting a response
    pub pending_requests: usize,
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Validated request from the client
    ClientRequest(ProtocolMessage),
    /// Client sent something that could not be decoded
    ClientDecodeFailed,
    /// Client stream ended
    ClientClosed,
    /// Modem link is established
    ModemConnected,
    /// Modem link could not be established
    ModemConnectFailed,
    /// Modem answered a request
    ModemResponse(ProtocolMessage),
    /// Modem sent something on its own
    ModemIndication(ProtocolMessage),
    /// Modem link ended unexpectedly
    ModemClosed,
    /// A request of this kind could not be delivered to the modem
    ModemWriteFailed(MessageKind),
    /// Voice call state changed
    CallStateChanged {
        /// Whether a call now holds the SIM
        ongoing: bool,
    },
    /// Disconnect requested by a timer or the user
    Disconnect(DisconnectAction),
    /// Test mode to announce on the next modem connection
    SetTestMode(TestMode),
    /// Host wants the session to end
    Shutdown,
}

/// Action the worker carries out on behalf of the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write a message to the client
    SendClient(ProtocolMessage),
    /// Write a request to the modem
    SendModem(ProtocolMessage),
    /// Start connecting the modem link
    StartModemLink,
    /// Stop the modem link
    StopModemLink,
    /// Arm the disconnect timer, replacing any armed one
    StartTimer {
        /// Action taken when the timer fires
        action: DisconnectAction,
        /// Delay
        after: Duration,
    },
    /// Disarm the disconnect timer
    CancelTimer,
    /// Offer the user a disconnect action
    ShowNotification(DisconnectAction),
    /// Withdraw the disconnect offer
    ClearNotification,
    /// Session state changed
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },
    /// The session became usable
    ProfileConnected,
    /// Close the client stream
    CloseClient,
    /// The modem side of the session is gone
    DeinitComplete,
    /// Forget every outstanding modem request
    DiscardPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    Starting,
    Up,
}

/// SAP session state machine
#[derive(Debug)]
pub struct Machine {
    state: ConnectionState,
    link: Link,
    max_msg_size: u16,
    test_mode: Option<TestMode>,
    local_disconnect: bool,
    client_closed: bool,
    config: ServerConfig,
}

impl Machine {
    /// Machine in [`ConnectionState::Disconnected`]
    pub const fn new(config: ServerConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            link: Link::Down,
            max_msg_size: 0,
            test_mode: None,
            local_disconnect: false,
            client_closed: false,
            config,
        }
    }

    /// Current state
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Advance the machine by one event
    pub fn step(&mut self, event: Event, ctx: &Context) -> Vec<Effect> {
        trace!(state = %self.state, ?event, "Handling event");
        let mut fx = Vec::new();
        match event {
            Event::ClientRequest(msg) => self.on_client_request(msg, ctx, &mut fx),
            Event::ClientDecodeFailed => {
                fx.push(Effect::SendClient(ProtocolMessage::error_resp()));
            }
            Event::ClientClosed => self.on_client_closed(&mut fx),
            Event::ModemConnected => self.on_modem_connected(&mut fx),
            Event::ModemConnectFailed => self.on_modem_connect_failed(&mut fx),
            Event::ModemResponse(msg) => {
                self.on_modem_reply(msg, &mut fx);
                self.settle_busy(ctx, &mut fx);
            }
            Event::ModemIndication(msg) => {
                self.on_modem_indication(msg, &mut fx);
                self.settle_busy(ctx, &mut fx);
            }
            Event::ModemClosed => self.on_modem_closed(&mut fx),
            Event::ModemWriteFailed(kind) => {
                self.on_modem_write_failed(kind, &mut fx);
                self.settle_busy(ctx, &mut fx);
            }
            Event::CallStateChanged { ongoing } => self.on_call_state(ongoing, &mut fx),
            Event::Disconnect(action) => {
                let idle = match action {
                    DisconnectAction::CloseClient => false,
                    DisconnectAction::Forced => self.state == ConnectionState::Disconnected,
                    _ => matches!(
                        self.state,
                        ConnectionState::Disconnected | ConnectionState::Disconnecting
                    ),
                };
                if idle {
                    debug!(%action, state = %self.state, "Ignoring disconnect, no active session");
                } else {
                    self.disconnect(action, &mut fx);
                }
            }
            Event::SetTestMode(mode) => {
                debug!(%mode, "Test mode will be sent on the next modem connection");
                self.test_mode = Some(mode);
            }
            Event::Shutdown => self.on_shutdown(&mut fx),
        }
        fx
    }

    fn transition(&mut self, to: ConnectionState, fx: &mut Vec<Effect>) {
        if self.state != to {
            debug!(from = %self.state, %to, "SAP state change");
            fx.push(Effect::StateChanged {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    fn start_timer(action: DisconnectAction, after: Duration, fx: &mut Vec<Effect>) {
        fx.push(Effect::StartTimer { action, after });
    }

    fn reject(kind: MessageKind, state: ConnectionState, fx: &mut Vec<Effect>) {
        debug!(%kind, %state, "Rejecting request");
        fx.push(Effect::SendClient(ProtocolMessage::error_resp()));
    }

    fn signal_deinit(&self, fx: &mut Vec<Effect>) {
        // Only the client reader waits for this, and only after it has stopped
        if self.client_closed {
            fx.push(Effect::DeinitComplete);
        }
    }

    fn on_client_request(&mut self, mut msg: ProtocolMessage, ctx: &Context, fx: &mut Vec<Effect>) {
        let kind = msg.kind();
        if self.state == ConnectionState::Disconnecting {
            Self::reject(kind, self.state, fx);
            return;
        }

        match kind {
            MessageKind::ConnectReq => self.on_connect_request(msg, ctx, fx),
            MessageKind::DisconnectReq => self.on_disconnect_request(msg, fx),
            _ => {
                let supersedes = matches!(kind, MessageKind::PowerSimOffReq | MessageKind::ResetSimReq);
                match self.state {
                    ConnectionState::Connected => {}
                    ConnectionState::ConnectedBusy if supersedes => msg.set_clear_pending(true),
                    state => return Self::reject(kind, state, fx),
                }
                if !msg.routes_to_modem() {
                    return Self::reject(kind, self.state, fx);
                }
                self.transition(ConnectionState::ConnectedBusy, fx);
                fx.push(Effect::SendModem(msg));
            }
        }
    }

    fn on_connect_request(&mut self, msg: ProtocolMessage, ctx: &Context, fx: &mut Vec<Effect>) {
        let Some(size) = msg.max_msg_size else {
            return Self::reject(msg.kind(), self.state, fx);
        };

        match self.state {
            ConnectionState::Connecting => {
                self.max_msg_size = size;
                fx.push(Effect::CancelTimer);
                if self.link == Link::Up {
                    fx.push(Effect::SendModem(ProtocolMessage::connect_req(size)));
                }
            }
            ConnectionState::Disconnected | ConnectionState::ConnectingCallOngoing => {
                if size > self.config.max_msg_size {
                    info!(size, max = self.config.max_msg_size, "Client MaxMsgSize too large");
                    fx.push(Effect::SendClient(
                        ProtocolMessage::connect_resp(ConnectionStatus::MaxMsgSizeUnsupported)
                            .with_max_msg_size(self.config.max_msg_size),
                    ));
                    return;
                }
                if size < self.config.min_msg_size {
                    info!(size, min = self.config.min_msg_size, "Client MaxMsgSize too small");
                    fx.push(Effect::SendClient(ProtocolMessage::connect_resp(
                        ConnectionStatus::MaxMsgSizeTooSmall,
                    )));
                    return;
                }

                self.max_msg_size = size;
                if ctx.call_ongoing {
                    info!("Call ongoing, deferring SIM access");
                    self.transition(ConnectionState::ConnectingCallOngoing, fx);
                    fx.push(Effect::SendClient(ProtocolMessage::connect_resp(
                        ConnectionStatus::OkOngoingCall,
                    )));
                    return;
                }

                self.local_disconnect = false;
                self.transition(ConnectionState::Connecting, fx);
                self.connect_modem(fx);
            }
            _ => fx.push(Effect::SendClient(ProtocolMessage::connect_resp(
                ConnectionStatus::ErrorConnection,
            ))),
        }
    }

    fn connect_modem(&mut self, fx: &mut Vec<Effect>) {
        match self.link {
            Link::Up => self.send_connect(fx),
            Link::Starting => {}
            Link::Down => {
                self.link = Link::Starting;
                fx.push(Effect::StartModemLink);
            }
        }
    }

    fn send_connect(&mut self, fx: &mut Vec<Effect>) {
        if let Some(mode) = self.test_mode.take() {
            fx.push(Effect::SendModem(
                ProtocolMessage::new(MessageKind::SimAccessTestReq).with_test_mode(mode),
            ));
        }
        fx.push(Effect::SendModem(ProtocolMessage::connect_req(
            self.max_msg_size,
        )));
    }

    fn on_disconnect_request(&mut self, mut msg: ProtocolMessage, fx: &mut Vec<Effect>) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring DISCONNECT_REQ without a session");
            return;
        }
        // Nothing still in flight may answer after this
        if self.state != ConnectionState::Connected {
            msg.set_clear_pending(true);
        }
        self.transition(ConnectionState::Disconnecting, fx);
        fx.push(Effect::CancelTimer);
        if self.link == Link::Up {
            self.send_disconnect(msg, fx);
        } else {
            self.finish_disconnect(fx);
        }
    }

    /// Forward DISCONNECT_REQ and bound the wait for its answer
    fn send_disconnect(&self, msg: ProtocolMessage, fx: &mut Vec<Effect>) {
        fx.push(Effect::SendModem(msg));
        Self::start_timer(DisconnectAction::Forced, self.config.deinit_timeout, fx);
    }

    /// The modem side is done; answer or drop the client
    fn finish_disconnect(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::CancelTimer);
        if self.link == Link::Starting {
            self.link = Link::Down;
            fx.push(Effect::StopModemLink);
        }
        self.transition(ConnectionState::Disconnected, fx);
        self.signal_deinit(fx);
        if self.client_closed {
            return;
        }
        if self.local_disconnect {
            fx.extend([Effect::ClearNotification, Effect::CloseClient]);
        } else {
            fx.push(Effect::SendClient(ProtocolMessage::new(
                MessageKind::DisconnectResp,
            )));
            Self::start_timer(
                DisconnectAction::CloseClient,
                self.config.client_close_timeout,
                fx,
            );
        }
    }

    fn force_disconnect(&mut self, fx: &mut Vec<Effect>) {
        info!(state = %self.state, "Forcing SAP disconnect");
        self.local_disconnect = true;
        self.transition(ConnectionState::Disconnecting, fx);
        if self.link == Link::Up {
            let mut req = ProtocolMessage::new(MessageKind::DisconnectReq);
            req.set_clear_pending(true);
            self.send_disconnect(req, fx);
        } else {
            self.finish_disconnect(fx);
        }
    }

    fn abandon_disconnect(&mut self, fx: &mut Vec<Effect>) {
        warn!(
            timeout = ?self.config.deinit_timeout,
            "Modem did not confirm disconnect, completing it locally"
        );
        fx.push(Effect::DiscardPending);
        self.finish_disconnect(fx);
    }

    fn disconnect(&mut self, action: DisconnectAction, fx: &mut Vec<Effect>) {
        match action {
            DisconnectAction::Graceful => {
                fx.push(Effect::SendClient(ProtocolMessage::disconnect_ind(
                    DisconnectionType::Graceful,
                )));
                fx.push(Effect::ShowNotification(DisconnectAction::Immediate));
            }
            DisconnectAction::Immediate => {
                fx.push(Effect::SendClient(ProtocolMessage::disconnect_ind(
                    DisconnectionType::Immediate,
                )));
                Self::start_timer(
                    DisconnectAction::Forced,
                    self.config.immediate_disconnect_timeout,
                    fx,
                );
            }
            DisconnectAction::Forced if self.state == ConnectionState::Disconnecting => {
                self.abandon_disconnect(fx);
            }
            DisconnectAction::Forced => self.force_disconnect(fx),
            DisconnectAction::CloseClient => fx.extend([
                Effect::CancelTimer,
                Effect::ClearNotification,
                Effect::CloseClient,
            ]),
        }
    }

    fn enter_connected(&mut self, fx: &mut Vec<Effect>) {
        if !self.state.is_connected() {
            self.transition(ConnectionState::Connected, fx);
            fx.push(Effect::ProfileConnected);
            fx.push(Effect::ShowNotification(DisconnectAction::Graceful));
        }
    }

    fn on_client_closed(&mut self, fx: &mut Vec<Effect>) {
        self.client_closed = true;
        fx.push(Effect::CancelTimer);
        match self.state {
            ConnectionState::Disconnected => self.signal_deinit(fx),
            // The modem's DISCONNECT_RESP completes the teardown
            ConnectionState::Disconnecting => {}
            _ if self.link == Link::Up && !self.local_disconnect => self.force_disconnect(fx),
            _ => self.finish_disconnect(fx),
        }
    }

    fn on_modem_connected(&mut self, fx: &mut Vec<Effect>) {
        info!("Modem link established");
        self.link = Link::Up;
        match self.state {
            ConnectionState::Connecting | ConnectionState::ConnectingCallOngoing => {
                self.send_connect(fx);
            }
            state => debug!(%state, "Modem link up outside of a connect attempt"),
        }
    }

    fn on_modem_connect_failed(&mut self, fx: &mut Vec<Effect>) {
        self.link = Link::Down;
        match self.state {
            ConnectionState::Connecting | ConnectionState::ConnectingCallOngoing => {
                warn!("Modem unavailable, refusing SAP connection");
                self.transition(ConnectionState::Disconnected, fx);
                fx.push(Effect::SendClient(ProtocolMessage::connect_resp(
                    ConnectionStatus::ErrorConnection,
                )));
            }
            ConnectionState::Disconnecting => self.finish_disconnect(fx),
            _ => {}
        }
    }

    fn on_modem_reply(&mut self, msg: ProtocolMessage, fx: &mut Vec<Effect>) {
        match msg.kind() {
            MessageKind::ConnectResp => self.on_connect_response(msg, fx),
            MessageKind::DisconnectResp => {
                if self.state == ConnectionState::Disconnecting {
                    self.finish_disconnect(fx);
                } else {
                    debug!(state = %self.state, "Unexpected DISCONNECT_RESP from modem");
                    self.signal_deinit(fx);
                }
            }
            MessageKind::StatusInd => match self.state {
                ConnectionState::Disconnected
                | ConnectionState::Connecting
                | ConnectionState::Disconnecting => {
                    debug!(state = %self.state, status = ?msg.status_change, "Dropping STATUS_IND");
                }
                _ => fx.push(Effect::SendClient(msg)),
            },
            kind if kind.is_internal() => debug!(%kind, "Not relaying internal modem message"),
            _ => fx.push(Effect::SendClient(msg)),
        }
    }

    fn on_connect_response(&mut self, msg: ProtocolMessage, fx: &mut Vec<Effect>) {
        let status = msg.connection_status;
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::ConnectingCallOngoing
        ) {
            debug!(
                state = %self.state,
                ?status,
                "Dropping CONNECT_RESP outside of a connect attempt"
            );
            return;
        }
        if self.state == ConnectionState::ConnectingCallOngoing {
            // The client already received CONNECT_RESP(OK, ongoing call)
            match status {
                Some(ConnectionStatus::Ok) => self.enter_connected(fx),
                Some(ConnectionStatus::OkOngoingCall) => {}
                _ => Self::start_timer(
                    DisconnectAction::Forced,
                    self.config.client_close_timeout,
                    fx,
                ),
            }
            return;
        }

        match status {
            Some(ConnectionStatus::Ok) => self.enter_connected(fx),
            Some(ConnectionStatus::OkOngoingCall) => {
                self.transition(ConnectionState::ConnectingCallOngoing, fx);
            }
            _ => {
                warn!(?status, "Modem refused SAP connection");
                Self::start_timer(
                    DisconnectAction::Forced,
                    self.config.client_close_timeout,
                    fx,
                );
            }
        }
        fx.push(Effect::SendClient(msg));
    }

    fn on_modem_indication(&mut self, msg: ProtocolMessage, fx: &mut Vec<Effect>) {
        match msg.kind() {
            MessageKind::ModemDisconnectInd => {
                let action = match msg.disconnection_type {
                    Some(DisconnectionType::Graceful) => DisconnectAction::Graceful,
                    _ => DisconnectAction::Immediate,
                };
                match self.state {
                    ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                        debug!(%action, "Ignoring modem disconnect without a session");
                    }
                    _ => self.disconnect(action, fx),
                }
            }
            MessageKind::StatusInd => self.on_modem_reply(msg, fx),
            kind => debug!(%kind, "Ignoring unsolicited modem message"),
        }
    }

    fn on_modem_closed(&mut self, fx: &mut Vec<Effect>) {
        self.link = Link::Down;
        fx.push(Effect::DiscardPending);
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Disconnecting => self.finish_disconnect(fx),
            _ => {
                warn!(state = %self.state, "Modem link lost during session");
                self.local_disconnect = true;
                if !self.client_closed {
                    fx.push(Effect::SendClient(ProtocolMessage::disconnect_ind(
                        DisconnectionType::Immediate,
                    )));
                }
                self.transition(ConnectionState::Disconnected, fx);
                self.signal_deinit(fx);
                if !self.client_closed {
                    Self::start_timer(
                        DisconnectAction::CloseClient,
                        self.config.client_close_timeout,
                        fx,
                    );
                }
            }
        }
    }

    fn on_modem_write_failed(&mut self, kind: MessageKind, fx: &mut Vec<Effect>) {
        match kind {
            MessageKind::DisconnectReq if self.state == ConnectionState::Disconnecting => {
                self.finish_disconnect(fx);
            }
            MessageKind::ConnectReq if self.state == ConnectionState::Connecting => {
                self.transition(ConnectionState::Disconnected, fx);
                fx.push(Effect::SendClient(ProtocolMessage::connect_resp(
                    ConnectionStatus::ErrorConnection,
                )));
            }
            MessageKind::SimAccessTestReq => {}
            _ if self.client_closed => {}
            _ => fx.push(Effect::SendClient(ProtocolMessage::error_resp())),
        }
    }

    fn settle_busy(&mut self, ctx: &Context, fx: &mut Vec<Effect>) {
        if self.state == ConnectionState::ConnectedBusy && ctx.pending_requests == 0 {
            self.transition(ConnectionState::Connected, fx);
        }
    }

    fn on_call_state(&mut self, ongoing: bool, fx: &mut Vec<Effect>) {
        if ongoing || self.state != ConnectionState::ConnectingCallOngoing {
            return;
        }
        info!("Call ended, connecting to the modem");
        self.connect_modem(fx);
    }

    fn on_shutdown(&mut self, fx: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Disconnected => self.disconnect(DisconnectAction::CloseClient, fx),
            ConnectionState::Disconnecting => self.local_disconnect = true,
            _ => self.force_disconnect(fx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexum_sap_core::{ResultCode, StatusChange};

    const IDLE: Context = Context {
        call_ongoing: false,
        pending_requests: 0,
    };

    const ONE_PENDING: Context = Context {
        call_ongoing: false,
        pending_requests: 1,
    };

    fn machine() -> Machine {
        Machine::new(ServerConfig::default())
    }

    fn request(msg: ProtocolMessage) -> Event {
        Event::ClientRequest(msg.validate_request().unwrap())
    }

    fn apdu() -> Event {
        request(
            ProtocolMessage::new(MessageKind::TransferApduReq)
                .with_apdu(vec![0x00, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]),
        )
    }

    fn changed(from: ConnectionState, to: ConnectionState) -> Effect {
        Effect::StateChanged { from, to }
    }

    fn client_kinds(fx: &[Effect]) -> Vec<MessageKind> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::SendClient(msg) => Some(msg.kind()),
                _ => None,
            })
            .collect()
    }

    fn modem_msgs(fx: &[Effect]) -> Vec<&ProtocolMessage> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::SendModem(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    /// Drive a machine to Connected with the modem link up
    fn connected() -> Machine {
        let mut m = machine();
        m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        m.step(Event::ModemConnected, &IDLE);
        m.step(
            Event::ModemResponse(ProtocolMessage::connect_resp(ConnectionStatus::Ok)),
            &IDLE,
        );
        assert_eq!(m.state(), ConnectionState::Connected);
        m
    }

    #[test]
    fn test_connect_happy_path() {
        let mut m = machine();

        let fx = m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        assert_eq!(
            fx,
            vec![
                changed(ConnectionState::Disconnected, ConnectionState::Connecting),
                Effect::StartModemLink,
            ]
        );

        let fx = m.step(Event::ModemConnected, &IDLE);
        assert_eq!(fx, vec![Effect::SendModem(ProtocolMessage::connect_req(512))]);

        let resp = ProtocolMessage::connect_resp(ConnectionStatus::Ok);
        let fx = m.step(Event::ModemResponse(resp.clone()), &IDLE);
        assert_eq!(
            fx,
            vec![
                changed(ConnectionState::Connecting, ConnectionState::Connected),
                Effect::ProfileConnected,
                Effect::ShowNotification(DisconnectAction::Graceful),
                Effect::SendClient(resp),
            ]
        );
    }

    #[test]
    fn test_test_mode_precedes_connect() {
        let mut m = machine();
        m.step(Event::SetTestMode(TestMode::Enabled), &IDLE);
        m.step(request(ProtocolMessage::connect_req(256)), &IDLE);

        let fx = m.step(Event::ModemConnected, &IDLE);
        let sent = modem_msgs(&fx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind(), MessageKind::SimAccessTestReq);
        assert_eq!(sent[0].test_mode, Some(TestMode::Enabled));
        assert_eq!(sent[1].kind(), MessageKind::ConnectReq);
    }

    #[test]
    fn test_connect_refused_starts_forced_timer() {
        let mut m = machine();
        m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        m.step(Event::ModemConnected, &IDLE);

        let resp = ProtocolMessage::connect_resp(ConnectionStatus::ErrorConnection);
        let fx = m.step(Event::ModemResponse(resp.clone()), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::StartTimer {
                    action: DisconnectAction::Forced,
                    after: Duration::from_secs(2),
                },
                Effect::SendClient(resp),
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_rejected_when_connected() {
        let mut m = connected();
        let fx = m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        assert_eq!(
            fx,
            vec![Effect::SendClient(ProtocolMessage::connect_resp(
                ConnectionStatus::ErrorConnection
            ))]
        );
    }

    #[test]
    fn test_connect_size_limits() {
        let mut m = Machine::new(ServerConfig::default().with_msg_size_range(64, 1024));

        let fx = m.step(request(ProtocolMessage::connect_req(4096)), &IDLE);
        assert_eq!(
            fx,
            vec![Effect::SendClient(
                ProtocolMessage::connect_resp(ConnectionStatus::MaxMsgSizeUnsupported)
                    .with_max_msg_size(1024)
            )]
        );

        let fx = m.step(request(ProtocolMessage::connect_req(16)), &IDLE);
        assert_eq!(
            fx,
            vec![Effect::SendClient(ProtocolMessage::connect_resp(
                ConnectionStatus::MaxMsgSizeTooSmall
            ))]
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_apdu_round_trip_settles_busy() {
        let mut m = connected();

        let fx = m.step(apdu(), &IDLE);
        assert_eq!(fx.len(), 2);
        assert_eq!(
            fx[0],
            changed(ConnectionState::Connected, ConnectionState::ConnectedBusy)
        );
        assert_eq!(modem_msgs(&fx)[0].kind(), MessageKind::TransferApduReq);

        let resp = ProtocolMessage::new(MessageKind::TransferApduResp)
            .with_result_code(ResultCode::Ok)
            .with_apdu_response(vec![0x90, 0x00]);
        let fx = m.step(Event::ModemResponse(resp.clone()), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::SendClient(resp),
                changed(ConnectionState::ConnectedBusy, ConnectionState::Connected),
            ]
        );
    }

    #[test]
    fn test_second_request_while_busy_is_rejected() {
        let mut m = connected();
        m.step(apdu(), &IDLE);

        let fx = m.step(apdu(), &ONE_PENDING);
        assert_eq!(client_kinds(&fx), vec![MessageKind::ErrorResp]);
        assert!(modem_msgs(&fx).is_empty());
        assert_eq!(m.state(), ConnectionState::ConnectedBusy);
    }

    #[test]
    fn test_reset_while_busy_clears_pending() {
        let mut m = connected();
        m.step(apdu(), &IDLE);

        let fx = m.step(
            request(ProtocolMessage::new(MessageKind::ResetSimReq)),
            &ONE_PENDING,
        );
        let sent = modem_msgs(&fx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), MessageKind::ResetSimReq);
        assert!(sent[0].clears_pending());
    }

    #[test]
    fn test_requests_need_a_session() {
        let mut m = machine();
        let fx = m.step(apdu(), &IDLE);
        assert_eq!(client_kinds(&fx), vec![MessageKind::ErrorResp]);

        let fx = m.step(Event::ClientDecodeFailed, &IDLE);
        assert_eq!(client_kinds(&fx), vec![MessageKind::ErrorResp]);
    }

    #[test]
    fn test_disconnect_while_busy() {
        let mut m = connected();
        m.step(apdu(), &IDLE);

        let fx = m.step(
            request(ProtocolMessage::new(MessageKind::DisconnectReq)),
            &ONE_PENDING,
        );
        assert_eq!(
            fx[0],
            changed(ConnectionState::ConnectedBusy, ConnectionState::Disconnecting)
        );
        let sent = modem_msgs(&fx);
        assert_eq!(sent[0].kind(), MessageKind::DisconnectReq);
        assert!(sent[0].clears_pending());
        assert_eq!(
            fx.last(),
            Some(&Effect::StartTimer {
                action: DisconnectAction::Forced,
                after: Duration::from_secs(10),
            })
        );

        // Anything but the confirmation is refused now
        let fx = m.step(apdu(), &IDLE);
        assert_eq!(client_kinds(&fx), vec![MessageKind::ErrorResp]);

        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::new(MessageKind::DisconnectResp)),
            &IDLE,
        );
        assert_eq!(
            fx,
            vec![
                Effect::CancelTimer,
                changed(ConnectionState::Disconnecting, ConnectionState::Disconnected),
                Effect::SendClient(ProtocolMessage::new(MessageKind::DisconnectResp)),
                Effect::StartTimer {
                    action: DisconnectAction::CloseClient,
                    after: Duration::from_secs(2),
                },
            ]
        );

        let fx = m.step(Event::ClientClosed, &IDLE);
        assert_eq!(fx, vec![Effect::CancelTimer, Effect::DeinitComplete]);
    }

    #[test]
    fn test_call_ongoing_defers_connection() {
        let mut m = machine();
        let busy_line = Context {
            call_ongoing: true,
            pending_requests: 0,
        };

        let fx = m.step(request(ProtocolMessage::connect_req(512)), &busy_line);
        assert_eq!(
            fx,
            vec![
                changed(
                    ConnectionState::Disconnected,
                    ConnectionState::ConnectingCallOngoing
                ),
                Effect::SendClient(ProtocolMessage::connect_resp(
                    ConnectionStatus::OkOngoingCall
                )),
            ]
        );

        // Call still running
        assert!(m.step(Event::CallStateChanged { ongoing: true }, &busy_line).is_empty());

        let fx = m.step(Event::CallStateChanged { ongoing: false }, &IDLE);
        assert_eq!(fx, vec![Effect::StartModemLink]);

        let fx = m.step(Event::ModemConnected, &IDLE);
        assert_eq!(modem_msgs(&fx)[0], &ProtocolMessage::connect_req(512));

        // The modem's answer is held back from the client
        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::connect_resp(ConnectionStatus::Ok)),
            &IDLE,
        );
        assert!(client_kinds(&fx).is_empty());
        assert_eq!(m.state(), ConnectionState::Connected);
        assert!(fx.contains(&Effect::ProfileConnected));
    }

    #[test]
    fn test_status_ind_filtering() {
        let status = ProtocolMessage::new(MessageKind::StatusInd)
            .with_status_change(StatusChange::CardReset);

        let mut m = machine();
        m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        let fx = m.step(Event::ModemIndication(status.clone()), &IDLE);
        assert!(fx.is_empty());

        let mut m = connected();
        let fx = m.step(Event::ModemIndication(status.clone()), &IDLE);
        assert_eq!(fx, vec![Effect::SendClient(status)]);
    }

    #[test]
    fn test_graceful_then_immediate_then_forced() {
        let mut m = connected();

        let fx = m.step(Event::Disconnect(DisconnectAction::Graceful), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::SendClient(ProtocolMessage::disconnect_ind(DisconnectionType::Graceful)),
                Effect::ShowNotification(DisconnectAction::Immediate),
            ]
        );

        let fx = m.step(Event::Disconnect(DisconnectAction::Immediate), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::SendClient(ProtocolMessage::disconnect_ind(
                    DisconnectionType::Immediate
                )),
                Effect::StartTimer {
                    action: DisconnectAction::Forced,
                    after: Duration::from_secs(5),
                },
            ]
        );

        let fx = m.step(Event::Disconnect(DisconnectAction::Forced), &IDLE);
        assert_eq!(m.state(), ConnectionState::Disconnecting);
        assert!(modem_msgs(&fx)[0].clears_pending());

        // Forced disconnects close the client instead of answering it
        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::new(MessageKind::DisconnectResp)),
            &IDLE,
        );
        assert!(client_kinds(&fx).is_empty());
        assert!(fx.contains(&Effect::CloseClient));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_modem_disconnect_indication() {
        let mut m = connected();
        let ind = ProtocolMessage::new(MessageKind::ModemDisconnectInd)
            .with_disconnection_type(DisconnectionType::Immediate);
        let fx = m.step(Event::ModemIndication(ind), &IDLE);
        assert_eq!(client_kinds(&fx), vec![MessageKind::DisconnectInd]);
        assert!(fx.contains(&Effect::StartTimer {
            action: DisconnectAction::Forced,
            after: Duration::from_secs(5),
        }));
    }

    #[test]
    fn test_modem_loss_while_connected() {
        let mut m = connected();
        let fx = m.step(Event::ModemClosed, &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::DiscardPending,
                Effect::SendClient(ProtocolMessage::disconnect_ind(
                    DisconnectionType::Immediate
                )),
                changed(ConnectionState::Connected, ConnectionState::Disconnected),
                Effect::StartTimer {
                    action: DisconnectAction::CloseClient,
                    after: Duration::from_secs(2),
                },
            ]
        );

        let fx = m.step(Event::Disconnect(DisconnectAction::CloseClient), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::CancelTimer,
                Effect::ClearNotification,
                Effect::CloseClient
            ]
        );
    }

    #[test]
    fn test_client_gone_while_connected_forces_disconnect() {
        let mut m = connected();
        let fx = m.step(Event::ClientClosed, &IDLE);
        assert_eq!(m.state(), ConnectionState::Disconnecting);
        assert_eq!(modem_msgs(&fx)[0].kind(), MessageKind::DisconnectReq);

        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::new(MessageKind::DisconnectResp)),
            &IDLE,
        );
        assert_eq!(
            fx,
            vec![
                Effect::CancelTimer,
                changed(ConnectionState::Disconnecting, ConnectionState::Disconnected),
                Effect::DeinitComplete,
            ]
        );
    }

    #[test]
    fn test_modem_unavailable() {
        let mut m = machine();
        m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        let fx = m.step(Event::ModemConnectFailed, &IDLE);
        assert_eq!(
            fx,
            vec![
                changed(ConnectionState::Connecting, ConnectionState::Disconnected),
                Effect::SendClient(ProtocolMessage::connect_resp(
                    ConnectionStatus::ErrorConnection
                )),
            ]
        );
    }

    #[test]
    fn test_write_failure_answers_client() {
        let mut m = connected();
        m.step(apdu(), &IDLE);
        let fx = m.step(Event::ModemWriteFailed(MessageKind::TransferApduReq), &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::SendClient(ProtocolMessage::error_resp()),
                changed(ConnectionState::ConnectedBusy, ConnectionState::Connected),
            ]
        );
    }

    #[test]
    fn test_shutdown_when_idle_closes_client() {
        let mut m = machine();
        let fx = m.step(Event::Shutdown, &IDLE);
        assert_eq!(
            fx,
            vec![
                Effect::CancelTimer,
                Effect::ClearNotification,
                Effect::CloseClient
            ]
        );
    }

    #[test]
    fn test_disconnect_ignored_without_session() {
        let mut m = machine();
        assert!(
            m.step(Event::Disconnect(DisconnectAction::Immediate), &IDLE)
                .is_empty()
        );
        assert!(
            m.step(request(ProtocolMessage::new(MessageKind::DisconnectReq)), &IDLE)
                .is_empty()
        );
    }

    #[test]
    fn test_late_connect_response_after_disconnect() {
        let mut m = machine();
        m.step(request(ProtocolMessage::connect_req(512)), &IDLE);
        m.step(Event::ModemConnected, &IDLE);

        let fx = m.step(
            request(ProtocolMessage::new(MessageKind::DisconnectReq)),
            &ONE_PENDING,
        );
        assert_eq!(m.state(), ConnectionState::Disconnecting);
        let sent = modem_msgs(&fx);
        assert_eq!(sent[0].kind(), MessageKind::DisconnectReq);
        assert!(sent[0].clears_pending());

        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::connect_resp(ConnectionStatus::Ok)),
            &IDLE,
        );
        assert!(fx.is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnecting);

        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::new(MessageKind::DisconnectResp)),
            &IDLE,
        );
        assert_eq!(client_kinds(&fx), vec![MessageKind::DisconnectResp]);
        assert!(!fx.contains(&Effect::ProfileConnected));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_silent_modem_bounds_shutdown() {
        let mut m = connected();

        let fx = m.step(Event::Shutdown, &IDLE);
        assert_eq!(m.state(), ConnectionState::Disconnecting);
        assert_eq!(
            fx.last(),
            Some(&Effect::StartTimer {
                action: DisconnectAction::Forced,
                after: Duration::from_secs(10),
            })
        );

        // The deinit timer fires without a DISCONNECT_RESP from the modem
        let fx = m.step(Event::Disconnect(DisconnectAction::Forced), &ONE_PENDING);
        assert_eq!(
            fx,
            vec![
                Effect::DiscardPending,
                Effect::CancelTimer,
                changed(ConnectionState::Disconnecting, ConnectionState::Disconnected),
                Effect::ClearNotification,
                Effect::CloseClient,
            ]
        );

        // A confirmation arriving afterwards changes nothing
        let fx = m.step(
            Event::ModemResponse(ProtocolMessage::new(MessageKind::DisconnectResp)),
            &IDLE,
        );
        assert!(fx.is_empty());
    }

    #[test]
    fn test_client_disconnect_times_out() {
        let mut m = connected();
        m.step(
            request(ProtocolMessage::new(MessageKind::DisconnectReq)),
            &IDLE,
        );

        let fx = m.step(Event::Disconnect(DisconnectAction::Forced), &IDLE);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert_eq!(client_kinds(&fx), vec![MessageKind::DisconnectResp]);
        assert!(fx.contains(&Effect::StartTimer {
            action: DisconnectAction::CloseClient,
            after: Duration::from_secs(2),
        }));
    }

    #[test]
    fn test_power_off_while_busy_clears_pending() {
        let mut m = connected();
        m.step(apdu(), &IDLE);

        let fx = m.step(
            request(ProtocolMessage::new(MessageKind::PowerSimOffReq)),
            &ONE_PENDING,
        );
        let sent = modem_msgs(&fx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), MessageKind::PowerSimOffReq);
        assert!(sent[0].clears_pending());
        assert_eq!(m.state(), ConnectionState::ConnectedBusy);

        // Other requests still wait their turn
        let fx = m.step(
            request(ProtocolMessage::new(MessageKind::TransferAtrReq)),
            &ONE_PENDING,
        );
        assert_eq!(client_kinds(&fx), vec![MessageKind::ErrorResp]);
    }
}
