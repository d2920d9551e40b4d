//! Observer sessions and inbound command routing.
//!
//! The gateway sits between the push channel and the [`Scheduler`]: inbound frames
//! are parsed into [`InboundCommand`]s and routed, and every connected observer gets
//! the scheduler's events through its own broadcast subscription.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::events::{InboundCommand, LogOrigin, OutboundEvent};
use crate::metrics::OBSERVERS_CONNECTED;
use crate::scheduler::{CommandResult, Scheduler};
use crate::task::TaskMode;

#[derive(Clone)]
pub struct Gateway {
    scheduler: Scheduler,
}

/// A registered observer: the status it should render right away plus its feed.
pub struct Observer {
    pub initial_status: OutboundEvent,
    pub events: broadcast::Receiver<OutboundEvent>,
    _guard: ObserverGuard,
}

struct ObserverGuard;

impl ObserverGuard {
    fn new() -> Self {
        OBSERVERS_CONNECTED.inc();
        Self
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        OBSERVERS_CONNECTED.dec();
    }
}

impl Gateway {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registers an observer. Subscribes before reading the status so no
    /// transition can fall between the snapshot and the feed.
    pub fn connect(&self) -> Observer {
        let events = self.scheduler.broadcaster().subscribe();
        let initial_status = OutboundEvent::status(self.scheduler.is_running());
        Observer {
            initial_status,
            events,
            _guard: ObserverGuard::new(),
        }
    }

    /// Routes one validated command. Start and stop return the scheduler's reply.
    pub fn handle_command(&self, command: InboundCommand) -> Option<CommandResult> {
        match command {
            InboundCommand::StartTraffic(request) => Some(self.scheduler.start(&request)),
            InboundCommand::StopTraffic => Some(self.scheduler.stop()),
            InboundCommand::ClientLog { text } => {
                self.scheduler
                    .broadcaster()
                    .log(LogOrigin::RemoteObserver, text);
                None
            }
        }
    }

    /// Parses and routes one text frame. Malformed frames are dropped here.
    pub fn handle_frame(&self, frame: &str) {
        match InboundCommand::parse(frame) {
            Ok(command) => {
                debug!(command = ?command, "Inbound command");
                if let Some(result) = self.handle_command(command) {
                    debug!(success = result.success, message = %result.message, "Command handled");
                }
            }
            Err(e) => warn!(error = %e, "Dropping inbound frame"),
        }
    }

    /// Events that bring an observer that skipped part of its feed back in line:
    /// the current status, plus a stop for replica loops unless a delegated task
    /// is running (its next tick re-sends the instruction anyway).
    pub fn resync_events(&self) -> Vec<OutboundEvent> {
        let snapshot = self.scheduler.snapshot();
        let mut events = vec![OutboundEvent::status(snapshot.is_running)];
        if snapshot.mode != Some(TaskMode::BROWSER) {
            events.push(OutboundEvent::StopDelegatedLoop {});
        }
        events
    }

    /// Runs one WebSocket observer session until either side closes.
    pub async fn serve_observer<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Observer {
            initial_status,
            mut events,
            _guard,
        } = self.connect();
        let (mut write, mut read) = ws.split();
        info!(observers = OBSERVERS_CONNECTED.get(), "Observer connected");

        if let Err(e) = write.send(Message::Text(initial_status.to_json())).await {
            warn!(error = %e, "Failed to send initial status");
            return;
        }

        'session: loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(error = %e, "Observer read error");
                            break;
                        }
                        _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = write.send(Message::Text(event.to_json())).await {
                                debug!(error = %e, "Observer write error");
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Observer fell behind; resyncing status");
                            for event in self.resync_events() {
                                if let Err(e) = write.send(Message::Text(event.to_json())).await {
                                    debug!(error = %e, "Observer write error");
                                    break 'session;
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }

        drop(_guard);
        info!(observers = OBSERVERS_CONNECTED.get(), "Observer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::fetch::{ActionResult, Fetcher};
    use crate::task::TaskRequest;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;

    struct NeverCalled;

    #[async_trait]
    impl Fetcher for NeverCalled {
        async fn perform(&self, _url: &str) -> ActionResult {
            panic!("gateway tests never start server tasks");
        }
    }

    fn gateway() -> Gateway {
        Gateway::new(Scheduler::new(Broadcaster::new(16), Arc::new(NeverCalled)))
    }

    #[test]
    fn connect_reports_idle_status() {
        let gateway = gateway();
        let observer = gateway.connect();
        assert_eq!(observer.initial_status, OutboundEvent::status(false));
    }

    #[test]
    fn client_log_reaches_every_observer() {
        let gateway = gateway();
        let mut a = gateway.connect();
        let mut b = gateway.connect();

        gateway.handle_frame(r#"{"event":"client-log","data":"hello"}"#);

        for observer in [&mut a, &mut b] {
            match observer.events.try_recv() {
                Ok(OutboundEvent::Log(line)) => {
                    assert_eq!(line.origin, LogOrigin::RemoteObserver);
                    assert_eq!(line.text, "hello");
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(observer.events.try_recv().is_err());
        }
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let gateway = gateway();
        let mut observer = gateway.connect();
        gateway.handle_frame("{nope");
        gateway.handle_frame(r#"{"event":"explode"}"#);
        assert!(observer.events.try_recv().is_err());
    }

    #[test]
    fn stop_while_idle_is_silent() {
        let gateway = gateway();
        let mut observer = gateway.connect();
        let result = gateway.handle_command(InboundCommand::StopTraffic).unwrap();
        assert!(result.success);
        assert!(observer.events.try_recv().is_err());
    }

    async fn next_frame<S>(ws: &mut WebSocketStream<S>) -> Value
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lagging_observer_is_resynced_with_current_status() {
        let broadcaster = Broadcaster::new(4);
        let gateway = Gateway::new(Scheduler::new(broadcaster.clone(), Arc::new(NeverCalled)));

        let (client_io, server_io) = tokio::io::duplex(64);
        let session = gateway.clone();
        tokio::spawn(async move {
            let ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
            session.serve_observer(ws).await;
        });
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        assert_eq!(next_frame(&mut client).await["event"], "statusUpdate");

        // The session cannot run until the test yields, so all of this overflows
        // its four-slot feed.
        gateway
            .scheduler()
            .start(&TaskRequest::server("http://target", 1000, 1000));
        gateway.scheduler().stop();
        for i in 0..10 {
            broadcaster.log(LogOrigin::RemoteObserver, format!("noise {}", i));
        }

        let (mut last_status, mut saw_stop) = (None, false);
        for _ in 0..8 {
            let frame = next_frame(&mut client).await;
            match frame["event"].as_str() {
                Some("statusUpdate") => last_status = frame["data"]["isRunning"].as_bool(),
                Some("stop-delegated-loop") => saw_stop = true,
                _ => {}
            }
            if last_status.is_some() && saw_stop {
                break;
            }
        }

        assert_eq!(last_status, Some(false));
        assert!(saw_stop, "idle resync must stop replica loops");
    }

    #[tokio::test]
    async fn resync_keeps_a_running_delegated_task_alive() {
        let gateway = gateway();
        assert_eq!(
            gateway.resync_events(),
            vec![OutboundEvent::status(false), OutboundEvent::StopDelegatedLoop {}]
        );

        gateway
            .scheduler()
            .start(&TaskRequest::browser("http://target", 1000, 1000, 2, 500));
        assert_eq!(gateway.resync_events(), vec![OutboundEvent::status(true)]);

        gateway
            .scheduler()
            .start(&TaskRequest::server("http://target", 1000, 1000));
        assert_eq!(
            gateway.resync_events(),
            vec![OutboundEvent::status(true), OutboundEvent::StopDelegatedLoop {}]
        );
        gateway.scheduler().stop();
    }
}
