//! The client event loop.
//!
//! One task owns every component and drives them from a single
//! `tokio::select!`: the connection, reconnect timer, age expiries, the
//! subscription deferral timer, the catalog fetch and the control channel.
//! Each event is handled to completion before the next is polled.

use std::collections::BTreeMap;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::catalog;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::geometry::{GeometryKind, Topic, Transform};
use crate::history::HistoryStore;
use crate::normalize::{self, Inbound};
use crate::render::RenderSink;
use crate::style::StyleResolver;
use crate::subscription::persist::TopicPersistence;
use crate::subscription::{topics_from_url, Change, SubscriptionManager};
use crate::transport::session::{AfterFailure, Session};
use crate::transport::websocket::{self, Incoming, WsStream};
use crate::transport::{Command, ConnectionState};

/// Requests from a [`ClientHandle`] to the running loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    SetTopics(Vec<String>),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    SetTransform(Transform),
    /// Catalog learned out of band.
    Catalog(Vec<String>),
    Send(Command),
    Close,
}

/// Cloneable control surface of a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    pub fn set_topics<I, T>(&self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.send(Control::SetTopics(topics.into_iter().map(Into::into).collect()));
    }

    pub fn subscribe<I, T>(&self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.send(Control::Subscribe(topics.into_iter().map(Into::into).collect()));
    }

    pub fn unsubscribe<I, T>(&self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.send(Control::Unsubscribe(topics.into_iter().map(Into::into).collect()));
    }

    pub fn set_transform(&self, transform: Transform) {
        self.send(Control::SetTransform(transform));
    }

    pub fn advertise_catalog(&self, topics: Vec<String>) {
        self.send(Control::Catalog(topics));
    }

    /// Raw command, queued while disconnected like any other.
    pub fn send_command(&self, cmd: Command) {
        self.send(Control::Send(cmd));
    }

    pub fn close(&self) {
        self.send(Control::Close);
    }

    /// Connection state observer.  Sees `Failed` at most once.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    fn send(&self, ctl: Control) {
        if self.tx.send(ctl).is_err() {
            debug!("client: control channel closed, request dropped");
        }
    }
}

/// Per-topic traffic counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicStats {
    pub messages: u64,
    pub last_kind: Option<GeometryKind>,
    pub last_seen: Option<DateTime<Utc>>,
}

type Slot<F> = Option<Pin<Box<F>>>;

pub struct Client<S: RenderSink, P: TopicPersistence> {
    cfg: Arc<ClientConfig>,
    url: Url,
    session: Session,
    subscriptions: SubscriptionManager<P>,
    store: HistoryStore<S>,
    styles: StyleResolver,
    stats: BTreeMap<Topic, TopicStats>,
    status: watch::Sender<ConnectionState>,
    control: mpsc::UnboundedReceiver<Control>,
    control_open: bool,
    ws: Option<WsStream>,
    outbox: Vec<Message>,
    connecting: Option<BoxFuture<'static, Result<WsStream>>>,
    catalog_fetch: Option<BoxFuture<'static, Result<Vec<String>>>>,
    reconnect: Slot<Sleep>,
    deferral: Slot<Sleep>,
}

impl<S: RenderSink, P: TopicPersistence> Client<S, P> {
    pub fn new(cfg: Arc<ClientConfig>, sink: S, persistence: P) -> Result<(Self, ClientHandle)> {
        let url = Url::parse(&cfg.ws_url)?;
        let (subscriptions, source) =
            SubscriptionManager::new(persistence, cfg.topics.clone(), topics_from_url(&url));
        debug!("client: initial topics {:?} ({source:?})", subscriptions.topics());

        let (tx, control) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ConnectionState::Disconnected);
        let client = Client {
            url,
            session: Session::new(cfg.backoff),
            subscriptions,
            store: HistoryStore::new(sink, cfg.retention.clone()),
            styles: StyleResolver::new(cfg.styles.clone()),
            stats: BTreeMap::new(),
            status,
            control,
            control_open: true,
            ws: None,
            outbox: Vec::new(),
            connecting: None,
            catalog_fetch: None,
            reconnect: None,
            deferral: None,
            cfg,
        };
        Ok((client, ClientHandle { tx, status: status_rx }))
    }

    pub fn store(&self) -> &HistoryStore<S> {
        &self.store
    }

    pub fn topic_stats(&self) -> &BTreeMap<Topic, TopicStats> {
        &self.stats
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscriptions.topics()
    }

    /// Run until closed.  Fails only when reconnect attempts run out.
    pub async fn run(mut self) -> Result<()> {
        if let Some(url) = self.cfg.catalog_url.clone() {
            self.catalog_fetch = Some(catalog::fetch(url).boxed());
        }
        self.start_connect();

        loop {
            tokio::select! {
                res = poll_slot(&mut self.connecting) => {
                    self.connecting = None;
                    match res {
                        Ok(ws) => self.on_open(ws),
                        Err(e) => {
                            warn!("client: connect failed: {e}");
                            self.on_failure()?;
                        }
                    }
                }
                msg = next_message(&mut self.ws) => self.on_message(msg)?,
                () = poll_slot(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.start_connect();
                }
                () = poll_slot(&mut self.deferral) => {
                    self.deferral = None;
                    self.release_deferred();
                }
                expired = self.store.next_expired() => {
                    self.store.evict_expired(expired);
                }
                res = poll_slot(&mut self.catalog_fetch) => {
                    self.catalog_fetch = None;
                    match res {
                        Ok(topics) => self.on_catalog(topics),
                        Err(e) => warn!("client: catalog fetch failed: {e}"),
                    }
                }
                ctl = self.control.recv(), if self.control_open => match ctl {
                    Some(ctl) => {
                        if !self.on_control(ctl) {
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                    None => {
                        debug!("client: all handles dropped");
                        self.control_open = false;
                    }
                },
            }
            self.flush().await?;
        }
    }

    // ── Connection ────────────────────────────────────────────────────────────

    fn start_connect(&mut self) {
        if !self.session.begin_connect() {
            return;
        }
        self.publish_status();
        let fut = websocket::connect(self.url.to_string(), self.cfg.connect_timeout);
        self.connecting = Some(fut.boxed());
    }

    fn on_open(&mut self, ws: WsStream) {
        self.ws = Some(ws);
        let desired = self.subscriptions.topics();
        for cmd in self.session.on_open(&desired) {
            self.enqueue(&cmd);
        }
        self.publish_status();
    }

    /// Connection attempt failed or an open connection was lost.
    fn on_failure(&mut self) -> Result<()> {
        self.ws = None;
        self.connecting = None;
        self.outbox.clear();
        let desired = self.subscriptions.topics();
        let outcome = self.session.on_failure(&desired);
        self.publish_status();
        match outcome {
            AfterFailure::Retry(delay) => {
                self.reconnect = Some(Box::pin(sleep(delay)));
                Ok(())
            }
            AfterFailure::Exhausted { attempts } => {
                error!("client: stream source unreachable after {attempts} attempts");
                Err(ClientError::ReconnectExhausted { attempts })
            }
            AfterFailure::Ignored => Ok(()),
        }
    }

    fn on_message(&mut self, msg: Option<std::result::Result<Message, tungstenite::Error>>) -> Result<()> {
        match msg {
            None => {
                info!("client: stream ended");
                self.on_failure()
            }
            Some(Err(e)) => {
                warn!("client: WebSocket error: {e}");
                self.on_failure()
            }
            Some(Ok(msg)) => match websocket::classify(msg) {
                Incoming::Text(text) => {
                    self.handle_text(&text);
                    Ok(())
                }
                Incoming::Ping(p) => {
                    self.outbox.push(Message::Pong(p));
                    Ok(())
                }
                Incoming::Closed => {
                    info!("client: server closed the connection");
                    self.on_failure()
                }
                Incoming::Ignored => Ok(()),
            },
        }
    }

    /// Write everything produced by the last event.
    async fn flush(&mut self) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.outbox);
        let Some(ws) = self.ws.as_mut() else {
            debug!("client: not connected, dropping {} outbound message(s)", pending.len());
            return Ok(());
        };
        let mut failed = None;
        for msg in pending {
            trace!("client: -> {msg:?}");
            if let Err(e) = ws.send(msg).await {
                failed = Some(e);
                break;
            }
        }
        match failed {
            Some(e) => {
                warn!("client: send failed: {e}");
                self.on_failure()
            }
            None => Ok(()),
        }
    }

    fn enqueue(&mut self, cmd: &Command) {
        match websocket::encode(cmd) {
            Ok(msg) => self.outbox.push(msg),
            Err(e) => warn!("client: cannot encode {cmd:?}: {e}"),
        }
    }

    /// Transmit now when open, else queue in the session.
    fn dispatch(&mut self, cmd: Command) {
        if let Some(cmd) = self.session.send(cmd) {
            self.enqueue(&cmd);
        }
    }

    fn publish_status(&self) {
        let state = self.session.state();
        self.status.send_if_modified(|s| {
            if *s == state {
                return false;
            }
            *s = state;
            true
        });
    }

    // ── Inbound frames ────────────────────────────────────────────────────────

    fn handle_text(&mut self, text: &str) {
        let frame = match normalize::parse_frame(text, Utc::now(), &self.styles) {
            Ok(Inbound::Geometry(frame)) => frame,
            Ok(Inbound::Catalog(topics)) => return self.on_catalog(topics),
            Err(e) => {
                warn!("client: dropping frame: {e}");
                return;
            }
        };
        let topic = &frame.record.topic;
        if frame.tagged && !self.subscriptions.contains(topic) {
            debug!("client: dropping frame for unsubscribed topic {topic}");
            return;
        }

        let stats = self.stats.entry(topic.clone()).or_default();
        stats.messages += 1;
        stats.last_kind = Some(frame.record.kind());
        stats.last_seen = Some(frame.record.received_at);

        let id = self.store.record(frame.record, &frame.overrides);
        trace!("client: stored {id}");
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    /// Returns false when the loop should shut down.
    fn on_control(&mut self, ctl: Control) -> bool {
        match ctl {
            Control::SetTopics(t)  => { let c = self.subscriptions.set_topics(t); self.apply_change(c); }
            Control::Subscribe(t)  => { let c = self.subscriptions.subscribe(t); self.apply_change(c); }
            Control::Unsubscribe(t) => { let c = self.subscriptions.unsubscribe(t); self.apply_change(c); }
            Control::SetTransform(t) => self.store.rebuild_all(t),
            Control::Catalog(t)    => self.on_catalog(t),
            Control::Send(cmd)     => self.dispatch(cmd),
            Control::Close         => return false,
        }
        true
    }

    fn on_catalog(&mut self, topics: Vec<String>) {
        let change = self.subscriptions.on_catalog(topics);
        self.apply_change(change);
    }

    fn release_deferred(&mut self) {
        if let Some(cmd) = self.subscriptions.release_deferred() {
            self.dispatch(cmd);
        }
    }

    fn apply_change(&mut self, change: Change) {
        for topic in &change.purged {
            let n = self.store.purge_topic(topic);
            debug!("client: unsubscribed {topic}, {n} record(s) removed");
        }
        if let Some(cmd) = change.command {
            self.dispatch(cmd);
        }
        if !self.subscriptions.is_deferred() {
            self.deferral = None;
        } else if self.deferral.is_none() {
            self.deferral = Some(Box::pin(sleep(self.cfg.subscribe_delay)));
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    async fn shutdown(&mut self) {
        info!("client: closing");
        self.session.begin_close();
        self.publish_status();
        self.connecting = None;
        self.catalog_fetch = None;
        self.reconnect = None;
        self.deferral = None;
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                debug!("client: close handshake: {e}");
            }
        }
        self.store.clear();
        self.session.closed();
        self.publish_status();

        for (topic, s) in &self.stats {
            let kind = s.last_kind.map_or("-", GeometryKind::as_str);
            let seen = s.last_seen.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
            info!("client: topic {topic}: {} message(s), last {kind} at {seen}", s.messages);
        }
    }
}

async fn poll_slot<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(f) => f.await,
        None => pending().await,
    }
}

async fn next_message(ws: &mut Option<WsStream>) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match ws {
        Some(ws) => ws.next().await,
        None => pending().await,
    }
}
