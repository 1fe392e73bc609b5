use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::core::realtime::{self, PhoenixMessage};
use crate::core::{Config, ReconnectionConfig, TablesConfig};
use crate::feed::{ChangeChannel, ChangeEvent, ChannelError, EventSink, SubscriptionHandle};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Change channel backed by the backend's realtime websocket.
///
/// Every subscription owns its own socket and Phoenix channel, driven by a
/// background task until unsubscribed.
pub struct RealtimeClient {
    settings: ChannelSettings,
    subscriptions: Mutex<HashMap<SubscriptionHandle, ChannelTask>>,
}

#[derive(Clone)]
struct ChannelSettings {
    socket_url: Url,
    tables: TablesConfig,
    access_token: Option<String>,
    heartbeat: Duration,
    join_timeout: Duration,
    reconnect: ReconnectionConfig,
}

struct ChannelTask {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// One joined channel on an open socket
struct JoinedChannel {
    socket: Socket,
    topic: String,
    next_ref: u64,
}

impl RealtimeClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let socket_url = realtime_socket_url(&config.backend.url, &config.backend.anon_key)
            .map_err(|e| anyhow!("Invalid backend url '{}': {}", config.backend.url, e))?;

        Ok(Self {
            settings: ChannelSettings {
                socket_url,
                tables: config.tables.clone(),
                access_token: config.backend.access_token.clone(),
                heartbeat: Duration::from_secs(config.realtime.heartbeat_secs.max(1)),
                join_timeout: Duration::from_secs(config.realtime.join_timeout_secs.max(1)),
                reconnect: config.realtime.reconnect.clone(),
            },
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    pub fn socket_url(&self) -> &Url {
        &self.settings.socket_url
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock_subscriptions().len()
    }

    fn lock_subscriptions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SubscriptionHandle, ChannelTask>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChangeChannel for RealtimeClient {
    async fn subscribe(
        &self,
        tenant_id: &str,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, ChannelError> {
        let handle = SubscriptionHandle::new();
        let topic = realtime::tenant_topic(tenant_id, &Uuid::new_v4().simple().to_string());

        let channel = join_channel(&self.settings, tenant_id, &topic).await?;
        tracing::info!("Realtime channel {} joined for tenant {}", topic, tenant_id);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(
            self.settings.clone(),
            tenant_id.to_string(),
            channel,
            sink,
            shutdown_rx,
        ));

        self.lock_subscriptions()
            .insert(handle, ChannelTask { shutdown_tx, task });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = self.lock_subscriptions().remove(&handle);
        let Some(channel_task) = removed else {
            tracing::debug!("Unsubscribe for unknown handle {}", handle);
            return;
        };

        // Task already gone if the send fails
        let _ = channel_task.shutdown_tx.send(());
        if timeout(Duration::from_secs(5), channel_task.task).await.is_err() {
            tracing::warn!("Realtime channel {} did not shut down in time", handle);
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for (_, channel_task) in self.lock_subscriptions().drain() {
            channel_task.task.abort();
        }
    }
}

/// `ws(s)://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`
pub fn realtime_socket_url(base: &str, anon_key: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported scheme '{}'", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch scheme to {}", scheme))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let mut url = url.join("realtime/v1/websocket")?;
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

async fn join_channel(
    settings: &ChannelSettings,
    tenant_id: &str,
    topic: &str,
) -> Result<JoinedChannel, ChannelError> {
    let (socket, _) = connect_async(settings.socket_url.as_str())
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    let mut channel = JoinedChannel {
        socket,
        topic: topic.to_string(),
        next_ref: 0,
    };

    let join_ref = channel.next_ref();
    let payload =
        realtime::join_payload(&settings.tables, tenant_id, settings.access_token.as_deref());
    channel
        .send(&PhoenixMessage::join(topic, join_ref.clone(), payload))
        .await?;

    timeout(settings.join_timeout, channel.await_reply(&join_ref))
        .await
        .map_err(|_| ChannelError::Timeout)??;
    Ok(channel)
}

impl JoinedChannel {
    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    async fn send(&mut self, message: &PhoenixMessage) -> Result<(), ChannelError> {
        let json =
            serde_json::to_string(message).map_err(|e| ChannelError::Rejected(e.to_string()))?;
        tracing::trace!("Realtime sending {} on {}", message.event, message.topic);
        self.socket
            .send(Message::Text(json))
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))
    }

    async fn await_reply(&mut self, msg_ref: &str) -> Result<(), ChannelError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Ok(message) = serde_json::from_str::<PhoenixMessage>(&text) else {
                        tracing::warn!("Failed to parse realtime frame: {}", text);
                        continue;
                    };
                    if message.msg_ref.as_deref() != Some(msg_ref) {
                        continue;
                    }
                    return match message.reply_ok() {
                        Some(true) => Ok(()),
                        Some(false) => Err(ChannelError::Rejected(message.reply_reason())),
                        None => continue,
                    };
                }
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
            }
        }
    }

    async fn leave(mut self) {
        let leave_ref = self.next_ref();
        let topic = self.topic.clone();
        let _ = self.send(&PhoenixMessage::leave(&topic, leave_ref)).await;
        let _ = self.socket.close(None).await;
    }
}

enum LoopExit {
    Shutdown,
    SinkClosed,
    Disconnected,
}

async fn run_channel(
    settings: ChannelSettings,
    tenant_id: String,
    mut channel: JoinedChannel,
    sink: EventSink,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        match pump_channel(&settings, &mut channel, &sink, &mut shutdown_rx).await {
            LoopExit::Shutdown => {
                channel.leave().await;
                tracing::debug!("Realtime channel for tenant {} closed", tenant_id);
                return;
            }
            LoopExit::SinkClosed => {
                channel.leave().await;
                tracing::debug!("Realtime consumer for tenant {} went away", tenant_id);
                return;
            }
            LoopExit::Disconnected => {}
        }

        match reconnect(&settings, &tenant_id, &channel.topic, &mut shutdown_rx).await {
            Some(new_channel) => {
                channel = new_channel;
                // Changes during the outage were not delivered
                if sink.send(ChangeEvent::resync()).is_err() {
                    channel.leave().await;
                    return;
                }
            }
            None => return,
        }
    }
}

async fn pump_channel(
    settings: &ChannelSettings,
    channel: &mut JoinedChannel,
    sink: &EventSink,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> LoopExit {
    let mut heartbeat = tokio::time::interval(settings.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    // Ref of the last heartbeat the server has not answered yet
    let mut unanswered: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return LoopExit::Shutdown,

            _ = heartbeat.tick() => {
                if let Some(missed) = unanswered.take() {
                    tracing::warn!(
                        "Realtime heartbeat {} on {} was never answered",
                        missed,
                        channel.topic
                    );
                    return LoopExit::Disconnected;
                }
                let heartbeat_ref = channel.next_ref();
                let message = PhoenixMessage::heartbeat(heartbeat_ref.clone());
                if let Err(e) = channel.send(&message).await {
                    tracing::warn!("Realtime heartbeat failed on {}: {}", channel.topic, e);
                    return LoopExit::Disconnected;
                }
                unanswered = Some(heartbeat_ref);
            }

            frame = channel.socket.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(message) = serde_json::from_str::<PhoenixMessage>(&text) else {
                            tracing::warn!("Failed to parse realtime frame: {}", text);
                            continue;
                        };
                        if unanswered
                            .as_deref()
                            .is_some_and(|pending| message.is_heartbeat_reply(pending))
                        {
                            unanswered = None;
                        } else if let Some((table, kind)) =
                            realtime::decode_postgres_change(&message)
                        {
                            tracing::debug!("Realtime {:?} on {}", kind, table);
                            if sink.send(ChangeEvent::new(table, kind)).is_err() {
                                return LoopExit::SinkClosed;
                            }
                        } else if message.topic == channel.topic && message.is_channel_failure() {
                            tracing::warn!(
                                "Realtime channel {} reported {}",
                                channel.topic,
                                message.event
                            );
                            return LoopExit::Disconnected;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Realtime socket closed for {}", channel.topic);
                        return LoopExit::Disconnected;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Realtime socket error on {}: {}", channel.topic, e);
                        return LoopExit::Disconnected;
                    }
                    _ => {} // Ping/pong handled by tungstenite
                }
            }
        }
    }
}

async fn reconnect(
    settings: &ChannelSettings,
    tenant_id: &str,
    topic: &str,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Option<JoinedChannel> {
    let reconnect = &settings.reconnect;
    for attempt in 0..reconnect.max_attempts {
        let delay = reconnect.delay_with_jitter(attempt);
        tracing::warn!(
            "Realtime disconnected for tenant {}. Reconnecting in {:.1}s (attempt {}/{})",
            tenant_id,
            delay.as_secs_f64(),
            attempt + 1,
            reconnect.max_attempts
        );

        tokio::select! {
            _ = &mut *shutdown_rx => return None,
            _ = sleep(delay) => {}
        }

        match join_channel(settings, tenant_id, topic).await {
            Ok(channel) => {
                tracing::info!(
                    "Realtime reconnected for tenant {} (attempt {})",
                    tenant_id,
                    attempt + 1
                );
                return Some(channel);
            }
            Err(e) => {
                tracing::warn!(
                    "Reconnection attempt {} failed for tenant {}: {}",
                    attempt + 1,
                    tenant_id,
                    e
                );
            }
        }
    }

    tracing::error!(
        "Max reconnection attempts reached, giving up on realtime updates for tenant {}",
        tenant_id
    );
    None
}
