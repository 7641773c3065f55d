//! Plugin Supervisor
//!
//! Spawns plugin actors, routes events between them by subscription and
//! reaps them on shutdown.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use boxhead_runtime::{
    ActorExit, ActorHandle, ActorQueues, ActorState, ActorStatsSnapshot, ConfigSnapshot, Event,
    MAX_QUEUE_CAPACITY, Plugin, PluginActor, PluginError, TERMINATE_EVENT, bounded_queue,
};

/// How often a stopping actor is checked for having finished
const REAP_POLL: Duration = Duration::from_millis(10);

/// Errors raised by the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Plugin already running: {0}")]
    AlreadyRunning(String),

    #[error("Plugin not running: {0}")]
    NotRunning(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Queue of plugin {0} is full")]
    QueueFull(String),

    #[error("Queue of plugin {0} is closed")]
    QueueClosed(String),

    #[error("Plugin {0} did not stop in time")]
    ShutdownTimeout(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Tunables taken from the `[runtime]` config section
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(config: &dyn ConfigSnapshot) -> Self {
        let defaults = Self::default();

        let requested =
            config.get_int(&["runtime", "queue_capacity"], defaults.queue_capacity as i64);
        let queue_capacity = requested.clamp(1, MAX_QUEUE_CAPACITY as i64);
        if queue_capacity != requested {
            tracing::warn!(
                requested,
                used = queue_capacity,
                "runtime.queue_capacity out of range, clamped"
            );
        }

        Self {
            queue_capacity: queue_capacity as usize,
            shutdown_timeout: config
                .get_duration_ms(&["runtime", "shutdown_timeout_ms"], defaults.shutdown_timeout),
        }
    }
}

/// Status of one plugin, as reported by [`Supervisor::status`]
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub state: ActorState,
    pub subscriptions: Vec<String>,
    pub stats: ActorStatsSnapshot,
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of every plugin actor
pub struct Supervisor {
    /// Actor handles by plugin name
    actors: DashMap<String, ActorHandle>,

    /// Inbound queue senders by plugin name
    queues: DashMap<String, mpsc::Sender<Event>>,

    /// Subscriber names by event name, in registration order
    subscribers: RwLock<HashMap<String, Vec<String>>>,

    /// Shared plugins-to-supervisor queue
    outbound_tx: mpsc::Sender<Event>,
    outbound_rx: Mutex<mpsc::Receiver<Event>>,

    options: SupervisorOptions,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let (outbound_tx, outbound_rx) = bounded_queue(options.queue_capacity);

        Self {
            actors: DashMap::new(),
            queues: DashMap::new(),
            subscribers: RwLock::new(HashMap::new()),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            options,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Construct a plugin actor and start it on its own thread
    ///
    /// The plugin is subscribed to every event it bound in `on_init`.
    pub fn spawn<P: Plugin>(
        &self,
        name: &str,
        plugin: P,
        config: &dyn ConfigSnapshot,
    ) -> Result<(), SupervisorError> {
        let (inbound_tx, inbound_rx) = bounded_queue(self.options.queue_capacity);

        // The queue entry reserves the name until the actor is stored.
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(SupervisorError::AlreadyRunning(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(inbound_tx);
            }
        }
        if self.actors.contains_key(name) {
            self.queues.remove(name);
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        let started = PluginActor::new(
            name,
            plugin,
            config,
            ActorQueues {
                inbound: inbound_rx,
                outbound: self.outbound_tx.clone(),
            },
        )
        .and_then(|actor| {
            let subscriptions = actor.subscriptions();
            actor.spawn().map(|handle| (handle, subscriptions))
        });
        let (handle, subscriptions) = match started {
            Ok(started) => started,
            Err(e) => {
                self.queues.remove(name);
                return Err(e.into());
            }
        };

        self.actors.insert(name.to_string(), handle);
        for event in &subscriptions {
            self.register(event, name, false);
        }

        tracing::info!(plugin = %name, events = ?subscriptions, "Plugin started");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe `who` to `event`
    ///
    /// An exclusive registration replaces every earlier subscriber.
    pub fn register(&self, event: &str, who: &str, exclusive: bool) {
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(event.to_string()).or_default();

        if exclusive {
            list.clear();
        }
        if !list.iter().any(|s| s == who) {
            list.push(who.to_string());
        }
        tracing::debug!(plugin = %who, %event, exclusive, "Registered subscriber");
    }

    pub fn unregister(&self, event: &str, who: &str) {
        let mut subscribers = self.subscribers.write();
        if let Some(list) = subscribers.get_mut(event) {
            list.retain(|s| s != who);
            if list.is_empty() {
                subscribers.remove(event);
            }
        }
    }

    pub fn unregister_from_all(&self, who: &str) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|_, list| {
            list.retain(|s| s != who);
            !list.is_empty()
        });
        tracing::debug!(plugin = %who, "Unregistered from all events");
    }

    pub fn subscribers(&self, event: &str) -> Vec<String> {
        self.subscribers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────────

    /// Hand an event to every subscriber without blocking
    ///
    /// Returns how many subscribers accepted it.
    pub fn emit(&self, event: &Event) -> usize {
        let subscribers = self.subscribers(event.name());
        if subscribers.is_empty() {
            tracing::debug!(event = %event.name(), "Nobody listens for event");
            return 0;
        }

        let mut delivered = 0;
        for who in subscribers {
            match self.deliver(&who, event.clone()) {
                Ok(()) => delivered += 1,
                Err(SupervisorError::UnknownPlugin(_)) => {
                    tracing::warn!(plugin = %who, "Subscriber has no queue, unsubscribing");
                    self.unregister_from_all(&who);
                }
                Err(SupervisorError::QueueClosed(_)) => {
                    tracing::error!(plugin = %who, "Subscriber queue is closed, removing it");
                    self.queues.remove(&who);
                    self.unregister_from_all(&who);
                }
                Err(e) => {
                    tracing::error!(plugin = %who, event = %event.name(), error = %e, "Event dropped");
                }
            }
        }
        delivered
    }

    /// Deliver an event to one plugin
    pub fn send_to(&self, name: &str, event: Event) -> Result<(), SupervisorError> {
        self.deliver(name, event)
    }

    fn deliver(&self, name: &str, event: Event) -> Result<(), SupervisorError> {
        let queue = self
            .queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| SupervisorError::UnknownPlugin(name.to_string()))?;

        queue.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SupervisorError::QueueFull(name.to_string()),
            mpsc::error::TrySendError::Closed(_) => SupervisorError::QueueClosed(name.to_string()),
        })
    }

    /// Wait up to `timeout` for the next event any plugin emitted
    ///
    /// The event is forwarded to its subscribers before it is returned.
    pub async fn next_event(&self, timeout: Duration) -> Option<Event> {
        let event = {
            let mut rx = self.outbound_rx.lock().await;
            tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()?
        };

        tracing::debug!(event = %event, "Event from plugin");
        self.emit(&event);
        Some(event)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop one plugin and wait for it to exit
    pub async fn stop(&self, name: &str) -> Result<ActorExit, SupervisorError> {
        let handle = self.detach(name)?;
        let deadline = Instant::now() + self.options.shutdown_timeout;
        reap(handle, deadline).await
    }

    /// Stop every plugin
    ///
    /// All plugins are asked to stop first, then reaped under one deadline.
    pub async fn shutdown_all(&self) -> Vec<(String, Result<ActorExit, SupervisorError>)> {
        let mut names: Vec<String> = self.actors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        tracing::info!(count = names.len(), "Shutting down plugins");

        let handles: Vec<ActorHandle> = names
            .iter()
            .filter_map(|name| self.detach(name).ok())
            .collect();

        let deadline = Instant::now() + self.options.shutdown_timeout;
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let name = handle.identity().to_string();
            results.push((name, reap(handle, deadline).await));
        }
        results
    }

    /// Remove a plugin from routing and ask it to terminate
    fn detach(&self, name: &str) -> Result<ActorHandle, SupervisorError> {
        let (_, handle) = self
            .actors
            .remove(name)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;

        self.unregister_from_all(name);
        if let Some((_, queue)) = self.queues.remove(name) {
            if let Ok(event) = Event::named(TERMINATE_EVENT) {
                // a full or closed queue is covered by the flag below
                let _ = queue.try_send(event);
            }
        }
        handle.request_termination();
        Ok(handle)
    }

    /// Name and state of every plugin, sorted by name
    pub fn list(&self) -> Vec<(String, ActorState)> {
        let mut list: Vec<_> = self
            .actors
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Full status of every plugin, sorted by name
    pub fn status(&self) -> Vec<PluginStatus> {
        let subscribers = self.subscribers.read();
        let mut status: Vec<_> = self
            .actors
            .iter()
            .map(|e| {
                let name = e.key().clone();
                let mut subscriptions: Vec<String> = subscribers
                    .iter()
                    .filter(|(_, who)| who.contains(&name))
                    .map(|(event, _)| event.clone())
                    .collect();
                subscriptions.sort();
                PluginStatus {
                    state: e.value().state(),
                    stats: e.value().stats(),
                    subscriptions,
                    name,
                }
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    pub fn stats(&self, name: &str) -> Option<ActorStatsSnapshot> {
        self.actors.get(name).map(|h| h.stats())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.actors
            .get(name)
            .map(|h| h.is_running())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

/// Wait for the actor's thread to finish, then close it
///
/// An actor still running at the deadline is dropped, which detaches its
/// thread.
async fn reap(handle: ActorHandle, deadline: Instant) -> Result<ActorExit, SupervisorError> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.identity().to_string();
            tracing::error!(plugin = %name, "Plugin did not stop in time, detaching its thread");
            return Err(SupervisorError::ShutdownTimeout(name));
        }
        tokio::time::sleep(REAP_POLL).await;
    }

    let exit = handle.close()?;
    tracing::info!(plugin = %exit.identity, state = %exit.state, "Plugin stopped");
    Ok(exit)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use boxhead_runtime::{EmptyConfig, Init, PluginContext, PluginResult};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        seen: Arc<AtomicUsize>,
    }

    impl Plugin for Echo {
        fn on_init(&mut self, init: &mut Init<'_, Self>, _: &dyn ConfigSnapshot) -> PluginResult<()> {
            init.set_tick_interval(Duration::from_millis(10));
            init.register_for("ping", |echo: &mut Echo, ctx: &mut PluginContext, event: &Event| {
                echo.seen.fetch_add(1, Ordering::SeqCst);
                ctx.emit("pong", event.values().to_vec(), event.params().clone());
                Ok(())
            });
            Ok(())
        }
    }

    struct Sleepy;

    impl Plugin for Sleepy {
        fn on_init(&mut self, init: &mut Init<'_, Self>, _: &dyn ConfigSnapshot) -> PluginResult<()> {
            init.set_tick_interval(Duration::from_millis(10));
            init.register_for("hang", |_: &mut Sleepy, _: &mut PluginContext, _: &Event| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            });
            Ok(())
        }
    }

    struct SlowInit;

    impl Plugin for SlowInit {
        fn on_init(&mut self, init: &mut Init<'_, Self>, _: &dyn ConfigSnapshot) -> PluginResult<()> {
            init.set_tick_interval(Duration::from_millis(10));
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn on_init(&mut self, _: &mut Init<'_, Self>, _: &dyn ConfigSnapshot) -> PluginResult<()> {
            Err(PluginError::hook("no device"))
        }
    }

    fn echo() -> (Echo, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        (Echo { seen: Arc::clone(&seen) }, seen)
    }

    fn supervisor(shutdown_ms: u64) -> Supervisor {
        Supervisor::new(SupervisorOptions {
            queue_capacity: 8,
            shutdown_timeout: Duration::from_millis(shutdown_ms),
        })
    }

    #[tokio::test]
    async fn test_spawn_subscribes_bound_events() {
        let sup = supervisor(1000);
        let (plugin, _) = echo();

        sup.spawn("echo", plugin, &EmptyConfig).unwrap();

        assert_eq!(sup.subscribers("ping"), vec!["echo"]);
        assert_eq!(sup.subscribers(TERMINATE_EVENT), vec!["echo"]);
        assert_eq!(sup.len(), 1);

        let results = sup.shutdown_all().await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let sup = supervisor(1000);
        sup.spawn("echo", echo().0, &EmptyConfig).unwrap();

        let result = sup.spawn("echo", echo().0, &EmptyConfig);
        assert!(matches!(result, Err(SupervisorError::AlreadyRunning(_))));

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_spawns_of_one_name() {
        let sup = supervisor(1000);
        let shared = &sup;

        let results: Vec<_> = std::thread::scope(|scope| {
            let spawns: Vec<_> = (0..2)
                .map(|_| scope.spawn(move || shared.spawn("dup", SlowInit, &EmptyConfig)))
                .collect();
            spawns.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(SupervisorError::AlreadyRunning(_))))
        );
        assert_eq!(sup.len(), 1);

        let results = sup.shutdown_all().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
    }

    #[tokio::test]
    async fn test_failed_init_releases_the_name() {
        let sup = supervisor(1000);

        assert!(sup.spawn("echo", Broken, &EmptyConfig).is_err());
        assert!(!sup.queues.contains_key("echo"));

        sup.spawn("echo", echo().0, &EmptyConfig).unwrap();
        assert_eq!(sup.len(), 1);
        assert!(sup.queues.contains_key("echo"));

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let sup = supervisor(1000);
        let (plugin, seen) = echo();
        sup.spawn("echo", plugin, &EmptyConfig).unwrap();

        let ping = Event::builder("ping").value(1).param("who", "test").build().unwrap();
        assert_eq!(sup.emit(&ping), 1);

        let pong = sup.next_event(Duration::from_secs(2)).await.unwrap();
        assert_eq!(pong.name(), "pong");
        assert_eq!(pong.values(), ping.values());
        assert_eq!(pong.param_str("who"), Some("test"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_next_event_times_out_quietly() {
        let sup = supervisor(1000);
        assert!(sup.next_event(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_init_is_not_registered() {
        let sup = supervisor(1000);

        let result = sup.spawn("broken", Broken, &EmptyConfig);
        assert!(matches!(
            result,
            Err(SupervisorError::Plugin(PluginError::InitializationFailed(_)))
        ));
        assert!(sup.is_empty());
        assert!(sup.subscribers(TERMINATE_EVENT).is_empty());
    }

    #[test]
    fn test_exclusive_registration_replaces() {
        let sup = supervisor(1000);
        sup.register("joke", "a", false);
        sup.register("joke", "b", false);
        sup.register("joke", "a", false);
        assert_eq!(sup.subscribers("joke"), vec!["a", "b"]);

        sup.register("joke", "c", true);
        assert_eq!(sup.subscribers("joke"), vec!["c"]);
    }

    #[test]
    fn test_unregister_from_all() {
        let sup = supervisor(1000);
        sup.register("joke", "a", false);
        sup.register("joke", "b", false);
        sup.register("ping", "a", false);

        sup.unregister_from_all("a");
        assert_eq!(sup.subscribers("joke"), vec!["b"]);
        assert!(sup.subscribers("ping").is_empty());

        sup.unregister("joke", "b");
        assert!(sup.subscribers("joke").is_empty());
    }

    #[test]
    fn test_subscriber_without_queue_is_dropped() {
        let sup = supervisor(1000);
        sup.register("joke", "ghost", false);
        sup.register("ping", "ghost", false);

        assert_eq!(sup.emit(&Event::named("joke").unwrap()), 0);
        assert!(sup.subscribers("joke").is_empty());
        assert!(sup.subscribers("ping").is_empty());
    }

    #[test]
    fn test_subscriber_with_closed_queue_is_removed() {
        let sup = supervisor(1000);
        let (tx, rx) = bounded_queue(1);
        drop(rx);
        sup.queues.insert("gone".to_string(), tx);
        sup.register("joke", "gone", false);

        assert_eq!(sup.emit(&Event::named("joke").unwrap()), 0);
        assert!(sup.subscribers("joke").is_empty());
        assert!(!sup.queues.contains_key("gone"));
    }

    #[test]
    fn test_full_queue_only_affects_that_subscriber() {
        let sup = supervisor(1000);
        let (slow_tx, _slow_rx) = bounded_queue(1);
        let (fast_tx, mut fast_rx) = bounded_queue(4);
        sup.queues.insert("slow".to_string(), slow_tx);
        sup.queues.insert("fast".to_string(), fast_tx);
        sup.register("joke", "slow", false);
        sup.register("joke", "fast", false);

        let joke = Event::named("joke").unwrap();
        assert_eq!(sup.emit(&joke), 2);
        assert_eq!(sup.emit(&joke), 1);

        assert_eq!(sup.subscribers("joke"), vec!["slow", "fast"]);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
        assert!(matches!(
            sup.send_to("slow", joke),
            Err(SupervisorError::QueueFull(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_unknown_plugin() {
        let sup = supervisor(1000);
        assert!(matches!(
            sup.stop("nobody").await,
            Err(SupervisorError::NotRunning(_))
        ));
        assert!(matches!(
            sup.send_to("nobody", Event::named("joke").unwrap()),
            Err(SupervisorError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_reaps_the_actor() {
        let sup = supervisor(1000);
        sup.spawn("echo", echo().0, &EmptyConfig).unwrap();

        let exit = sup.stop("echo").await.unwrap();
        assert_eq!(exit.identity, "echo");
        assert_eq!(exit.state, ActorState::Stopped);
        assert!(sup.list().is_empty());
        assert!(sup.subscribers("ping").is_empty());
    }

    #[tokio::test]
    async fn test_stuck_plugin_times_out() {
        let sup = supervisor(50);
        sup.spawn("sleepy", Sleepy, &EmptyConfig).unwrap();
        sup.spawn("echo", echo().0, &EmptyConfig).unwrap();

        sup.send_to("sleepy", Event::named("hang").unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let results: HashMap<_, _> = sup.shutdown_all().await.into_iter().collect();
        assert!(matches!(
            results["sleepy"],
            Err(SupervisorError::ShutdownTimeout(_))
        ));
        assert!(results["echo"].is_ok());
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let sup = supervisor(1000);
        sup.spawn("echo", echo().0, &EmptyConfig).unwrap();

        let status = sup.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].subscriptions, vec!["ping", "terminate"]);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json[0]["name"], "echo");
        assert!(json[0]["stats"]["ticks"].is_u64());

        sup.shutdown_all().await;
    }

    #[test]
    fn test_options_from_config() {
        let table: toml::Table = toml::from_str(
            "[runtime]\nqueue_capacity = 0\nshutdown_timeout_ms = 250\n",
        )
        .unwrap();

        let options = SupervisorOptions::from_config(&table);
        assert_eq!(options.queue_capacity, 1);
        assert_eq!(options.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_huge_queue_capacity_is_clamped() {
        let table: toml::Table =
            toml::from_str(&format!("[runtime]\nqueue_capacity = {}\n", i64::MAX)).unwrap();

        let options = SupervisorOptions::from_config(&table);
        assert_eq!(options.queue_capacity, MAX_QUEUE_CAPACITY);

        let sup = Supervisor::new(options);
        assert_eq!(sup.options().queue_capacity, MAX_QUEUE_CAPACITY);
    }
}
