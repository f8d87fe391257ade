//! The fleet supervisor (§4.E): a 1-second tick loop that reconciles the set
//! of chains enabled in the registry database against the set of running
//! watchers, tolerating not-yet-reachable new chains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache_refresher::CacheRefresher;
use crate::contracts::{ChainRegistry, EventSourceFactory, TicketStore};
use crate::entities::ChainDescriptor;
use crate::handlers::HandlerSet;
use crate::watcher::{HandlerMapping, Watcher, WatcherConfig, WatcherError};

const TICK: Duration = Duration::from_secs(1);

/// A running watcher and the handle the supervisor uses to cancel it.
struct WatcherInstance {
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Shared dependencies every watcher is constructed with.
pub struct SupervisorDeps {
    pub registry: Arc<dyn ChainRegistry>,
    pub store: Arc<dyn TicketStore>,
    pub source_factory: Arc<dyn EventSourceFactory>,
    pub cache_refresher: Option<Arc<CacheRefresher>>,
    /// The chain name designated for liquidity/denom bookkeeping and cache
    /// refresh (`cosmos-hub` in the reference deployment).
    pub designated_chain: String,
}

pub struct Supervisor {
    deps: Arc<SupervisorDeps>,
    handlers: Arc<HandlerSet>,
    known: HashMap<String, ChainDescriptor>,
    watchers: HashMap<String, WatcherInstance>,
}

impl Supervisor {
    pub fn new(deps: SupervisorDeps) -> Self {
        let deps = Arc::new(deps);
        let handlers =
            Arc::new(HandlerSet::new(deps.registry.clone(), deps.store.clone(), deps.designated_chain.clone()));
        Self { deps, handlers, known: HashMap::new(), watchers: HashMap::new() }
    }

    /// Starts a watcher for every chain in the initial registry snapshot.
    /// Transient connect errors are NOT retried here: a chain that was
    /// never reachable at startup is dropped, not queued, so an operator
    /// notices a misconfigured registry instead of it silently retrying
    /// forever.
    pub async fn bootstrap(&mut self) {
        let chains = match self.deps.registry.chains().await {
            Ok(chains) => chains,
            Err(e) => {
                error!(error = %e, "cannot read chain registry at startup");
                return;
            }
        };

        for chain in chains.into_iter().filter(|c| c.enabled) {
            let name = chain.name.clone();
            if self.start_watcher(&chain, false).await {
                self.known.insert(name, chain);
            }
        }
    }

    /// Runs the reconciliation loop forever. Call after [`Self::bootstrap`].
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            ticker.tick().await;
            self.reconcile().await;
        }
    }

    async fn reconcile(&mut self) {
        let chains = match self.deps.registry.chains().await {
            Ok(chains) => chains,
            Err(e) => {
                warn!(error = %e, "cannot read chain registry, keeping previous map");
                return;
            }
        };

        let new_map: HashMap<String, ChainDescriptor> =
            chains.into_iter().filter(|c| c.enabled).map(|c| (c.name.clone(), c)).collect();

        let deletes: Vec<String> =
            self.known.keys().filter(|name| !new_map.contains_key(*name)).cloned().collect();
        let creates: Vec<ChainDescriptor> = new_map
            .iter()
            .filter(|(name, _)| !self.known.contains_key(*name))
            .map(|(_, chain)| chain.clone())
            .collect();

        for name in deletes {
            if let Some(instance) = self.watchers.remove(&name) {
                let _ = instance.cancel_tx.send(true);
                let _ = instance.join.await;
            }
            self.known.remove(&name);
            info!(chain = %name, "chain removed from registry, watcher cancelled");
        }

        for chain in creates {
            let name = chain.name.clone();
            if self.start_watcher(&chain, true).await {
                self.known.insert(name, chain);
            }
        }

        // MODIFY is a no-op at this layer: watchers don't observe descriptor
        // changes, that's operational policy (§4.E step 2).
    }

    /// Attempts to start a watcher for `chain`. Returns whether it should be
    /// considered part of the known (accepted) set: `true` on success,
    /// `true` for a transient failure on a new chain (kept pending, retried
    /// next tick without being added), `false` otherwise.
    async fn start_watcher(&mut self, chain: &ChainDescriptor, is_new_chain: bool) -> bool {
        let endpoint = format!("http://{}:26657", chain.name);
        let mapping = if chain.name == self.deps.designated_chain {
            HandlerMapping::designated()
        } else {
            HandlerMapping::standard()
        };
        let cache_refresher = if chain.name == self.deps.designated_chain {
            self.deps.cache_refresher.clone()
        } else {
            None
        };

        let config = Arc::new(WatcherConfig {
            chain: chain.name.clone(),
            rpc_endpoint: endpoint,
            grpc_addr: chain.node_grpc_addr.clone(),
            mapping,
            handlers: self.handlers.clone(),
            store: self.deps.store.clone(),
            source_factory: self.deps.source_factory.clone(),
            cache_refresher,
        });

        match Watcher::construct(config.clone()).await {
            Ok(watcher) => {
                if let Err(e) = self.deps.store.set_with_expiry(&chain.name, "true", Duration::ZERO).await {
                    warn!(chain = %chain.name, error = %e, "unable to set chain liveness to true");
                }

                let (cancel_tx, cancel_rx) = watch::channel(false);
                let join = tokio::spawn(watcher.run(cancel_rx));
                self.watchers.insert(chain.name.clone(), WatcherInstance { cancel_tx, join });
                debug!(chain = %chain.name, "connected");
                true
            }
            Err(e) => {
                if is_new_chain && is_transient(&e) {
                    info!(chain = %chain.name, "chain not yet available");
                    return false;
                }
                error!(chain = %chain.name, error = %e, "cannot create chain watcher");
                false
            }
        }
    }
}

fn is_transient(error: &WatcherError) -> bool {
    matches!(error, WatcherError::Connect(source) if source.is_transient_connect_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SourceError;
    use crate::testutil::{
        FailingEventSourceFactory, InMemoryChainRegistry, InMemoryTicketStore, ScriptedEventSourceFactory,
    };

    fn chain(name: &str) -> ChainDescriptor {
        ChainDescriptor {
            name: name.to_string(),
            enabled: true,
            node_rpc_url: format!("http://{name}:26657"),
            node_grpc_addr: format!("{name}:9090"),
            primary_channels: HashMap::new(),
            denoms: Vec::new(),
        }
    }

    fn supervisor(registry: Arc<InMemoryChainRegistry>, source_factory: Arc<dyn EventSourceFactory>) -> Supervisor {
        let store = Arc::new(InMemoryTicketStore::new());
        let deps = SupervisorDeps {
            registry,
            store,
            source_factory,
            cache_refresher: None,
            designated_chain: "cosmos-hub".into(),
        };
        Supervisor::new(deps)
    }

    #[tokio::test]
    async fn reconcile_creates_watcher_for_new_chain() {
        let registry = Arc::new(InMemoryChainRegistry::new(vec![chain("cosmos-hub")]));
        let factory: Arc<dyn EventSourceFactory> = Arc::new(ScriptedEventSourceFactory::new(Vec::new()));
        let mut sup = supervisor(registry, factory);

        sup.reconcile().await;

        assert!(sup.known.contains_key("cosmos-hub"));
        assert!(sup.watchers.contains_key("cosmos-hub"));
    }

    #[tokio::test]
    async fn reconcile_cancels_watcher_for_removed_chain() {
        let registry = Arc::new(InMemoryChainRegistry::new(vec![chain("cosmos-hub")]));
        let factory: Arc<dyn EventSourceFactory> = Arc::new(ScriptedEventSourceFactory::new(Vec::new()));
        let mut sup = supervisor(registry.clone(), factory);

        sup.reconcile().await;
        assert!(sup.watchers.contains_key("cosmos-hub"));

        registry.set_chains(Vec::new());
        sup.reconcile().await;

        assert!(!sup.known.contains_key("cosmos-hub"));
        assert!(!sup.watchers.contains_key("cosmos-hub"));
    }

    #[tokio::test]
    async fn transient_connect_error_on_new_chain_is_not_added_to_known() {
        let registry = Arc::new(InMemoryChainRegistry::new(vec![chain("akash")]));
        let factory: Arc<dyn EventSourceFactory> = Arc::new(FailingEventSourceFactory::new(|| {
            SourceError::ConnectionRefused { endpoint: "akash:26657".into() }
        }));
        let mut sup = supervisor(registry, factory);

        sup.reconcile().await;

        assert!(!sup.known.contains_key("akash"));
        assert!(!sup.watchers.contains_key("akash"));
    }

    #[tokio::test]
    async fn fatal_connect_error_on_new_chain_is_not_added_to_known_either() {
        let registry = Arc::new(InMemoryChainRegistry::new(vec![chain("akash")]));
        let factory: Arc<dyn EventSourceFactory> =
            Arc::new(FailingEventSourceFactory::new(|| SourceError::Transport("boom".into())));
        let mut sup = supervisor(registry, factory);

        sup.reconcile().await;

        assert!(!sup.known.contains_key("akash"));
        assert!(!sup.watchers.contains_key("akash"));
    }

    #[tokio::test]
    async fn bootstrap_starts_a_watcher_per_enabled_chain() {
        let registry = Arc::new(InMemoryChainRegistry::new(vec![chain("cosmos-hub"), chain("akash")]));
        let factory: Arc<dyn EventSourceFactory> = Arc::new(ScriptedEventSourceFactory::new(Vec::new()));
        let mut sup = supervisor(registry, factory);

        sup.bootstrap().await;

        assert_eq!(sup.watchers.len(), 2);
        assert_eq!(sup.known.len(), 2);
    }
}
