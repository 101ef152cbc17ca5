//! Explicit provider registry; the composition root.
//!
//! Built once at startup and passed down by handle; providers are never
//! reached through statics. Each provider owns its own server pool and
//! caches, and the shared [`TradeStatusEngine`] owns the status/secret
//! caches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chains::{
    ChainId, ChainSpec, BITCOIN_MAIN, DOGECOIN_MAIN, LITECOIN_MAIN, PIRATECHAIN_MAIN,
};
use crate::htlc::TradeStatusEngine;
use crate::provider::{ChainProvider, ElectrumClient, LightClient};
use crate::settings::Settings;

/// Sapling activation; nothing relevant predates it on the shielded chain.
const DEFAULT_BIRTHDAY_HEIGHT: u32 = 152_855;

pub struct ForeignChains {
    providers: HashMap<ChainId, Arc<dyn ChainProvider>>,
    pub status_engine: TradeStatusEngine,
}

impl ForeignChains {
    /// Constructs providers for every supported mainnet, applying the
    /// operator's settings overlay.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut providers: HashMap<ChainId, Arc<dyn ChainProvider>> = HashMap::new();

        for spec in [&BITCOIN_MAIN, &LITECOIN_MAIN, &DOGECOIN_MAIN] {
            providers.insert(
                spec.chain,
                Arc::new(ElectrumClient::new(spec, settings.extra_servers(spec.net_id))),
            );
        }

        let pirate = &PIRATECHAIN_MAIN;
        providers.insert(
            pirate.chain,
            Arc::new(LightClient::new(
                pirate,
                settings.extra_servers(pirate.net_id),
                settings
                    .birthday_height(pirate.net_id)
                    .unwrap_or(DEFAULT_BIRTHDAY_HEIGHT),
            )),
        );

        ForeignChains {
            providers,
            status_engine: TradeStatusEngine::new(),
        }
    }

    pub fn provider(&self, chain: ChainId) -> Option<Arc<dyn ChainProvider>> {
        self.providers.get(&chain).cloned()
    }

    pub fn spec(chain: ChainId) -> &'static ChainSpec {
        match chain {
            ChainId::Bitcoin => &BITCOIN_MAIN,
            ChainId::Litecoin => &LITECOIN_MAIN,
            ChainId::Dogecoin => &DOGECOIN_MAIN,
            ChainId::PirateChain => &PIRATECHAIN_MAIN,
        }
    }

    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.providers.keys().copied()
    }
}
