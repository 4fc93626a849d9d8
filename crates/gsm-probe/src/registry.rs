//! The process-wide `protocol name → Strategy` table.
//!
//! Populated once at init from the fixed strategy list; an unknown name is a
//! hard error surfaced at config load, never at probe time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProbeError;
use crate::net::http;
use crate::strategies::*;
use crate::Strategy;

pub struct Registry {
    strategies: BTreeMap<&'static str, Arc<dyn Strategy>>,
}

impl Registry {
    /// Build the standard strategy set with a shared per-probe timeout.
    pub fn standard(timeout: Duration) -> Result<Self, ProbeError> {
        let client = http::client()?;
        let insecure = http::insecure_client()?;

        let list: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(asa::Asa::new(client.clone(), timeout)),
            Arc::new(ase::Ase::new(timeout)),
            Arc::new(assettocorsa::AssettoCorsa::new(client.clone(), timeout)),
            Arc::new(battlefield::Battlefield::new(timeout)),
            Arc::new(beammp::BeamMp::new(client.clone(), timeout)),
            Arc::new(discord::Discord::new(client.clone(), timeout)),
            Arc::new(doom3::Doom3::new(timeout)),
            Arc::new(eco::Eco::new(client.clone(), timeout)),
            Arc::new(factorio::Factorio::new(client.clone(), timeout)),
            Arc::new(fivem::FiveM::new(client.clone(), timeout)),
            Arc::new(front::Front::new(client.clone(), timeout)),
            Arc::new(gamespy1::GameSpy1::new(timeout)),
            Arc::new(gamespy2::GameSpy2::new(timeout)),
            Arc::new(gamespy3::GameSpy3::new(timeout)),
            Arc::new(gportal::GPortal::new(client.clone(), timeout)),
            Arc::new(hexen2::Hexen2::new(timeout)),
            Arc::new(minecraft::Minecraft::new(timeout)),
            Arc::new(palworld::Palworld::new(client.clone(), timeout)),
            Arc::new(quake1::Quake1::new(timeout)),
            Arc::new(quake2::Quake2::new(timeout)),
            Arc::new(quake3::Quake3::new(timeout)),
            Arc::new(raknet::Raknet::new(timeout)),
            Arc::new(samp::Samp::new(timeout)),
            Arc::new(satisfactory::Satisfactory::new(insecure, timeout)),
            Arc::new(scpsl::ScpSl::new(client.clone(), timeout)),
            Arc::new(scum::Scum::new(client.clone(), timeout)),
            Arc::new(source::Source::new(timeout)),
            Arc::new(teamspeak3::Teamspeak3::new(timeout)),
            Arc::new(terraria::Terraria::new(client.clone(), timeout)),
            Arc::new(unreal2::Unreal2::new(timeout)),
            Arc::new(ut3::Ut3::new(timeout)),
            Arc::new(vcmp::Vcmp::new(timeout)),
            Arc::new(won::Won::new(timeout)),
        ];

        let mut strategies = BTreeMap::new();
        for strategy in list {
            strategies.insert(strategy.name(), strategy);
        }
        Ok(Registry { strategies })
    }

    pub fn get(&self, protocol: &str) -> Result<&Arc<dyn Strategy>, ProbeError> {
        self.strategies
            .get(protocol)
            .ok_or_else(|| ProbeError::InvalidGame(protocol.to_owned()))
    }

    pub fn contains(&self, protocol: &str) -> bool {
        self.strategies.contains_key(protocol)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.strategies.keys().copied()
    }

    /// The strategies the scheduler must pre-query each tick.
    pub fn pre_query_strategies(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies
            .values()
            .filter(|s| s.pre_query_required())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::standard(Duration::from_secs(15)).unwrap()
    }

    #[test]
    fn ships_the_full_strategy_set() {
        let registry = registry();
        for name in [
            "source", "won", "gamespy1", "gamespy2", "gamespy3", "quake1", "quake2", "quake3",
            "ase", "asa", "battlefield", "doom3", "unreal2", "ut3", "samp", "vcmp", "raknet",
            "minecraft", "teamspeak3", "terraria", "fivem", "discord", "assettocorsa", "gportal",
            "hexen2", "eco", "front", "scum", "satisfactory", "factorio", "beammp", "palworld",
            "scpsl",
        ] {
            assert!(registry.contains(name), "missing strategy {name}");
        }
        assert_eq!(registry.len(), 33);
    }

    #[test]
    fn unknown_protocol_is_invalid_game() {
        let registry = registry();
        assert!(matches!(
            registry.get("teamspeak4"),
            Err(ProbeError::InvalidGame(_))
        ));
    }

    #[test]
    fn token_and_snapshot_strategies_require_pre_query() {
        let registry = registry();
        let mut pre: Vec<_> = registry
            .pre_query_strategies()
            .map(|s| s.name())
            .collect();
        pre.sort_unstable();
        assert_eq!(pre, ["asa", "beammp", "palworld"]);
    }

    #[test]
    fn names_match_registration_keys() {
        let registry = registry();
        for name in registry.names() {
            assert_eq!(registry.get(name).unwrap().name(), name);
        }
    }
}
