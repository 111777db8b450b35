//! Per-system state owned by the poller.
//!
//! One entry per system id holds everything the scheduler and the dispatcher
//! need: the last known record, cached categories, tracked parameters, live
//! thermostats, the mode override and the registered listener. A single lock
//! guards the table; callers copy what they need out and never call a
//! listener while holding it.

use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::listener::SystemListener;
use crate::models::uplink::{Category, Mode, ParameterId, System, SystemConfig, SystemId, Thermostat, ThermostatId};

struct CachedCategories {
    with_parameters: bool,
    categories: Vec<Category>,
}

#[derive(Default)]
struct SystemEntry {
    record: Option<System>,
    capabilities: Option<SystemConfig>,
    categories: Option<CachedCategories>,
    tracked: BTreeSet<ParameterId>,
    thermostats: BTreeMap<ThermostatId, Thermostat>,
    mode: Option<Mode>,
    listener: Option<Arc<dyn SystemListener>>,
}

#[derive(Default)]
pub struct SystemTable {
    entries: Mutex<BTreeMap<SystemId, SystemEntry>>,
}

impl SystemTable {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<SystemId, SystemEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- listeners ----

    /// Install the listener for `id`, returning the one it replaces.
    pub fn register_listener(&self, id: SystemId, listener: Arc<dyn SystemListener>) -> Option<Arc<dyn SystemListener>> {
        self.entries().entry(id).or_default().listener.replace(listener)
    }

    /// Remove `listener` if it is the one registered for `id`. Also forgets
    /// the tracked parameters and the mode override; thermostats stay.
    pub fn remove_listener(&self, id: SystemId, listener: &Arc<dyn SystemListener>) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        match &entry.listener {
            Some(current) if Arc::ptr_eq(current, listener) => {
                entry.listener = None;
                entry.tracked.clear();
                entry.mode = None;
                true
            }
            _ => false,
        }
    }

    pub fn listener(&self, id: SystemId) -> Option<Arc<dyn SystemListener>> {
        self.entries().get(&id).and_then(|e| e.listener.clone())
    }

    pub fn listener_count(&self) -> usize {
        self.entries().values().filter(|e| e.listener.is_some()).count()
    }

    /// Systems with a registered listener, in id order.
    pub fn listened_systems(&self) -> Vec<SystemId> {
        self.entries()
            .iter()
            .filter(|(_, e)| e.listener.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    // ---- tracked parameters ----

    pub fn add_tracked(&self, id: SystemId, parameter: ParameterId) -> bool {
        let mut entries = self.entries();
        let entry = entries.entry(id).or_default();
        if entry.listener.is_none() {
            debug!(
                "Tracking parameter {} for system {} which has no listener yet",
                parameter, id
            );
        }
        entry.tracked.insert(parameter)
    }

    pub fn remove_tracked(&self, id: SystemId, parameter: ParameterId) -> bool {
        self.entries()
            .get_mut(&id)
            .is_some_and(|e| e.tracked.remove(&parameter))
    }

    pub fn tracked(&self, id: SystemId) -> Vec<ParameterId> {
        self.entries()
            .get(&id)
            .map(|e| e.tracked.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---- heartbeat state ----

    pub fn put_thermostat(&self, id: SystemId, thermostat: Thermostat) {
        self.entries()
            .entry(id)
            .or_default()
            .thermostats
            .insert(thermostat.id, thermostat);
    }

    pub fn remove_thermostat(&self, id: SystemId, thermostat: ThermostatId) -> Option<Thermostat> {
        self.entries().get_mut(&id).and_then(|e| e.thermostats.remove(&thermostat))
    }

    /// Live thermostats of every system that has at least one.
    pub fn thermostats(&self) -> Vec<(SystemId, Vec<Thermostat>)> {
        self.entries()
            .iter()
            .filter(|(_, e)| !e.thermostats.is_empty())
            .map(|(id, e)| (*id, e.thermostats.values().cloned().collect()))
            .collect()
    }

    /// Record the requested mode; the default mode clears the override.
    pub fn set_mode(&self, id: SystemId, mode: Mode) {
        let mut entries = self.entries();
        let entry = entries.entry(id).or_default();
        entry.mode = if mode.is_default() { None } else { Some(mode) };
    }

    pub fn mode_overrides(&self) -> Vec<(SystemId, Mode)> {
        self.entries()
            .iter()
            .filter_map(|(id, e)| e.mode.map(|m| (*id, m)))
            .collect()
    }

    // ---- cached remote data ----

    /// Merge a full listing into the cache.
    pub fn merge_systems(&self, systems: &[System]) {
        let mut entries = self.entries();
        for system in systems {
            let entry = entries.entry(system.system_id).or_default();
            match entry.record.as_mut() {
                Some(record) => record.refresh_from(system.clone()),
                None => entry.record = Some(system.clone()),
            }
            if let Some(record) = entry.record.as_mut() {
                record.capabilities = record.capabilities.or(entry.capabilities);
            }
        }
    }

    /// Refine one record in place and return the merged view.
    pub fn update_system(&self, system: System) -> System {
        let mut entries = self.entries();
        let entry = entries.entry(system.system_id).or_default();
        match entry.record.as_mut() {
            Some(record) => {
                record.refresh_from(system);
                record.clone()
            }
            None => {
                let system = System {
                    capabilities: system.capabilities.or(entry.capabilities),
                    ..system
                };
                entry.record = Some(system.clone());
                system
            }
        }
    }

    pub fn system(&self, id: SystemId) -> Option<System> {
        self.entries().get(&id).and_then(|e| e.record.clone())
    }

    pub fn systems(&self) -> Vec<System> {
        self.entries().values().filter_map(|e| e.record.clone()).collect()
    }

    pub fn set_capabilities(&self, id: SystemId, config: SystemConfig) {
        let mut entries = self.entries();
        let entry = entries.entry(id).or_default();
        entry.capabilities = Some(config);
        if let Some(record) = entry.record.as_mut() {
            record.capabilities = Some(config);
        }
    }

    pub fn capabilities(&self, id: SystemId) -> Option<SystemConfig> {
        self.entries().get(&id).and_then(|e| e.capabilities)
    }

    pub fn set_categories(&self, id: SystemId, with_parameters: bool, categories: Vec<Category>) {
        self.entries().entry(id).or_default().categories = Some(CachedCategories {
            with_parameters,
            categories,
        });
    }

    /// Cached categories, if they carry at least the requested detail.
    pub fn categories(&self, id: SystemId, with_parameters: bool) -> Option<Vec<Category>> {
        self.entries()
            .get(&id)
            .and_then(|e| e.categories.as_ref())
            .filter(|c| c.with_parameters || !with_parameters)
            .map(|c| c.categories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::uplink::ConnectionStatus;

    struct Quiet;
    impl SystemListener for Quiet {}

    fn system(id: i64, name: &str) -> System {
        System {
            system_id: SystemId(id),
            name: name.into(),
            product_name: None,
            security_level: None,
            serial_number: None,
            last_activity_date: None,
            connection_status: ConnectionStatus::Online,
            has_alarmed: false,
            capabilities: None,
        }
    }

    #[test]
    fn removing_listener_clears_tracked_and_mode_but_not_thermostats() {
        let table = SystemTable::default();
        let id = SystemId(42);
        let listener: Arc<dyn SystemListener> = Arc::new(Quiet);
        table.register_listener(id, listener.clone());
        table.add_tracked(id, ParameterId(100));
        table.set_mode(id, Mode::Vacation);
        table.put_thermostat(
            id,
            Thermostat {
                id: ThermostatId(1),
                name: "hall".into(),
                climate_systems: None,
                current_temperature: None,
                target_temperature: None,
            },
        );

        assert!(table.remove_listener(id, &listener));
        assert!(table.tracked(id).is_empty());
        assert!(table.mode_overrides().is_empty());
        assert_eq!(table.thermostats().len(), 1);
        assert_eq!(table.listener_count(), 0);
    }

    #[test]
    fn only_the_registered_listener_can_be_removed() {
        let table = SystemTable::default();
        let registered: Arc<dyn SystemListener> = Arc::new(Quiet);
        let stranger: Arc<dyn SystemListener> = Arc::new(Quiet);
        table.register_listener(SystemId(1), registered.clone());
        assert!(!table.remove_listener(SystemId(1), &stranger));
        assert!(!table.remove_listener(SystemId(2), &registered));
        assert_eq!(table.listened_systems(), vec![SystemId(1)]);
    }

    #[test]
    fn tracked_parameters_are_a_set() {
        let table = SystemTable::default();
        assert!(table.add_tracked(SystemId(1), ParameterId(5)));
        assert!(!table.add_tracked(SystemId(1), ParameterId(5)));
        assert!(table.remove_tracked(SystemId(1), ParameterId(5)));
        assert!(!table.remove_tracked(SystemId(1), ParameterId(5)));
        assert!(!table.remove_tracked(SystemId(9), ParameterId(5)));
    }

    #[test]
    fn default_mode_clears_override() {
        let table = SystemTable::default();
        table.set_mode(SystemId(1), Mode::AwayFromHome);
        assert_eq!(table.mode_overrides(), vec![(SystemId(1), Mode::AwayFromHome)]);
        table.set_mode(SystemId(1), Mode::DefaultOperation);
        assert!(table.mode_overrides().is_empty());
    }

    #[test]
    fn system_records_are_refined_in_place() {
        let table = SystemTable::default();
        table.merge_systems(&[system(1, "a"), system(2, "b")]);
        table.set_capabilities(
            SystemId(1),
            SystemConfig {
                has_hot_water: true,
                ..SystemConfig::default()
            },
        );
        let merged = table.update_system(system(1, "renamed"));
        assert_eq!(merged.name, "renamed");
        assert!(merged.capabilities.is_some_and(|c| c.has_hot_water));
        assert_eq!(table.systems().len(), 2);
    }

    #[test]
    fn capabilities_fetched_before_the_listing_are_kept() {
        let table = SystemTable::default();
        let config = SystemConfig {
            has_heating: true,
            ..SystemConfig::default()
        };
        table.set_capabilities(SystemId(3), config);
        assert_eq!(table.capabilities(SystemId(3)), Some(config));
        table.merge_systems(&[system(3, "c")]);
        assert_eq!(table.system(SystemId(3)).and_then(|s| s.capabilities), Some(config));
    }

    #[test]
    fn categories_cache_respects_detail_level() {
        let table = SystemTable::default();
        table.set_categories(SystemId(1), false, vec![]);
        assert!(table.categories(SystemId(1), false).is_some());
        assert!(table.categories(SystemId(1), true).is_none());
        table.set_categories(SystemId(1), true, vec![]);
        assert!(table.categories(SystemId(1), false).is_some());
    }
}
