//! Person registry - one lockable record per person
//!
//! The map lock is only held to find or insert a slot; all reads and
//! writes of a record go through that person's own mutex, so work on
//! different persons never serializes.
//!
//! Alongside the persons it keeps the latest sighting of every tracker, so a
//! `ReverseGeocode` can target a tracker nobody follows.

use crate::domain::{PersonName, PersonRecord, SourceId, SourceSighting, TrackerEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub type PersonSlot = Arc<Mutex<PersonRecord>>;
pub type SourceSlot = Arc<Mutex<SourceSighting>>;

pub struct PersonRegistry {
    persons: RwLock<FxHashMap<PersonName, PersonSlot>>,
    sources: RwLock<FxHashMap<SourceId, SourceSlot>>,
    /// Output domain: "sensor" or "device_tracker"
    platform: String,
}

impl PersonRegistry {
    pub fn new(platform: &str) -> Self {
        Self {
            persons: RwLock::new(FxHashMap::default()),
            sources: RwLock::new(FxHashMap::default()),
            platform: platform.to_string(),
        }
    }

    /// Output entity id for a person, "<platform>.<person>_location"
    pub fn target_id(&self, person: &PersonName) -> String {
        let object_id = person.as_str().replace(' ', "_");
        format!("{}.{}_location", self.platform, object_id)
    }

    pub fn get(&self, person: &PersonName) -> Option<PersonSlot> {
        self.persons.read().get(person).cloned()
    }

    /// Create an `Unknown` record for a person named in configuration
    pub fn register(&self, person: PersonName, now: DateTime<Utc>) -> PersonSlot {
        let target_id = self.target_id(&person);
        self.persons
            .write()
            .entry(person.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PersonRecord::new(person, target_id, now))))
            .clone()
    }

    /// Store the first accepted record for a person
    ///
    /// If a slot appeared in the meantime it is kept and returned unchanged.
    pub fn insert(&self, record: PersonRecord) -> PersonSlot {
        self.persons
            .write()
            .entry(record.person_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(record)))
            .clone()
    }

    /// Find the person whose output entity or followed source is `entity_id`
    pub fn find_by_entity(&self, entity_id: &str) -> Option<PersonSlot> {
        self.persons
            .read()
            .values()
            .find(|slot| slot.lock().matches_entity(entity_id))
            .cloned()
    }

    /// Record the fix of a tracker event, accepted or not
    pub fn observe(&self, event: &TrackerEvent, now: DateTime<Utc>) {
        if let Some(slot) = self.sources.read().get(&event.source_id) {
            slot.lock().observe(event, now);
            return;
        }
        let mut sources = self.sources.write();
        match sources.get(&event.source_id) {
            Some(slot) => {
                slot.lock().observe(event, now);
            }
            None => {
                let sighting = SourceSighting::new(event, now);
                sources.insert(event.source_id.clone(), Arc::new(Mutex::new(sighting)));
            }
        }
    }

    /// Latest sighting of a tracker
    pub fn source(&self, entity_id: &str) -> Option<SourceSlot> {
        let source_id = SourceId::parse(entity_id).ok()?;
        self.sources.read().get(&source_id).cloned()
    }

    /// All slots, sorted by person for stable iteration
    pub fn slots(&self) -> Vec<(PersonName, PersonSlot)> {
        let mut slots: Vec<_> = self
            .persons
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Point-in-time copy of every record
    pub fn snapshot(&self) -> Vec<PersonRecord> {
        self.slots()
            .into_iter()
            .map(|(_, slot)| slot.lock().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.persons.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinates, PresenceStatus, ReportedState, SourceType};

    #[test]
    fn test_target_id() {
        let registry = PersonRegistry::new("sensor");
        assert_eq!(registry.target_id(&PersonName::new("Rod")), "sensor.rod_location");
        assert_eq!(
            PersonRegistry::new("device_tracker").target_id(&PersonName::new("mary ann")),
            "device_tracker.mary_ann_location"
        );
    }

    #[test]
    fn test_register_creates_unknown_once() {
        let registry = PersonRegistry::new("sensor");
        let now = Utc::now();
        let first = registry.register(PersonName::new("rod"), now);
        first.lock().presence.status = PresenceStatus::Home;

        let again = registry.register(PersonName::new("rod"), now);
        assert_eq!(again.lock().presence.status, PresenceStatus::Home);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_by_entity() {
        let registry = PersonRegistry::new("sensor");
        let slot = registry.register(PersonName::new("rod"), Utc::now());
        slot.lock().following_source_id = Some(SourceId::parse("device_tracker.rod_iphone").unwrap());

        assert!(registry.find_by_entity("sensor.rod_location").is_some());
        assert!(registry.find_by_entity("device_tracker.rod_iphone").is_some());
        assert!(registry.find_by_entity("device_tracker.other").is_none());
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = PersonRegistry::new("sensor");
        let now = Utc::now();
        registry.register(PersonName::new("zed"), now);
        registry.register(PersonName::new("amy"), now);
        let names: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.person_name.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["amy", "zed"]);
    }

    #[test]
    fn test_observe_any_source() {
        let registry = PersonRegistry::new("sensor");
        let now = Utc::now();
        let event = TrackerEvent {
            source_id: SourceId::parse("device_tracker.rod_watch").unwrap(),
            person_name: PersonName::new("rod"),
            reported_state: ReportedState::NotHome,
            previous_state: None,
            raw_state: "not_home".to_string(),
            coordinates: Some(Coordinates { latitude: 40.1, longitude: -111.0 }),
            gps_accuracy: Some(150.0),
            source_type: SourceType::Gps,
            location_time: now,
            altitude: None,
            vertical_accuracy: None,
            entity_picture: None,
            source_friendly_name: None,
        };

        registry.observe(&event, now);
        let moved = TrackerEvent {
            coordinates: Some(Coordinates { latitude: 40.2, longitude: -111.0 }),
            location_time: now + chrono::Duration::seconds(30),
            ..event
        };
        registry.observe(&moved, now);

        let slot = registry.source("device_tracker.rod_watch").expect("sighting kept");
        assert_eq!(slot.lock().coordinates.map(|c| c.latitude), Some(40.2));
        assert!(registry.source("device_tracker.rod_ipad").is_none());
        assert!(registry.source("not an entity").is_none());
        // Sightings are not persons
        assert!(registry.is_empty());
    }
}
