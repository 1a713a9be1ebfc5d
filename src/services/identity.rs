//! Resolve which person a location source belongs to

use crate::domain::types::TriggerAttributes;
use crate::domain::{PersonName, SourceId};
use rustc_hash::FxHashMap;

/// Maps source entity ids to persons
///
/// Resolution order:
/// 1. explicit device mapping from configuration
/// 2. `person_name` attribute
/// 3. `account_name` attribute
/// 4. first word of `owner_fullname`
/// 5. object id up to the first `_` ("device_tracker.rod_iphone" -> "rod")
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    devices: FxHashMap<String, PersonName>,
}

impl IdentityResolver {
    pub fn new<I>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (String, PersonName)>,
    {
        Self {
            devices: mappings.into_iter().collect(),
        }
    }

    pub fn resolve(&self, source_id: &SourceId, attributes: &TriggerAttributes) -> PersonName {
        if let Some(person) = self.devices.get(source_id.as_str()) {
            return person.clone();
        }

        let from_attributes = non_empty(attributes.person_name.as_deref())
            .or_else(|| non_empty(attributes.account_name.as_deref()))
            .or_else(|| {
                non_empty(attributes.owner_fullname.as_deref())
                    .and_then(|full| full.split_whitespace().next())
            });
        if let Some(name) = from_attributes {
            return PersonName::new(name);
        }

        let object_id = source_id.object_id();
        PersonName::new(object_id.split('_').next().unwrap_or(object_id))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
