use crate::models::{Property, PropertyValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

static EVENT_NAME_AND_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z]([a-zA-Z0-9]|_){2,98}[a-zA-Z0-9]$").expect("regex is valid")
});

static PROPERTY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z](([a-zA-Z0-9_.]){0,98}[a-zA-Z0-9])?$").expect("regex is valid")
});

/// Lowercase an event name and replace dots with underscores.
pub(crate) fn normalize_event_name(name: &str) -> String {
    name.to_lowercase().replace('.', "_")
}

pub(crate) fn is_valid_event_name_or_type(value: &str) -> bool {
    EVENT_NAME_AND_TYPE.is_match(value)
}

pub(crate) fn is_valid_property_name(name: &str) -> bool {
    PROPERTY_NAME.is_match(name)
}

/// Whether a property can be stored under the given name at all.
pub(crate) fn is_valid_property(name: &str, property: &Property) -> bool {
    if !is_valid_property_name(name) {
        debug!(name, "dropping property with invalid name");
        return false;
    }
    if matches!(&property.value, PropertyValue::String(s) if s.is_empty()) {
        debug!(name, "dropping property with empty value");
        return false;
    }
    true
}

pub(crate) trait Sanitize {
    fn sanitize(&mut self);
}

impl Sanitize for BTreeMap<String, Property> {
    fn sanitize(&mut self) {
        self.retain(|name, property| is_valid_property(name, property));
    }
}
