use crate::models::{
    is_valid_property, CustomerContentKind, PiiKind, Priority, Property, PropertyValue,
};
use std::collections::BTreeMap;

/// A caller-supplied event before it is enriched by a [`Logger`](crate::Logger).
///
/// ```
/// use tenant_telemetry::{EventProperties, PiiKind, Priority};
///
/// let mut event = EventProperties::new("chat.message.sent");
/// event
///     .set_priority(Priority::High)
///     .set_property("Chat.Length", 42)
///     .set_property_with_pii("Chat.Sender", "someone@example.com", PiiKind::SmtpAddress);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventProperties {
    pub(crate) name: String,
    pub(crate) base_type: Option<String>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) priority: Option<Priority>,
    pub(crate) properties: BTreeMap<String, Property>,
}

impl EventProperties {
    /// Create an event with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        EventProperties {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the event name.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Set the base type. Defaults to `custom`.
    pub fn set_type(&mut self, base_type: impl Into<String>) -> &mut Self {
        self.base_type = Some(base_type.into());
        self
    }

    /// Set the event time in milliseconds since the Unix epoch. Negative values are replaced with
    /// the current time when the event is logged.
    pub fn set_timestamp(&mut self, timestamp: i64) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the priority. Defaults to [`Priority::Normal`].
    pub fn set_priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = Some(priority);
        self
    }

    /// Set the priority from its raw value. Unknown values fall back to the default priority.
    pub fn set_priority_raw(&mut self, raw: i32) -> &mut Self {
        self.priority = Priority::from_raw(raw);
        self
    }

    /// Set a plain property. Invalid names and empty strings are ignored.
    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> &mut Self {
        self.insert(name, Property::new(value))
    }

    /// Set a property holding personally identifiable information.
    pub fn set_property_with_pii(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
        kind: PiiKind,
    ) -> &mut Self {
        self.insert(name, Property::pii(value, kind))
    }

    /// Set a property holding customer content.
    pub fn set_property_with_customer_content(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
        kind: CustomerContentKind,
    ) -> &mut Self {
        self.insert(name, Property::customer_content(value, kind))
    }

    /// Set a property with both classification kinds. If both are set, the property is invalid
    /// and silently dropped.
    pub fn set_property_classified(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
        pii: PiiKind,
        customer_content: CustomerContentKind,
    ) -> &mut Self {
        match Property::classified(value, pii, customer_content) {
            Some(property) => self.insert(name, property),
            None => {
                self.properties.remove(name);
                self
            }
        }
    }

    /// Event name as given by the caller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties set so far.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    fn insert(&mut self, name: &str, property: Property) -> &mut Self {
        if is_valid_property(name, &property) {
            self.properties.insert(name.to_string(), property);
        }
        self
    }
}

impl From<&str> for EventProperties {
    fn from(name: &str) -> Self {
        EventProperties::new(name)
    }
}

impl From<String> for EventProperties {
    fn from(name: String) -> Self {
        EventProperties::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyClass;

    #[test]
    fn invalid_properties_are_ignored() {
        let mut event = EventProperties::new("test_event");
        event
            .set_property("ok", "value")
            .set_property("not ok", "value")
            .set_property("empty", "");
        assert_eq!(1, event.properties().len());
    }

    #[test]
    fn both_classifications_drop_property() {
        let mut event = EventProperties::new("test_event");
        event.set_property("user", "plain");
        event.set_property_classified(
            "user",
            "someone",
            PiiKind::Identity,
            CustomerContentKind::GenericContent,
        );
        assert!(event.properties().get("user").is_none());
    }

    #[test]
    fn classification_is_kept() {
        let mut event = EventProperties::new("test_event");
        event
            .set_property_with_pii("mail", "a@b.c", PiiKind::SmtpAddress)
            .set_property_with_customer_content(
                "text",
                "hello",
                CustomerContentKind::GenericContent,
            );
        assert_eq!(
            PropertyClass::Pii(PiiKind::SmtpAddress),
            event.properties()["mail"].class()
        );
        assert_eq!(
            PropertyClass::CustomerContent(CustomerContentKind::GenericContent),
            event.properties()["text"].class()
        );
    }

    #[test]
    fn raw_priority() {
        let mut event = EventProperties::new("test_event");
        event.set_priority_raw(3);
        assert_eq!(Some(Priority::High), event.priority);
        event.set_priority_raw(42);
        assert_eq!(None, event.priority);
    }
}
