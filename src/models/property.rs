use chrono::{DateTime, Utc};
use std::fmt;

/// Value of an event property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// Signed 64 bit integer.
    Int64(i64),
    /// 64 bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Point in time, encoded as .NET ticks on the wire.
    Date(DateTime<Utc>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Int64(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Date(v) => f.write_str(&crate::convert::time_to_string(*v)),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int64(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int64(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::Date(v)
    }
}

/// Kind of personally identifiable information a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PiiKind {
    NotSet = 0,
    DistinguishedName = 1,
    GenericData = 2,
    Ipv4Address = 3,
    Ipv6Address = 4,
    MailSubject = 5,
    PhoneNumber = 6,
    QueryString = 7,
    SipAddress = 8,
    SmtpAddress = 9,
    Identity = 10,
    Uri = 11,
    Fqdn = 12,
    Ipv4AddressLegacy = 13,
}

/// Kind of customer content a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerContentKind {
    /// Not customer content.
    NotSet = 0,
    /// Free-form content authored by a customer.
    GenericContent = 1,
}

/// Classification of a property. Exactly one applies, so PII and customer content can never be
/// set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropertyClass {
    /// Regular property.
    #[default]
    Plain,
    /// Personally identifiable information.
    Pii(PiiKind),
    /// Customer content.
    CustomerContent(CustomerContentKind),
}

/// A classified property value.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub(crate) value: PropertyValue,
    pub(crate) class: PropertyClass,
}

impl Property {
    /// Create a plain property.
    pub fn new(value: impl Into<PropertyValue>) -> Self {
        Property {
            value: value.into(),
            class: PropertyClass::Plain,
        }
    }

    /// Create a PII property.
    pub fn pii(value: impl Into<PropertyValue>, kind: PiiKind) -> Self {
        let class = match kind {
            PiiKind::NotSet => PropertyClass::Plain,
            kind => PropertyClass::Pii(kind),
        };
        Property {
            value: value.into(),
            class,
        }
    }

    /// Create a customer content property.
    pub fn customer_content(value: impl Into<PropertyValue>, kind: CustomerContentKind) -> Self {
        let class = match kind {
            CustomerContentKind::NotSet => PropertyClass::Plain,
            kind => PropertyClass::CustomerContent(kind),
        };
        Property {
            value: value.into(),
            class,
        }
    }

    /// Create a property from both classification kinds.
    ///
    /// Returns `None` if both kinds are set.
    pub fn classified(
        value: impl Into<PropertyValue>,
        pii: PiiKind,
        customer_content: CustomerContentKind,
    ) -> Option<Self> {
        let class = match (pii, customer_content) {
            (PiiKind::NotSet, CustomerContentKind::NotSet) => PropertyClass::Plain,
            (pii, CustomerContentKind::NotSet) => PropertyClass::Pii(pii),
            (PiiKind::NotSet, cc) => PropertyClass::CustomerContent(cc),
            _ => return None,
        };
        Some(Property {
            value: value.into(),
            class,
        })
    }

    /// Property value.
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Property classification.
    pub fn class(&self) -> PropertyClass {
        self.class
    }
}
