//! The extensible `(type, format)` codec registry.
//!
//! Each root enforcer owns one registry. Codecs convert between transport
//! scalars and native values (dates, binary buffers), validate the native
//! form, and optionally generate random members. Constructors advertised by a
//! codec land in a process wide set consulted by `formalize`.
use crate::value::{Constructor, Map, Value};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use std::{cell::RefCell, convert::TryFrom, fmt, rc::Rc};
use thiserror::Error;

lazy_static! {
    static ref KNOWN_CONSTRUCTORS: Mutex<AHashSet<Constructor>> = Mutex::new(AHashSet::new());
}

pub(crate) fn register_constructors(constructors: &[Constructor]) {
    KNOWN_CONSTRUCTORS.lock().extend(constructors.iter().copied());
}

pub(crate) fn constructor_known(constructor: Constructor) -> bool {
    KNOWN_CONSTRUCTORS.lock().contains(&constructor)
}

/// The primitive types a format may attach to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PrimitiveKind {
    Boolean,
    Integer,
    Number,
    String,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveKind::Boolean => f.write_str("boolean"),
            PrimitiveKind::Integer => f.write_str("integer"),
            PrimitiveKind::Number => f.write_str("number"),
            PrimitiveKind::String => f.write_str("string"),
        }
    }
}

impl TryFrom<&str> for PrimitiveKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "boolean" => Ok(PrimitiveKind::Boolean),
            "integer" => Ok(PrimitiveKind::Integer),
            "number" => Ok(PrimitiveKind::Number),
            "string" => Ok(PrimitiveKind::String),
            _ => Err(()),
        }
    }
}

/// Why a data type definition was rejected.
#[derive(Debug, Error)]
pub enum DefineError {
    #[error("Invalid type specified: {0:?}. Must be one of: boolean, integer, number, string")]
    InvalidType(String),
    #[error("Invalid format specified. Must be a non-empty string")]
    InvalidFormat,
    #[error("Format already defined for type {kind}: {format}")]
    AlreadyDefined { kind: PrimitiveKind, format: String },
}

/// The schema view handed to a codec: the (possibly partially) normalized
/// properties of the schema the value is enforced against.
pub struct CodecContext<'a> {
    pub schema: &'a Map,
}

type Codec = fn(&CodecContext<'_>, &Value) -> Result<Value, String>;
type CodecCheck = fn(&CodecContext<'_>, &Value) -> Result<(), String>;
type CodecRandom = fn(&CodecContext<'_>, &mut dyn RngCore) -> Result<Value, String>;

/// A registered `(type, format)` codec.
pub struct DataTypeDefinition {
    pub deserialize: Codec,
    pub serialize: Codec,
    pub validate: CodecCheck,
    pub random: Option<CodecRandom>,
    /// `None` means the definer omitted the field (reported once as a
    /// warning); `Some(vec![])` is an explicit "no native constructors".
    pub constructors: Option<Vec<Constructor>>,
    pub is_numeric: bool,
}

impl DataTypeDefinition {
    /// A definition with the three required callbacks and everything else
    /// defaulted. The required callbacks cannot be omitted: the field types
    /// enforce the contract the original checked at runtime.
    pub fn new(deserialize: Codec, serialize: Codec, validate: CodecCheck) -> DataTypeDefinition {
        DataTypeDefinition {
            deserialize,
            serialize,
            validate,
            random: None,
            constructors: None,
            is_numeric: false,
        }
    }
}

impl fmt::Debug for DataTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTypeDefinition")
            .field("constructors", &self.constructors)
            .field("is_numeric", &self.is_numeric)
            .finish()
    }
}

// Formats that are part of the specification but carry no conversion codec.
const STANDARD_FORMATS: &[(PrimitiveKind, &str)] = &[
    (PrimitiveKind::Integer, "int32"),
    (PrimitiveKind::Integer, "int64"),
    (PrimitiveKind::Number, "float"),
    (PrimitiveKind::Number, "double"),
];

/// Per root mutable table of `(type, format)` codecs.
#[derive(Debug, Default)]
pub struct DataTypeRegistry {
    formats: RefCell<AHashMap<(PrimitiveKind, String), Rc<DataTypeDefinition>>>,
}

impl DataTypeRegistry {
    /// An empty registry.
    pub fn new() -> DataTypeRegistry {
        DataTypeRegistry::default()
    }

    /// A registry with the OpenAPI built in string formats installed.
    pub fn with_builtins() -> DataTypeRegistry {
        let registry = DataTypeRegistry::new();
        for (format, definition) in builtin_string_formats() {
            registry
                .define(PrimitiveKind::String, format, Some(definition))
                .expect("built-in formats install exactly once");
        }
        registry
    }

    /// Register, or with `None` de-register, a `(type, format)` codec.
    pub fn define(
        &self,
        kind: PrimitiveKind,
        format: &str,
        definition: Option<DataTypeDefinition>,
    ) -> Result<(), DefineError> {
        if format.is_empty() {
            return Err(DefineError::InvalidFormat);
        }
        let key = (kind, format.to_string());
        let mut formats = self.formats.borrow_mut();
        match definition {
            None => {
                formats.remove(&key);
                Ok(())
            }
            Some(definition) => {
                if formats.contains_key(&key) {
                    return Err(DefineError::AlreadyDefined {
                        kind,
                        format: format.to_string(),
                    });
                }
                match &definition.constructors {
                    Some(constructors) => register_constructors(constructors),
                    None => tracing::warn!(
                        %kind,
                        format,
                        "data type definition has no constructors; formalize will not preserve its values"
                    ),
                }
                formats.insert(key, Rc::new(definition));
                Ok(())
            }
        }
    }

    pub fn get(&self, kind: PrimitiveKind, format: &str) -> Option<Rc<DataTypeDefinition>> {
        self.formats
            .borrow()
            .get(&(kind, format.to_string()))
            .cloned()
    }

    /// The codec owning values of the given constructor, if any.
    pub(crate) fn for_constructor(
        &self,
        constructor: Constructor,
    ) -> Option<(PrimitiveKind, String, Rc<DataTypeDefinition>)> {
        self.formats
            .borrow()
            .iter()
            .find(|(_, definition)| {
                definition
                    .constructors
                    .as_ref()
                    .map_or(false, |tags| tags.contains(&constructor))
            })
            .map(|((kind, format), definition)| (*kind, format.clone(), Rc::clone(definition)))
    }

    /// Whether a `(type, format)` pair counts as numeric for bound checks.
    pub fn is_numeric(&self, kind: PrimitiveKind, format: Option<&str>) -> bool {
        match kind {
            PrimitiveKind::Integer | PrimitiveKind::Number => true,
            _ => format.map_or(false, |format| {
                self.get(kind, format).map_or(false, |def| def.is_numeric)
            }),
        }
    }

    /// Whether a format is known, either through a codec or as one of the
    /// specification's conversion free formats.
    pub fn is_standard(&self, kind: PrimitiveKind, format: &str) -> bool {
        self.get(kind, format).is_some()
            || STANDARD_FORMATS
                .iter()
                .any(|(standard_kind, standard)| *standard_kind == kind && *standard == format)
    }
}

fn builtin_string_formats() -> Vec<(&'static str, DataTypeDefinition)> {
    vec![
        (
            "binary",
            DataTypeDefinition {
                deserialize: |_, value| match value {
                    Value::String(text) => Ok(Value::Bytes(Rc::new(text.clone().into_bytes()))),
                    Value::Bytes(_) => Ok(value.clone()),
                    _ => Err("Expected a string of octets".to_string()),
                },
                serialize: |_, value| match value {
                    Value::Bytes(bytes) => {
                        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
                    }
                    Value::String(_) => Ok(value.clone()),
                    _ => Err("Expected a binary buffer".to_string()),
                },
                validate: |_, value| match value {
                    Value::Bytes(_) => Ok(()),
                    _ => Err("Expected a binary buffer".to_string()),
                },
                random: Some(|_, rng| {
                    let length = rng.gen_range(1..25usize);
                    let mut buffer = vec![0u8; length];
                    rng.fill_bytes(&mut buffer);
                    Ok(Value::Bytes(Rc::new(buffer)))
                }),
                constructors: Some(vec![Constructor::Bytes]),
                is_numeric: false,
            },
        ),
        (
            "byte",
            DataTypeDefinition {
                deserialize: |_, value| match value {
                    Value::String(text) => base64::decode(text)
                        .map(|decoded| Value::Bytes(Rc::new(decoded)))
                        .map_err(|_| "Expected a base64 encoded string".to_string()),
                    Value::Bytes(_) => Ok(value.clone()),
                    _ => Err("Expected a base64 encoded string".to_string()),
                },
                serialize: |_, value| match value {
                    Value::Bytes(bytes) => Ok(Value::String(base64::encode(bytes.as_slice()))),
                    _ => Err("Expected a binary buffer".to_string()),
                },
                validate: |_, value| match value {
                    Value::Bytes(_) => Ok(()),
                    _ => Err("Expected a binary buffer".to_string()),
                },
                random: Some(|_, rng| {
                    let length = rng.gen_range(1..25usize);
                    let mut buffer = vec![0u8; length];
                    rng.fill_bytes(&mut buffer);
                    Ok(Value::Bytes(Rc::new(buffer)))
                }),
                constructors: Some(vec![Constructor::Bytes]),
                is_numeric: false,
            },
        ),
        (
            "date",
            DataTypeDefinition {
                deserialize: |_, value| match value {
                    Value::String(text) => parse_date(text)
                        .map(Value::Date)
                        .ok_or_else(|| "Expected a date formatted as YYYY-MM-DD".to_string()),
                    Value::Date(_) => Ok(value.clone()),
                    _ => Err("Expected a date formatted as YYYY-MM-DD".to_string()),
                },
                serialize: |_, value| match value {
                    Value::Date(date) => Ok(Value::String(date.format("%Y-%m-%d").to_string())),
                    _ => Err("Expected a date object".to_string()),
                },
                validate: |_, value| match value {
                    Value::Date(_) => Ok(()),
                    _ => Err("Expected a date object".to_string()),
                },
                random: Some(random_date),
                constructors: Some(vec![Constructor::Date]),
                is_numeric: true,
            },
        ),
        (
            "date-time",
            DataTypeDefinition {
                deserialize: |_, value| match value {
                    Value::String(text) => DateTime::parse_from_rfc3339(text)
                        .map(|parsed| Value::Date(parsed.with_timezone(&Utc)))
                        .map_err(|_| "Expected a date-time formatted per RFC3339".to_string()),
                    Value::Date(_) => Ok(value.clone()),
                    _ => Err("Expected a date-time formatted per RFC3339".to_string()),
                },
                serialize: |_, value| match value {
                    Value::Date(date) => Ok(Value::String(
                        date.to_rfc3339_opts(SecondsFormat::Millis, true),
                    )),
                    _ => Err("Expected a date object".to_string()),
                },
                validate: |_, value| match value {
                    Value::Date(_) => Ok(()),
                    _ => Err("Expected a date object".to_string()),
                },
                random: Some(random_date),
                constructors: Some(vec![Constructor::Date]),
                is_numeric: true,
            },
        ),
        (
            "password",
            DataTypeDefinition {
                deserialize: |_, value| match value {
                    Value::String(_) => Ok(value.clone()),
                    _ => Err("Expected a string".to_string()),
                },
                serialize: |_, value| match value {
                    Value::String(_) => Ok(value.clone()),
                    _ => Err("Expected a string".to_string()),
                },
                validate: |_, value| match value {
                    Value::String(_) => Ok(()),
                    _ => Err("Expected a string".to_string()),
                },
                random: None,
                constructors: Some(vec![]),
                is_numeric: false,
            },
        ),
    ]
}

pub(crate) fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn random_date(ctx: &CodecContext<'_>, rng: &mut dyn RngCore) -> Result<Value, String> {
    let lower = ctx
        .schema
        .get("minimum")
        .and_then(|value| match value {
            Value::Date(date) => Some(date.timestamp()),
            _ => None,
        })
        .unwrap_or_else(|| Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap().timestamp());
    let upper = ctx
        .schema
        .get("maximum")
        .and_then(|value| match value {
            Value::Date(date) => Some(date.timestamp()),
            _ => None,
        })
        .unwrap_or(lower + 365 * 24 * 60 * 60);
    let timestamp = if upper > lower {
        rng.gen_range(lower..=upper)
    } else {
        lower
    };
    Ok(Value::Date(
        Utc.timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| "Random date out of range".to_string())?,
    ))
}

#[cfg(test)]
mod tests {
    use super::{DataTypeDefinition, DataTypeRegistry, DefineError, PrimitiveKind};
    use crate::value::{Constructor, Map, Value};
    use std::convert::TryFrom;

    fn passthrough() -> DataTypeDefinition {
        DataTypeDefinition::new(
            |_, value| Ok(value.clone()),
            |_, value| Ok(value.clone()),
            |_, _| Ok(()),
        )
    }

    #[test]
    fn rejects_unknown_primitive() {
        assert!(PrimitiveKind::try_from("file").is_err());
        assert!(PrimitiveKind::try_from("object").is_err());
    }

    #[test]
    fn rejects_empty_format() {
        let registry = DataTypeRegistry::new();
        assert!(matches!(
            registry.define(PrimitiveKind::String, "", Some(passthrough())),
            Err(DefineError::InvalidFormat)
        ));
    }

    #[test]
    fn rejects_duplicates() {
        let registry = DataTypeRegistry::new();
        registry
            .define(PrimitiveKind::String, "custom", Some(passthrough()))
            .unwrap();
        assert!(matches!(
            registry.define(PrimitiveKind::String, "custom", Some(passthrough())),
            Err(DefineError::AlreadyDefined { .. })
        ));
    }

    #[test]
    fn none_definition_deregisters() {
        let registry = DataTypeRegistry::new();
        registry
            .define(PrimitiveKind::String, "custom", Some(passthrough()))
            .unwrap();
        registry.define(PrimitiveKind::String, "custom", None).unwrap();
        assert!(registry.get(PrimitiveKind::String, "custom").is_none());
        // A fresh definition is accepted again.
        registry
            .define(PrimitiveKind::String, "custom", Some(passthrough()))
            .unwrap();
    }

    #[test]
    fn byte_round_trip() {
        let registry = DataTypeRegistry::with_builtins();
        let codec = registry.get(PrimitiveKind::String, "byte").unwrap();
        let schema = Map::new();
        let ctx = super::CodecContext { schema: &schema };
        let decoded = (codec.deserialize)(&ctx, &Value::from("aGVsbG8=")).unwrap();
        assert!(matches!(&decoded, Value::Bytes(bytes) if bytes.as_slice() == b"hello"));
        let encoded = (codec.serialize)(&ctx, &decoded).unwrap();
        assert_eq!(encoded, Value::from("aGVsbG8="));
    }

    #[test]
    fn byte_rejects_invalid_base64() {
        let registry = DataTypeRegistry::with_builtins();
        let codec = registry.get(PrimitiveKind::String, "byte").unwrap();
        let schema = Map::new();
        let ctx = super::CodecContext { schema: &schema };
        assert!((codec.deserialize)(&ctx, &Value::from("not base64!!")).is_err());
    }

    #[test]
    fn date_round_trip() {
        let registry = DataTypeRegistry::with_builtins();
        let codec = registry.get(PrimitiveKind::String, "date").unwrap();
        let schema = Map::new();
        let ctx = super::CodecContext { schema: &schema };
        let date = (codec.deserialize)(&ctx, &Value::from("2000-01-01")).unwrap();
        assert!(matches!(date, Value::Date(_)));
        assert_eq!(
            (codec.serialize)(&ctx, &date).unwrap(),
            Value::from("2000-01-01")
        );
        assert!((codec.deserialize)(&ctx, &Value::from("2000-1-1")).is_err());
    }

    #[test]
    fn date_formats_are_numeric() {
        let registry = DataTypeRegistry::with_builtins();
        assert!(registry.is_numeric(PrimitiveKind::String, Some("date")));
        assert!(registry.is_numeric(PrimitiveKind::Integer, None));
        assert!(!registry.is_numeric(PrimitiveKind::String, Some("password")));
    }

    #[test]
    fn constructor_lookup() {
        let registry = DataTypeRegistry::with_builtins();
        let (kind, _, _) = registry.for_constructor(Constructor::Date).unwrap();
        assert_eq!(kind, PrimitiveKind::String);
    }

    #[test]
    fn standard_formats() {
        let registry = DataTypeRegistry::with_builtins();
        assert!(registry.is_standard(PrimitiveKind::Integer, "int32"));
        assert!(registry.is_standard(PrimitiveKind::String, "date"));
        assert!(!registry.is_standard(PrimitiveKind::String, "gibberish"));
    }
}
