use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::convert::{to_bool, to_datetime, to_f32, to_f64, to_i64, to_string_value};

type ValueSetter<R> = Arc<dyn Fn(&mut R, &Value) + Send + Sync>;
type MapSetter<R> = Arc<dyn Fn(&mut R, &Map<String, Value>) + Send + Sync>;

enum Binding<R> {
    /// Reads one key of the map, coercing the value through the setter.
    Keyed { key: &'static str, set: ValueSetter<R> },
    /// Reads the whole map, for flattened sub-records.
    Whole { set: MapSetter<R> },
}

/// One hydratable field of a record shape.
///
/// The key is the map entry the field reads from; shapes without an
/// explicit mapping conventionally use the field's declared name.
pub struct MapField<R>(Binding<R>);

impl<R: 'static> MapField<R> {
    pub fn string(key: &'static str, set: impl Fn(&mut R, String) + Send + Sync + 'static) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_string_value(value))),
        })
    }

    pub fn i64(key: &'static str, set: impl Fn(&mut R, i64) + Send + Sync + 'static) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_i64(value))),
        })
    }

    pub fn bool(key: &'static str, set: impl Fn(&mut R, bool) + Send + Sync + 'static) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_bool(value))),
        })
    }

    pub fn f32(key: &'static str, set: impl Fn(&mut R, f32) + Send + Sync + 'static) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_f32(value))),
        })
    }

    pub fn f64(key: &'static str, set: impl Fn(&mut R, f64) + Send + Sync + 'static) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_f64(value))),
        })
    }

    /// A timestamp field; `format` is a `chrono` format string, `None`
    /// meaning RFC 3339.
    pub fn datetime(
        key: &'static str,
        format: Option<&'static str>,
        set: impl Fn(&mut R, DateTime<Utc>) + Send + Sync + 'static,
    ) -> Self {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| set(rec, to_datetime(value, format))),
        })
    }

    /// A sub-record hydrated from a nested map under `key`. Non-map values
    /// leave the field at its default.
    pub fn nested<C>(key: &'static str, set: impl Fn(&mut R, C) + Send + Sync + 'static) -> Self
    where
        C: MapRecord + 'static,
    {
        Self(Binding::Keyed {
            key,
            set: Arc::new(move |rec, value| {
                if let Value::Object(sub) = value {
                    set(rec, from_map::<C>(sub));
                }
            }),
        })
    }

    /// A sub-record hydrated from the same map, the anonymous-embedding
    /// form.
    pub fn flatten<C>(set: impl Fn(&mut R, C) + Send + Sync + 'static) -> Self
    where
        C: MapRecord + 'static,
    {
        Self(Binding::Whole {
            set: Arc::new(move |rec, map| set(rec, from_map::<C>(map))),
        })
    }
}

/// A record shape hydratable from a string-keyed map.
pub trait MapRecord: Default {
    fn map_fields() -> Vec<MapField<Self>>
    where
        Self: Sized;
}

/// Build a record from a map, best-effort: missing keys and unconvertible
/// values leave fields at their defaults.
pub fn from_map<R: MapRecord>(map: &Map<String, Value>) -> R {
    let mut rec = R::default();
    for field in R::map_fields() {
        match field.0 {
            Binding::Keyed { key, set } => {
                if let Some(value) = map.get(key) {
                    set(&mut rec, value);
                }
            }
            Binding::Whole { set } => set(&mut rec, map),
        }
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default, Debug, PartialEq)]
    struct Tags {
        env: String,
    }

    impl MapRecord for Tags {
        fn map_fields() -> Vec<MapField<Self>> {
            vec![MapField::string("env", |rec: &mut Self, v| rec.env = v)]
        }
    }

    #[derive(Default, Debug, PartialEq)]
    struct Event {
        name: String,
        count: i64,
        ratio: f64,
        active: bool,
        tags: Tags,
        meta: Tags,
        at: DateTime<Utc>,
    }

    impl MapRecord for Event {
        fn map_fields() -> Vec<MapField<Self>> {
            vec![
                MapField::string("name", |rec: &mut Self, v| rec.name = v),
                MapField::i64("count", |rec: &mut Self, v| rec.count = v),
                MapField::f64("ratio", |rec: &mut Self, v| rec.ratio = v),
                MapField::bool("active", |rec: &mut Self, v| rec.active = v),
                MapField::nested("tags", |rec: &mut Self, v| rec.tags = v),
                MapField::flatten(|rec: &mut Self, v| rec.meta = v),
                MapField::datetime("at", None, |rec: &mut Self, v| rec.at = v),
            ]
        }
    }

    #[test]
    fn hydrates_with_coercions_nesting_and_flattening() {
        let map = json!({
            "name": "deploy",
            "count": "1,204",
            "ratio": "0.5",
            "active": 1,
            "tags": {"env": "prod"},
            "env": "embedded",
            "at": "2017-03-01T10:00:00Z",
        });
        let Value::Object(map) = map else { unreachable!() };

        let event: Event = from_map(&map);
        assert_eq!(event.name, "deploy");
        assert_eq!(event.count, 1204);
        assert_eq!(event.ratio, 0.5);
        assert!(event.active);
        assert_eq!(event.tags, Tags { env: "prod".into() });
        assert_eq!(event.meta, Tags { env: "embedded".into() });
        assert_eq!(event.at.timestamp(), 1_488_362_400);
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let Value::Object(map) = json!({"count": 3}) else {
            unreachable!()
        };
        let event: Event = from_map(&map);
        assert_eq!(event.count, 3);
        assert_eq!(event.name, "");
        assert!(!event.active);
    }
}
