//! The CII state record: content identification and companion endpoint URLs
//! pushed from the television to the companion.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{WireError, WireResult};
use crate::transformers::{
    decode_list_of, decode_private, decode_uri, encode_private,
};

/// Names of every CII field, in wire order.
pub const CII_FIELD_NAMES: [&str; 10] = [
    "protocolVersion",
    "mrsUrl",
    "contentId",
    "contentIdStatus",
    "presentationStatus",
    "wcUrl",
    "tsUrl",
    "teUrl",
    "timelines",
    "private",
];

/// A CII field distinguishes three states: absent from the message, present
/// as JSON `null`, or present with a value.
///
/// An absent field means "no statement"; a diff leaves it untouched. A null
/// field is an explicit statement that the value is cleared.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field<T> {
    #[default]
    Omit,
    Null,
    Value(T),
}

impl<T> Field<T> {
    pub fn is_omit(&self) -> bool {
        matches!(self, Field::Omit)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Value(value)
    }
}

/// Whether a content identifier is still partial or already final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentIdStatus {
    Partial,
    Final,
}

impl ContentIdStatus {
    fn decode(value: &Value) -> WireResult<Self> {
        match value.as_str() {
            Some("partial") => Ok(Self::Partial),
            Some("final") => Ok(Self::Final),
            _ => Err(WireError::malformed(
                "contentIdStatus",
                format!("{value} is not \"partial\" or \"final\""),
            )),
        }
    }
}

impl fmt::Display for ContentIdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Partial => "partial",
            Self::Final => "final",
        })
    }
}

/// One timeline a television offers for synchronisation: a selector plus the
/// tick rate (`units_per_second / units_per_tick` ticks per second) that
/// selector will resolve to at the TS endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineOption {
    pub timeline_selector: String,
    pub units_per_tick: u64,
    pub units_per_second: u64,
    /// Accuracy of the timeline relative to the content, in seconds.
    pub accuracy: Option<f64>,
    pub private: Option<Vec<Map<String, Value>>>,
}

impl TimelineOption {
    pub fn new(timeline_selector: impl Into<String>, units_per_tick: u64, units_per_second: u64) -> Self {
        Self {
            timeline_selector: timeline_selector.into(),
            units_per_tick,
            units_per_second,
            accuracy: None,
            private: None,
        }
    }

    pub fn encode(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("unitsPerTick".into(), self.units_per_tick.into());
        properties.insert("unitsPerSecond".into(), self.units_per_second.into());
        if let Some(accuracy) = self.accuracy {
            properties.insert("accuracy".into(), accuracy.into());
        }
        let mut object = Map::new();
        object.insert(
            "timelineSelector".into(),
            Value::String(self.timeline_selector.clone()),
        );
        object.insert("timelineProperties".into(), Value::Object(properties));
        if let Some(private) = &self.private {
            object.insert("private".into(), encode_private(private));
        }
        Value::Object(object)
    }

    pub fn decode(value: &Value) -> WireResult<Self> {
        let context = "timeline option";
        let object = value
            .as_object()
            .ok_or_else(|| WireError::malformed(context, "expected an object"))?;
        let selector = object
            .get("timelineSelector")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::malformed(context, "missing timelineSelector"))?;
        let properties = object
            .get("timelineProperties")
            .and_then(Value::as_object)
            .ok_or_else(|| WireError::malformed(context, "missing timelineProperties"))?;
        let units_per_tick = properties
            .get("unitsPerTick")
            .and_then(Value::as_u64)
            .ok_or_else(|| WireError::malformed(context, "missing unitsPerTick"))?;
        let units_per_second = properties
            .get("unitsPerSecond")
            .and_then(Value::as_u64)
            .ok_or_else(|| WireError::malformed(context, "missing unitsPerSecond"))?;
        let accuracy = match properties.get("accuracy") {
            Some(v) => Some(v.as_f64().ok_or_else(|| {
                WireError::malformed(context, "accuracy is not a number")
            })?),
            None => None,
        };
        let private = match object.get("private") {
            Some(v) => Some(decode_private(v, context)?),
            None => None,
        };
        Ok(Self {
            timeline_selector: selector.to_string(),
            units_per_tick,
            units_per_second,
            accuracy,
            private,
        })
    }

    /// Ticks per second described by this option.
    pub fn tick_rate(&self) -> f64 {
        self.units_per_second as f64 / self.units_per_tick as f64
    }
}

/// The CII state object.
///
/// Every field is tri-state ([`Field`]); equality, diff and combine operate
/// field-wise.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cii {
    /// Protocol version; `"1.1"` is the only value this implementation
    /// speaks.
    pub protocol_version: Field<String>,
    /// URL of a material resolution service known to the server.
    pub mrs_url: Field<String>,
    /// Content identifier URI.
    pub content_id: Field<String>,
    pub content_id_status: Field<ContentIdStatus>,
    /// Presentation status tokens; the first is `okay`, `transitioning`,
    /// `fault` or a URI, and further tokens qualify it.
    pub presentation_status: Field<Vec<String>>,
    /// Wall clock endpoint, as a `udp://host:port` URL.
    pub wc_url: Field<String>,
    /// Timeline synchronization WebSocket endpoint URL.
    pub ts_url: Field<String>,
    /// Trigger event WebSocket endpoint URL.
    pub te_url: Field<String>,
    pub timelines: Field<Vec<TimelineOption>>,
    pub private: Field<Vec<Map<String, Value>>>,
}

macro_rules! for_each_cii_field {
    ($macro:ident) => {
        $macro!(protocol_version, "protocolVersion");
        $macro!(mrs_url, "mrsUrl");
        $macro!(content_id, "contentId");
        $macro!(content_id_status, "contentIdStatus");
        $macro!(presentation_status, "presentationStatus");
        $macro!(wc_url, "wcUrl");
        $macro!(ts_url, "tsUrl");
        $macro!(te_url, "teUrl");
        $macro!(timelines, "timelines");
        $macro!(private, "private");
    };
}

impl Cii {
    /// Serialize to the JSON wire form. Omitted fields do not appear.
    pub fn pack(&self) -> String {
        self.encode().to_string()
    }

    pub fn encode(&self) -> Value {
        let mut object = Map::new();
        macro_rules! put {
            ($field:ident, $name:expr) => {
                match &self.$field {
                    Field::Omit => {}
                    Field::Null => {
                        object.insert($name.into(), Value::Null);
                    }
                    Field::Value(v) => {
                        object.insert($name.into(), v.encode_cii());
                    }
                }
            };
        }
        put!(protocol_version, "protocolVersion");
        put!(mrs_url, "mrsUrl");
        put!(content_id, "contentId");
        put!(content_id_status, "contentIdStatus");
        put!(presentation_status, "presentationStatus");
        put!(wc_url, "wcUrl");
        put!(ts_url, "tsUrl");
        put!(te_url, "teUrl");
        put!(timelines, "timelines");
        put!(private, "private");
        Value::Object(object)
    }

    /// Parse and validate a received CII message.
    pub fn unpack(message: &str) -> WireResult<Self> {
        let value: Value = serde_json::from_str(message)?;
        Self::decode(&value)
    }

    pub fn decode(value: &Value) -> WireResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| WireError::malformed("CII message", "expected an object"))?;
        let mut cii = Cii::default();

        if let Some(v) = object.get("protocolVersion") {
            cii.protocol_version = decode_field(v, |v| {
                match v.as_str() {
                    Some("1.1") => Ok("1.1".to_string()),
                    _ => Err(WireError::malformed(
                        "protocolVersion",
                        format!("unsupported version {v}"),
                    )),
                }
            })?;
        }
        if let Some(v) = object.get("mrsUrl") {
            cii.mrs_url = decode_field(v, |v| decode_uri(v, "mrsUrl"))?;
        }
        if let Some(v) = object.get("contentId") {
            cii.content_id = decode_field(v, |v| decode_uri(v, "contentId"))?;
        }
        if let Some(v) = object.get("contentIdStatus") {
            cii.content_id_status = decode_field(v, ContentIdStatus::decode)?;
        }
        if let Some(v) = object.get("presentationStatus") {
            cii.presentation_status = decode_field(v, decode_presentation_status)?;
        }
        if let Some(v) = object.get("wcUrl") {
            cii.wc_url = decode_field(v, |v| decode_uri(v, "wcUrl"))?;
        }
        if let Some(v) = object.get("tsUrl") {
            cii.ts_url = decode_field(v, |v| decode_uri(v, "tsUrl"))?;
        }
        if let Some(v) = object.get("teUrl") {
            cii.te_url = decode_field(v, |v| decode_uri(v, "teUrl"))?;
        }
        if let Some(v) = object.get("timelines") {
            cii.timelines =
                decode_field(v, |v| decode_list_of(v, "timelines", TimelineOption::decode))?;
        }
        if let Some(v) = object.get("private") {
            cii.private = decode_field(v, |v| decode_private(v, "private"))?;
        }
        Ok(cii)
    }

    /// The fields of `new` that differ from `old`. Fields omitted in `new`
    /// never appear in the diff.
    pub fn diff(old: &Cii, new: &Cii) -> Cii {
        let mut changes = Cii::default();
        macro_rules! diff_field {
            ($field:ident, $name:expr) => {
                if !new.$field.is_omit() && new.$field != old.$field {
                    changes.$field = new.$field.clone();
                }
            };
        }
        for_each_cii_field!(diff_field);
        changes
    }

    /// Overwrite this record's fields with every non-omitted field of
    /// `diff`.
    pub fn update(&mut self, diff: &Cii) {
        macro_rules! update_field {
            ($field:ident, $name:expr) => {
                if !diff.$field.is_omit() {
                    self.$field = diff.$field.clone();
                }
            };
        }
        for_each_cii_field!(update_field);
    }

    /// A copy of this record updated with `diff`.
    pub fn combine(&self, diff: &Cii) -> Cii {
        let mut merged = self.clone();
        merged.update(diff);
        merged
    }

    /// Names of the fields that are not omitted.
    pub fn defined_fields(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        macro_rules! collect_field {
            ($field:ident, $name:expr) => {
                if !self.$field.is_omit() {
                    names.push($name);
                }
            };
        }
        for_each_cii_field!(collect_field);
        names
    }

    /// Whether every field is omitted.
    pub fn is_empty(&self) -> bool {
        self.defined_fields().is_empty()
    }
}

fn decode_field<T>(
    value: &Value,
    decode: impl FnOnce(&Value) -> WireResult<T>,
) -> WireResult<Field<T>> {
    if value.is_null() {
        Ok(Field::Null)
    } else {
        Ok(Field::Value(decode(value)?))
    }
}

/// `presentationStatus` travels as one space-separated string but is exposed
/// as a token list.
fn decode_presentation_status(value: &Value) -> WireResult<Vec<String>> {
    let context = "presentationStatus";
    let s = value
        .as_str()
        .ok_or_else(|| WireError::malformed(context, "expected a string"))?;
    let tokens: Vec<String> = s.split(' ').map(str::to_string).collect();
    let valid = match tokens.first().map(String::as_str) {
        None | Some("") => false,
        Some("okay" | "transitioning" | "fault") => true,
        Some(other) => !other.contains(char::is_whitespace),
    };
    if !valid || tokens.iter().any(String::is_empty) {
        return Err(WireError::malformed(
            context,
            format!("format not recognised: {s:?}"),
        ));
    }
    Ok(tokens)
}

trait EncodeCiiValue {
    fn encode_cii(&self) -> Value;
}

impl EncodeCiiValue for String {
    fn encode_cii(&self) -> Value {
        Value::String(self.clone())
    }
}

impl EncodeCiiValue for ContentIdStatus {
    fn encode_cii(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl EncodeCiiValue for Vec<String> {
    /// Token list → space-separated string.
    fn encode_cii(&self) -> Value {
        Value::String(self.join(" "))
    }
}

impl EncodeCiiValue for Vec<TimelineOption> {
    fn encode_cii(&self) -> Value {
        Value::Array(self.iter().map(TimelineOption::encode).collect())
    }
}

impl EncodeCiiValue for Vec<Map<String, Value>> {
    fn encode_cii(&self) -> Value {
        encode_private(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Cii {
        Cii {
            protocol_version: Field::Value("1.1".into()),
            content_id: Field::Value("dvb://1234.5678.01ab".into()),
            content_id_status: Field::Value(ContentIdStatus::Partial),
            presentation_status: Field::Value(vec!["okay".into()]),
            wc_url: Field::Value("udp://192.168.1.5:6677".into()),
            ts_url: Field::Value("ws://192.168.1.5:7681/ts".into()),
            timelines: Field::Value(vec![TimelineOption::new(
                "urn:dvb:css:timeline:pts",
                1,
                90000,
            )]),
            ..Cii::default()
        }
    }

    #[test]
    fn pack_then_unpack_preserves_defined_fields() {
        let cii = sample();
        let back = Cii::unpack(&cii.pack()).unwrap();
        assert_eq!(back, cii);
    }

    #[test]
    fn omitted_fields_are_absent_from_the_wire_form() {
        let cii = Cii {
            content_id: Field::Value("dvb://1".into()),
            ..Cii::default()
        };
        let encoded = cii.encode();
        let object = encoded.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert!(object.contains_key("contentId"));
    }

    #[test]
    fn null_fields_survive_the_wire() {
        let cii = Cii {
            mrs_url: Field::Null,
            ..Cii::default()
        };
        let back = Cii::unpack(&cii.pack()).unwrap();
        assert_eq!(back.mrs_url, Field::Null);
        assert!(back.content_id.is_omit());
    }

    #[test]
    fn presentation_status_is_a_token_list_on_the_wire_edge() {
        let message = json!({"presentationStatus": "okay trickmode"}).to_string();
        let cii = Cii::unpack(&message).unwrap();
        assert_eq!(
            cii.presentation_status,
            Field::Value(vec!["okay".to_string(), "trickmode".to_string()])
        );

        let packed = cii.pack();
        assert!(packed.contains("\"okay trickmode\""));

        assert!(Cii::unpack(&json!({"presentationStatus": ""}).to_string()).is_err());
        assert!(Cii::unpack(&json!({"presentationStatus": "okay  x"}).to_string()).is_err());
    }

    #[test]
    fn unsupported_protocol_version_is_rejected() {
        let message = json!({"protocolVersion": "9.9"}).to_string();
        assert!(Cii::unpack(&message).is_err());
    }

    #[test]
    fn timeline_options_roundtrip_with_nested_properties() {
        let mut option = TimelineOption::new("urn:dvb:css:timeline:temi:1:1", 1, 1000);
        option.accuracy = Some(0.02);
        let decoded = TimelineOption::decode(&option.encode()).unwrap();
        assert_eq!(decoded, option);
        assert_eq!(decoded.tick_rate(), 1000.0);

        // The wire shape nests the rate under timelineProperties.
        let encoded = option.encode();
        assert!(encoded["timelineProperties"]["unitsPerSecond"].is_u64());
    }

    #[test]
    fn diff_reports_changed_fields_only() {
        let old = sample();
        let mut new = sample();
        new.content_id = Field::Value("dvb://9999".into());

        let diff = Cii::diff(&old, &new);
        assert_eq!(diff.defined_fields(), vec!["contentId"]);
    }

    #[test]
    fn diff_treats_omit_in_new_as_no_statement() {
        let old = sample();
        let new = Cii::default();
        assert!(Cii::diff(&old, &new).is_empty());
    }

    #[test]
    fn combine_applies_a_diff() {
        let old = sample();
        let mut new = sample();
        new.content_id = Field::Value("dvb://9999".into());
        new.content_id_status = Field::Value(ContentIdStatus::Final);

        let diff = Cii::diff(&old, &new);
        let merged = old.combine(&diff);
        assert_eq!(merged, new);
    }

    fn arbitrary_field() -> impl Strategy<Value = Field<String>> {
        prop_oneof![
            Just(Field::Omit),
            Just(Field::Null),
            "[a-z]{1,8}".prop_map(Field::Value),
        ]
    }

    proptest! {
        /// old.combine(diff(old, new)) agrees with new on every field that
        /// new defines.
        #[test]
        fn combine_diff_restores_new(
            old_id in arbitrary_field(),
            new_id in arbitrary_field(),
            old_ts in arbitrary_field(),
            new_ts in arbitrary_field(),
        ) {
            let old = Cii { content_id: old_id, ts_url: old_ts, ..Cii::default() };
            let new = Cii { content_id: new_id.clone(), ts_url: new_ts.clone(), ..Cii::default() };
            let merged = old.combine(&Cii::diff(&old, &new));

            if !new_id.is_omit() {
                prop_assert_eq!(&merged.content_id, &new_id);
            }
            if !new_ts.is_omit() {
                prop_assert_eq!(&merged.ts_url, &new_ts);
            }
        }
    }
}
