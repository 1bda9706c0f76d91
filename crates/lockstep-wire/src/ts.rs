//! Timeline synchronization messages: SetupData, Control Timestamp and the
//! actual/earliest/latest presentation timestamp.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde_json::{Map, Value};

use crate::error::{WireError, WireResult};
use crate::transformers::{decode_int_string, decode_private, encode_int_string, encode_private};

/// The first client→server message on a TS connection: which timeline of
/// which content the client wants to synchronise to.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupData {
    /// Left-hand stem of a content identifier; the timeline is available
    /// while the server's content id starts with this stem.
    pub content_id_stem: String,
    pub timeline_selector: String,
    pub private: Option<Vec<Map<String, Value>>>,
}

impl SetupData {
    pub fn new(content_id_stem: impl Into<String>, timeline_selector: impl Into<String>) -> Self {
        Self {
            content_id_stem: content_id_stem.into(),
            timeline_selector: timeline_selector.into(),
            private: None,
        }
    }

    pub fn pack(&self) -> String {
        let mut object = Map::new();
        object.insert(
            "contentIdStem".into(),
            Value::String(self.content_id_stem.clone()),
        );
        object.insert(
            "timelineSelector".into(),
            Value::String(self.timeline_selector.clone()),
        );
        if let Some(private) = &self.private {
            object.insert("private".into(), encode_private(private));
        }
        Value::Object(object).to_string()
    }

    pub fn unpack(message: &str) -> WireResult<Self> {
        let context = "SetupData message";
        let value: Value = serde_json::from_str(message)?;
        let object = value
            .as_object()
            .ok_or_else(|| WireError::malformed(context, "expected an object"))?;
        let content_id_stem = object
            .get("contentIdStem")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::malformed(context, "missing contentIdStem"))?;
        let timeline_selector = object
            .get("timelineSelector")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::malformed(context, "missing timelineSelector"))?;
        let private = match object.get("private") {
            Some(v) => Some(decode_private(v, context)?),
            None => None,
        };
        Ok(Self {
            content_id_stem: content_id_stem.to_string(),
            timeline_selector: timeline_selector.to_string(),
            private,
        })
    }
}

/// A wall-clock time value: an arbitrary-precision tick count, or one of
/// the open-ended limits used by presentation timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum WallClockTime {
    MinusInfinity,
    Ticks(BigInt),
    PlusInfinity,
}

impl WallClockTime {
    pub fn ticks(value: impl Into<BigInt>) -> Self {
        Self::Ticks(value.into())
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Self::Ticks(_))
    }

    /// Lossy conversion for feeding clock arithmetic.
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::MinusInfinity => f64::NEG_INFINITY,
            Self::Ticks(t) => t.to_f64().unwrap_or(f64::NAN),
            Self::PlusInfinity => f64::INFINITY,
        }
    }

    fn encode(&self, allow: Infinities, context: &'static str) -> WireResult<Value> {
        match self {
            Self::Ticks(t) => Ok(encode_int_string(t)),
            Self::MinusInfinity if allow == Infinities::Minus => {
                Ok(Value::String("minusinfinity".into()))
            }
            Self::PlusInfinity if allow == Infinities::Plus => {
                Ok(Value::String("plusinfinity".into()))
            }
            other => Err(WireError::malformed(
                context,
                format!("{other:?} not permitted here"),
            )),
        }
    }

    fn decode(value: &Value, allow: Infinities, context: &'static str) -> WireResult<Self> {
        match (value.as_str(), allow) {
            (Some("minusinfinity"), Infinities::Minus) => Ok(Self::MinusInfinity),
            (Some("plusinfinity"), Infinities::Plus) => Ok(Self::PlusInfinity),
            _ => Ok(Self::Ticks(decode_int_string(value, context)?)),
        }
    }
}

impl From<BigInt> for WallClockTime {
    fn from(value: BigInt) -> Self {
        Self::Ticks(value)
    }
}

impl From<i64> for WallClockTime {
    fn from(value: i64) -> Self {
        Self::Ticks(value.into())
    }
}

/// Which infinity, if any, a wall-clock time slot admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infinities {
    None,
    Minus,
    Plus,
}

/// A `(content time, wall-clock time)` pair.
///
/// A null content time (only meaningful inside a Control Timestamp) means
/// the timeline is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamp {
    pub content_time: Option<BigInt>,
    pub wall_clock_time: WallClockTime,
}

impl Timestamp {
    pub fn new(content_time: impl Into<BigInt>, wall_clock_time: impl Into<WallClockTime>) -> Self {
        Self {
            content_time: Some(content_time.into()),
            wall_clock_time: wall_clock_time.into(),
        }
    }
}

/// Server→client message establishing `(contentTime, wallClockTime, speed)`
/// for the selected timeline.
///
/// `content_time` and `timeline_speed_multiplier` are either both present or
/// both null; both null signals that the timeline is unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTimestamp {
    pub timestamp: Timestamp,
    pub timeline_speed_multiplier: Option<f64>,
}

impl ControlTimestamp {
    pub fn new(content_time: impl Into<BigInt>, wall_clock_time: impl Into<BigInt>, speed: f64) -> Self {
        Self {
            timestamp: Timestamp {
                content_time: Some(content_time.into()),
                wall_clock_time: WallClockTime::Ticks(wall_clock_time.into()),
            },
            timeline_speed_multiplier: Some(speed),
        }
    }

    /// The "timeline unavailable" form: null content time and speed, with
    /// the wall-clock time of the statement.
    pub fn unavailable(wall_clock_time: impl Into<BigInt>) -> Self {
        Self {
            timestamp: Timestamp {
                content_time: None,
                wall_clock_time: WallClockTime::Ticks(wall_clock_time.into()),
            },
            timeline_speed_multiplier: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.timestamp.content_time.is_some()
    }

    pub fn pack(&self) -> WireResult<String> {
        let context = "ControlTimestamp message";
        let mut object = Map::new();
        object.insert(
            "contentTime".into(),
            match &self.timestamp.content_time {
                Some(t) => encode_int_string(t),
                None => Value::Null,
            },
        );
        object.insert(
            "wallClockTime".into(),
            self.timestamp
                .wall_clock_time
                .encode(Infinities::None, context)?,
        );
        object.insert(
            "timelineSpeedMultiplier".into(),
            match self.timeline_speed_multiplier {
                Some(speed) => speed.into(),
                None => Value::Null,
            },
        );
        Ok(Value::Object(object).to_string())
    }

    pub fn unpack(message: &str) -> WireResult<Self> {
        let context = "ControlTimestamp message";
        let value: Value = serde_json::from_str(message)?;
        let object = value
            .as_object()
            .ok_or_else(|| WireError::malformed(context, "expected an object"))?;

        let content_time_value = object
            .get("contentTime")
            .ok_or_else(|| WireError::malformed(context, "missing contentTime"))?;
        let content_time = if content_time_value.is_null() {
            None
        } else {
            Some(decode_int_string(content_time_value, "contentTime")?)
        };

        let wall_clock_time = WallClockTime::decode(
            object
                .get("wallClockTime")
                .ok_or_else(|| WireError::malformed(context, "missing wallClockTime"))?,
            Infinities::None,
            "wallClockTime",
        )?;

        let speed_value = object
            .get("timelineSpeedMultiplier")
            .ok_or_else(|| WireError::malformed(context, "missing timelineSpeedMultiplier"))?;
        let timeline_speed_multiplier = if speed_value.is_null() {
            None
        } else {
            Some(speed_value.as_f64().ok_or_else(|| {
                WireError::malformed(context, "timelineSpeedMultiplier is not a number")
            })?)
        };

        if content_time.is_none() != timeline_speed_multiplier.is_none() {
            return Err(WireError::malformed(
                context,
                "contentTime and timelineSpeedMultiplier must be null together",
            ));
        }

        Ok(Self {
            timestamp: Timestamp {
                content_time,
                wall_clock_time,
            },
            timeline_speed_multiplier,
        })
    }
}

/// Client→server statement of the actual, earliest achievable and latest
/// achievable presentation timings.
///
/// The earliest wall-clock time may be −∞ ("no earlier bound") and the
/// latest may be +∞; never the other way around.
#[derive(Debug, Clone, PartialEq)]
pub struct AptEptLpt {
    pub actual: Option<Timestamp>,
    pub earliest: Timestamp,
    pub latest: Timestamp,
}

impl Default for AptEptLpt {
    fn default() -> Self {
        Self {
            actual: None,
            earliest: Timestamp {
                content_time: Some(BigInt::from(0)),
                wall_clock_time: WallClockTime::MinusInfinity,
            },
            latest: Timestamp {
                content_time: Some(BigInt::from(0)),
                wall_clock_time: WallClockTime::PlusInfinity,
            },
        }
    }
}

impl AptEptLpt {
    pub fn pack(&self) -> WireResult<String> {
        let mut object = Map::new();
        if let Some(actual) = &self.actual {
            object.insert(
                "actual".into(),
                encode_ts_part(actual, Infinities::None, "actual timestamp")?,
            );
        }
        object.insert(
            "earliest".into(),
            encode_ts_part(&self.earliest, Infinities::Minus, "earliest timestamp")?,
        );
        object.insert(
            "latest".into(),
            encode_ts_part(&self.latest, Infinities::Plus, "latest timestamp")?,
        );
        Ok(Value::Object(object).to_string())
    }

    pub fn unpack(message: &str) -> WireResult<Self> {
        let context = "AptEptLpt message";
        let value: Value = serde_json::from_str(message)?;
        let object = value
            .as_object()
            .ok_or_else(|| WireError::malformed(context, "expected an object"))?;

        let actual = match object.get("actual") {
            Some(v) => Some(decode_ts_part(v, Infinities::None, "actual timestamp")?),
            None => None,
        };
        let earliest = decode_ts_part(
            object
                .get("earliest")
                .ok_or_else(|| WireError::malformed(context, "missing earliest"))?,
            Infinities::Minus,
            "earliest timestamp",
        )?;
        let latest = decode_ts_part(
            object
                .get("latest")
                .ok_or_else(|| WireError::malformed(context, "missing latest"))?,
            Infinities::Plus,
            "latest timestamp",
        )?;
        Ok(Self {
            actual,
            earliest,
            latest,
        })
    }
}

fn encode_ts_part(
    timestamp: &Timestamp,
    allow: Infinities,
    context: &'static str,
) -> WireResult<Value> {
    let content_time = timestamp
        .content_time
        .as_ref()
        .ok_or_else(|| WireError::malformed(context, "contentTime must not be null"))?;
    let mut object = Map::new();
    object.insert("contentTime".into(), encode_int_string(content_time));
    object.insert(
        "wallClockTime".into(),
        timestamp.wall_clock_time.encode(allow, context)?,
    );
    Ok(Value::Object(object))
}

fn decode_ts_part(
    value: &Value,
    allow: Infinities,
    context: &'static str,
) -> WireResult<Timestamp> {
    let object = value
        .as_object()
        .ok_or_else(|| WireError::malformed(context, "expected an object"))?;
    let content_time = decode_int_string(
        object
            .get("contentTime")
            .ok_or_else(|| WireError::malformed(context, "missing contentTime"))?,
        context,
    )?;
    let wall_clock_time = WallClockTime::decode(
        object
            .get("wallClockTime")
            .ok_or_else(|| WireError::malformed(context, "missing wallClockTime"))?,
        allow,
        context,
    )?;
    Ok(Timestamp {
        content_time: Some(content_time),
        wall_clock_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_data_roundtrip() {
        let setup = SetupData::new("dvb://1004", "urn:dvb:css:timeline:pts");
        let back = SetupData::unpack(&setup.pack()).unwrap();
        assert_eq!(back, setup);

        // An empty stem matches all content ids and is legal.
        let all = SetupData::new("", "urn:dvb:css:timeline:temi:1:1");
        assert_eq!(SetupData::unpack(&all.pack()).unwrap(), all);
    }

    #[test]
    fn setup_data_requires_both_fields() {
        assert!(SetupData::unpack(r#"{"timelineSelector":"x"}"#).is_err());
        assert!(SetupData::unpack(r#"{"contentIdStem":"x"}"#).is_err());
        assert!(SetupData::unpack("[1,2]").is_err());
    }

    #[test]
    fn control_timestamp_roundtrip() {
        let ct = ControlTimestamp::new(12345, 900_028_432i64, 1.0);
        let packed = ct.pack().unwrap();
        let value: Value = serde_json::from_str(&packed).unwrap();
        assert_eq!(value["contentTime"], json!("12345"));
        assert_eq!(value["wallClockTime"], json!("900028432"));
        assert_eq!(value["timelineSpeedMultiplier"], json!(1.0));
        assert_eq!(ControlTimestamp::unpack(&packed).unwrap(), ct);
    }

    #[test]
    fn control_timestamp_preserves_arbitrary_precision() {
        let message = r#"{
            "contentTime": "123456789012345678901234567890",
            "wallClockTime": "348957623498576",
            "timelineSpeedMultiplier": 2.0
        }"#;
        let ct = ControlTimestamp::unpack(message).unwrap();
        assert_eq!(
            ct.timestamp.content_time.as_ref().unwrap().to_string(),
            "123456789012345678901234567890"
        );
    }

    #[test]
    fn control_timestamp_null_fields_must_pair() {
        let ct = ControlTimestamp::unavailable(123_456i64);
        let packed = ct.pack().unwrap();
        let back = ControlTimestamp::unpack(&packed).unwrap();
        assert!(!back.is_available());
        assert_eq!(back.timeline_speed_multiplier, None);

        let only_content_null = r#"{
            "contentTime": null,
            "wallClockTime": "1",
            "timelineSpeedMultiplier": 1.0
        }"#;
        assert!(ControlTimestamp::unpack(only_content_null).is_err());

        let only_speed_null = r#"{
            "contentTime": "1",
            "wallClockTime": "1",
            "timelineSpeedMultiplier": null
        }"#;
        assert!(ControlTimestamp::unpack(only_speed_null).is_err());
    }

    #[test]
    fn control_timestamp_wall_clock_time_must_be_finite() {
        let ct = ControlTimestamp {
            timestamp: Timestamp {
                content_time: Some(BigInt::from(1)),
                wall_clock_time: WallClockTime::PlusInfinity,
            },
            timeline_speed_multiplier: Some(1.0),
        };
        assert!(ct.pack().is_err());
        assert!(ControlTimestamp::unpack(
            r#"{"contentTime":"1","wallClockTime":"plusinfinity","timelineSpeedMultiplier":1.0}"#
        )
        .is_err());
    }

    #[test]
    fn apt_ept_lpt_defaults_are_unbounded() {
        let ael = AptEptLpt::default();
        let packed = ael.pack().unwrap();
        let value: Value = serde_json::from_str(&packed).unwrap();
        assert_eq!(value["earliest"]["wallClockTime"], json!("minusinfinity"));
        assert_eq!(value["latest"]["wallClockTime"], json!("plusinfinity"));
        assert!(value.get("actual").is_none());

        assert_eq!(AptEptLpt::unpack(&packed).unwrap(), ael);
    }

    #[test]
    fn apt_ept_lpt_rejects_inverted_infinities() {
        let inverted_earliest = AptEptLpt {
            earliest: Timestamp {
                content_time: Some(BigInt::from(0)),
                wall_clock_time: WallClockTime::PlusInfinity,
            },
            ..AptEptLpt::default()
        };
        assert!(inverted_earliest.pack().is_err());

        let inverted_latest = AptEptLpt {
            latest: Timestamp {
                content_time: Some(BigInt::from(0)),
                wall_clock_time: WallClockTime::MinusInfinity,
            },
            ..AptEptLpt::default()
        };
        assert!(inverted_latest.pack().is_err());

        let message = r#"{
            "earliest": {"contentTime": "0", "wallClockTime": "plusinfinity"},
            "latest": {"contentTime": "0", "wallClockTime": "plusinfinity"}
        }"#;
        assert!(AptEptLpt::unpack(message).is_err());
    }

    #[test]
    fn apt_ept_lpt_actual_must_be_finite() {
        let ael = AptEptLpt {
            actual: Some(Timestamp {
                content_time: Some(BigInt::from(5)),
                wall_clock_time: WallClockTime::PlusInfinity,
            }),
            ..AptEptLpt::default()
        };
        assert!(ael.pack().is_err());

        let good = AptEptLpt {
            actual: Some(Timestamp::new(1005, 10_947_820i64)),
            earliest: Timestamp::new(1000, 10_059_237i64),
            latest: Timestamp::new(1000, 19_284_782i64),
        };
        let back = AptEptLpt::unpack(&good.pack().unwrap()).unwrap();
        assert_eq!(back, good);
    }
}
