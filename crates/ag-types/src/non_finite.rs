//! Serde adapter for scores that may be infinite or NaN.
//!
//! Worst-score sentinels are infinite for unbounded metrics and JSON has no
//! literal for them, so non-finite values are written as the strings `"inf"`,
//! `"-inf"` and `"NaN"`. Use with `#[serde(with = "ag_types::non_finite")]`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Text(String),
}

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Number(value) => Ok(value),
        Repr::Text(text) => match text.as_str() {
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "NaN" => Ok(f64::NAN),
            other => Err(D::Error::custom(format!("expected a number, got {other:?}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Scored {
        #[serde(with = "crate::non_finite")]
        score: f64,
    }

    fn round_trip(score: f64) -> f64 {
        let json = serde_json::to_string(&Scored { score }).unwrap();
        serde_json::from_str::<Scored>(&json).unwrap().score
    }

    #[test]
    fn infinities_survive_json() {
        assert_eq!(round_trip(f64::INFINITY), f64::INFINITY);
        assert_eq!(round_trip(f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!(round_trip(f64::NAN).is_nan());
        assert_eq!(round_trip(0.8125), 0.8125);
    }

    #[test]
    fn finite_values_stay_plain_numbers() {
        let json = serde_json::to_string(&Scored { score: 1.5 }).unwrap();
        assert_eq!(json, r#"{"score":1.5}"#);
        assert!(serde_json::from_str::<Scored>(r#"{"score":"huge"}"#).is_err());
    }
}
