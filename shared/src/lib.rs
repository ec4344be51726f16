use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Output class of the binary classifier.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub filename: String,
    pub label: Label,
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub weights_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn label_uses_uppercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&Label::Fake).unwrap(), "\"FAKE\"");
        assert_eq!(Label::Real.to_string(), "REAL");
        assert_eq!(Label::from_str("FAKE").unwrap(), Label::Fake);
    }

    #[test]
    fn prediction_response_field_names() {
        let resp = PredictionResponse {
            filename: "abc.png".into(),
            label: Label::Real,
            confidence: 0.75,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["filename"], "abc.png");
        assert_eq!(value["label"], "REAL");
        assert_eq!(value["confidence"], 0.75);
    }
}
