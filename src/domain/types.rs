use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Seven-digit IBGE municipality code (e.g. `3550308` for São Paulo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MunicipalityCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid IBGE municipality code '{0}': expected exactly 7 digits")]
pub struct InvalidMunicipalityCode(pub String);

impl MunicipalityCode {
    pub fn new(code: impl Into<String>) -> Result<Self, InvalidMunicipalityCode> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.len() == 7 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidMunicipalityCode(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit state (UF) prefix of the code.
    pub fn state_prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for MunicipalityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MunicipalityCode {
    type Err = InvalidMunicipalityCode;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MunicipalityCode {
    type Error = InvalidMunicipalityCode;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MunicipalityCode> for String {
    fn from(value: MunicipalityCode) -> Self {
        value.0
    }
}

/// Arboviruses tracked by the surveillance feeds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DiseaseType {
    Dengue,
    Chikungunya,
    Zika,
}

/// Identity of one independently trained model: a municipality/disease pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub municipality_code: MunicipalityCode,
    pub disease_type: DiseaseType,
}

impl ModelKey {
    pub fn new(municipality_code: MunicipalityCode, disease_type: DiseaseType) -> Self {
        Self {
            municipality_code,
            disease_type,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.municipality_code, self.disease_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid model key '{0}': expected <municipality_code>_<disease>")]
pub struct InvalidModelKey(pub String);

impl FromStr for ModelKey {
    type Err = InvalidModelKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, disease) = s
            .split_once('_')
            .ok_or_else(|| InvalidModelKey(s.to_string()))?;
        let municipality_code =
            MunicipalityCode::new(code).map_err(|_| InvalidModelKey(s.to_string()))?;
        let disease_type = disease
            .parse::<DiseaseType>()
            .map_err(|_| InvalidModelKey(s.to_string()))?;
        Ok(Self::new(municipality_code, disease_type))
    }
}

/// A municipality the collectors know how to locate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Municipality {
    pub code: MunicipalityCode,
    pub name: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("3550308", true)]
    #[case(" 3304557 ", true)]
    #[case("355030", false)]
    #[case("35503080", false)]
    #[case("35503a8", false)]
    #[case("", false)]
    fn test_municipality_code_validation(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(MunicipalityCode::new(raw).is_ok(), valid);
    }

    #[test]
    fn test_municipality_code_state_prefix() {
        let code = MunicipalityCode::new("3550308").unwrap();
        assert_eq!(code.state_prefix(), "35");
    }

    #[test]
    fn test_disease_type_parsing_is_case_insensitive() {
        assert_eq!("Dengue".parse::<DiseaseType>().unwrap(), DiseaseType::Dengue);
        assert_eq!("ZIKA".parse::<DiseaseType>().unwrap(), DiseaseType::Zika);
        assert!("malaria".parse::<DiseaseType>().is_err());
        assert_eq!(DiseaseType::Chikungunya.to_string(), "chikungunya");
    }

    #[test]
    fn test_disease_type_serde() {
        let json = serde_json::to_string(&DiseaseType::Dengue).unwrap();
        assert_eq!(json, "\"dengue\"");
        let parsed: DiseaseType = serde_json::from_str("\"zika\"").unwrap();
        assert_eq!(parsed, DiseaseType::Zika);
    }

    #[test]
    fn test_model_key_round_trip() {
        let key = ModelKey::new(MunicipalityCode::new("3550308").unwrap(), DiseaseType::Dengue);
        assert_eq!(key.to_string(), "3550308_dengue");
        assert_eq!("3550308_dengue".parse::<ModelKey>().unwrap(), key);
        assert!("3550308-dengue".parse::<ModelKey>().is_err());
        assert!("123_dengue".parse::<ModelKey>().is_err());
    }

    #[test]
    fn test_municipality_code_rejects_invalid_json() {
        let parsed: Result<MunicipalityCode, _> = serde_json::from_str("\"12\"");
        assert!(parsed.is_err());
    }
}
