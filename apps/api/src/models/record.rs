use serde::{Deserialize, Deserializer, Serialize};

/// Lowest and highest value an experience or confidence score may take.
pub const SCORE_MIN: u8 = 1;
pub const SCORE_MAX: u8 = 10;

/// Structured analysis of a single resume, as produced by an `AnalysisClient`.
///
/// Every field is optional on the wire: the model is asked for the full shape
/// but routinely omits sections it cannot find. Missing sections deserialize to
/// their defaults rather than failing the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeRecord {
    pub name: String,
    #[serde(alias = "contact_details")]
    pub contact: ContactDetails,
    pub education: Education,
    pub skills: Skills,
    pub experience_scores: ExperienceScores,
    #[serde(alias = "supporting_information")]
    pub supporting: SupportingInfo,
    #[serde(alias = "analysis_metadata")]
    pub metadata: AnalysisMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactDetails {
    pub email: String,
    pub phone: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    #[serde(alias = "university")]
    pub institution: String,
    #[serde(deserialize_with = "lenient_string")]
    pub year_of_study: String,
    #[serde(alias = "course")]
    pub program: String,
    pub discipline: String,
    /// CGPA or percentage, kept verbatim.
    #[serde(alias = "cgpa_percentage", deserialize_with = "lenient_string")]
    pub grade: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    pub technical_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub programming_languages: Vec<String>,
    pub tools_technologies: Vec<String>,
}

/// Scores in `SCORE_MIN..=SCORE_MAX`. `None` when the model gave nothing usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceScores {
    #[serde(deserialize_with = "bounded_score")]
    pub ai_ml_experience: Option<u8>,
    #[serde(deserialize_with = "bounded_score")]
    pub gen_ai_experience: Option<u8>,
    #[serde(deserialize_with = "bounded_score")]
    pub overall_experience: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportingInfo {
    pub certifications: Vec<String>,
    pub internships: Vec<String>,
    pub projects: Vec<String>,
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisMetadata {
    pub file_name: String,
    pub processing_timestamp: String,
    #[serde(deserialize_with = "bounded_score")]
    pub confidence_score: Option<u8>,
}

/// Clamps a raw score into the 1–10 band. Non-finite input yields `None`.
pub fn clamp_score(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(SCORE_MIN as f64, SCORE_MAX as f64) as u8)
}

/// Accepts a number, a numeric string ("7", "7/10", "8.5") or null.
fn bounded_score<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(clamp_score),
        serde_json::Value::String(s) => s
            .split('/')
            .next()
            .and_then(|head| head.trim().parse::<f64>().ok())
            .and_then(clamp_score),
        _ => None,
    })
}

/// Models sometimes answer "2024" or 8.2 where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
