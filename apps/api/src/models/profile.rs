use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    None,
    HighSchool,
    Associate,
    Bachelor,
    Master,
    Doctorate,
}

impl EducationLevel {
    /// Ordinal rank used by the categorical encoders.
    pub fn rank(self) -> u8 {
        match self {
            EducationLevel::None => 0,
            EducationLevel::HighSchool => 1,
            EducationLevel::Associate => 2,
            EducationLevel::Bachelor => 3,
            EducationLevel::Master => 4,
            EducationLevel::Doctorate => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
}

impl Seniority {
    pub fn rank(self) -> u8 {
        match self {
            Seniority::Intern => 0,
            Seniority::Junior => 1,
            Seniority::Mid => 2,
            Seniority::Senior => 3,
            Seniority::Lead => 4,
            Seniority::Principal => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkArrangement {
    Onsite,
    Hybrid,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalaryRange {
    pub min: f64,
    pub max: f64,
}

/// Candidate side of a match. Fields the extractor cannot do without are `Option`
/// so that a missing value is detected instead of silently defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub skills: Option<Vec<String>>,
    pub years_experience: Option<f64>,
    #[serde(default)]
    pub education: Option<EducationLevel>,
    #[serde(default)]
    pub seniority: Option<Seniority>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub work_arrangement: Option<WorkArrangement>,
    #[serde(default)]
    pub desired_salary: Option<f64>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl CandidateProfile {
    /// Free text that feeds the embedding block.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(h) = self.headline.as_deref() {
            parts.push(h);
        }
        if let Some(s) = self.summary.as_deref() {
            parts.push(s);
        }
        let skills = self.skills.as_deref().unwrap_or_default().join(" ");
        let mut text = parts.join(" ");
        if !skills.is_empty() {
            text.push(' ');
            text.push_str(&skills);
        }
        text
    }
}

/// Job side of a match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobProfile {
    pub id: Uuid,
    pub title: Option<String>,
    pub required_skills: Option<Vec<String>>,
    #[serde(default)]
    pub preferred_skills: Vec<String>,
    #[serde(default)]
    pub min_years_experience: Option<f64>,
    #[serde(default)]
    pub education: Option<EducationLevel>,
    #[serde(default)]
    pub seniority: Option<Seniority>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub work_arrangement: Option<WorkArrangement>,
    #[serde(default)]
    pub salary: Option<SalaryRange>,
    #[serde(default)]
    pub description: Option<String>,
}

impl JobProfile {
    pub fn embedding_text(&self) -> String {
        let mut text = self.title.clone().unwrap_or_default();
        if let Some(d) = self.description.as_deref() {
            text.push(' ');
            text.push_str(d);
        }
        for skill in self
            .required_skills
            .as_deref()
            .unwrap_or_default()
            .iter()
            .chain(self.preferred_skills.iter())
        {
            text.push(' ');
            text.push_str(skill);
        }
        text
    }
}

/// A candidate/job pair with an observed outcome (e.g. hired / advanced).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledPair {
    pub candidate: CandidateProfile,
    pub job: JobProfile,
    pub label: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_education_rank_is_ordered() {
        assert!(EducationLevel::Doctorate.rank() > EducationLevel::Master.rank());
        assert_eq!(EducationLevel::None.rank(), 0);
    }

    #[test]
    fn test_candidate_missing_skills_deserializes_as_none() {
        let json = r#"{"id": "7f1c1c9e-3f6a-4b1e-9a55-1f0d2f7e8c10", "years_experience": 3.0}"#;
        let candidate: CandidateProfile = serde_json::from_str(json).unwrap();
        assert!(candidate.skills.is_none());
        assert_eq!(candidate.years_experience, Some(3.0));
    }

    #[test]
    fn test_seniority_serde_snake_case() {
        let s: Seniority = serde_json::from_str(r#""principal""#).unwrap();
        assert_eq!(s, Seniority::Principal);
    }

    #[test]
    fn test_job_embedding_text_includes_skills() {
        let job = JobProfile {
            title: Some("Backend Engineer".to_string()),
            required_skills: Some(vec!["rust".to_string()]),
            preferred_skills: vec!["kafka".to_string()],
            ..JobProfile::default()
        };
        let text = job.embedding_text();
        assert!(text.contains("Backend Engineer"));
        assert!(text.contains("rust"));
        assert!(text.contains("kafka"));
    }
}
