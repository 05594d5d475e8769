use serde::Serialize;

use crate::batch::result::describe_outcome;
use crate::batch::{BatchResult, Job};
use crate::report::ReportError;

/// One flattened row per job. Record columns are empty for jobs without a result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TabularRow {
    pub job_id: usize,
    pub file_name: String,
    pub status: String,
    pub attempts: u32,
    pub outcome: String,
    pub error_kind: String,
    pub error_message: String,
    pub processing_ms: u64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub university: String,
    pub year_of_study: String,
    pub course: String,
    pub discipline: String,
    pub cgpa_percentage: String,
    pub technical_skills: String,
    pub soft_skills: String,
    pub programming_languages: String,
    pub tools_technologies: String,
    pub ai_ml_experience: Option<u8>,
    pub gen_ai_experience: Option<u8>,
    pub overall_experience: Option<u8>,
    pub certifications: String,
    pub internships: String,
    pub projects: String,
    pub achievements: String,
    pub confidence_score: Option<u8>,
    pub processing_timestamp: String,
}

impl TabularRow {
    pub fn from_job(job: &Job) -> Self {
        let mut row = TabularRow {
            job_id: job.id.0,
            file_name: job.source.name.clone(),
            status: job.state.to_string(),
            attempts: job.attempt,
            outcome: describe_outcome(job),
            processing_ms: job.processing_time.as_millis() as u64,
            ..Default::default()
        };

        if let Some(error) = &job.error {
            row.error_kind = serde_json::to_value(error.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            row.error_message = error.message.clone();
        }

        if let Some(record) = &job.result {
            row.name = record.name.clone();
            row.email = record.contact.email.clone();
            row.phone = record.contact.phone.clone();
            row.location = record.contact.location.clone();
            row.university = record.education.institution.clone();
            row.year_of_study = record.education.year_of_study.clone();
            row.course = record.education.program.clone();
            row.discipline = record.education.discipline.clone();
            row.cgpa_percentage = record.education.grade.clone();
            row.technical_skills = record.skills.technical_skills.join(", ");
            row.soft_skills = record.skills.soft_skills.join(", ");
            row.programming_languages = record.skills.programming_languages.join(", ");
            row.tools_technologies = record.skills.tools_technologies.join(", ");
            row.ai_ml_experience = record.experience_scores.ai_ml_experience;
            row.gen_ai_experience = record.experience_scores.gen_ai_experience;
            row.overall_experience = record.experience_scores.overall_experience;
            row.certifications = record.supporting.certifications.join(", ");
            row.internships = record.supporting.internships.join(", ");
            row.projects = record.supporting.projects.join(", ");
            row.achievements = record.supporting.achievements.join(", ");
            row.confidence_score = record.metadata.confidence_score;
            row.processing_timestamp = record.metadata.processing_timestamp.clone();
        }

        row
    }
}

pub fn rows(result: &BatchResult) -> Vec<TabularRow> {
    result.jobs.iter().map(TabularRow::from_job).collect()
}

pub fn to_csv(result: &BatchResult) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows(result) {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::Flush(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_result;

    #[test]
    fn test_rows_follow_submission_order() {
        let rows = rows(&sample_result());
        let names: Vec<&str> = rows.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["asha.pdf", "ben.pdf", "cara.pdf"]);
    }

    #[test]
    fn test_success_row_is_flattened() {
        let rows = rows(&sample_result());
        let row = &rows[0];
        assert_eq!(row.status, "succeeded");
        assert_eq!(row.name, "Asha Rao");
        assert_eq!(row.university, "IIT Bombay");
        assert_eq!(row.technical_skills, "nlp, computer vision");
        assert_eq!(row.ai_ml_experience, Some(8));
        assert_eq!(row.processing_ms, 1500);
        assert!(row.error_message.is_empty());
    }

    #[test]
    fn test_failure_rows_carry_error() {
        let rows = rows(&sample_result());
        assert_eq!(rows[1].status, "failed");
        assert_eq!(rows[1].error_kind, "transient");
        assert_eq!(rows[1].attempts, 4);
        assert!(rows[1].outcome.starts_with("failed after 4 attempts"));
        assert!(rows[1].name.is_empty());
        assert_eq!(rows[2].error_kind, "cancelled");
    }

    #[test]
    fn test_csv_has_header_and_one_line_per_job() {
        let bytes = to_csv(&sample_result()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("job_id,file_name,status,attempts"));
        assert!(header.contains("ai_ml_experience"));
        assert_eq!(lines.count(), 3);
    }
}
