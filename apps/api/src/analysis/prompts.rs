pub const RESUME_ANALYSIS_SYSTEM: &str = "You are an expert technical recruiter. \
    You read resumes and extract structured candidate profiles. \
    You MUST respond with valid JSON only.";

pub const RESUME_ANALYSIS_PROMPT: &str = r#"Analyze the following resume and extract the following information as JSON:

{
  "name": "Full name of the person",
  "contact_details": {
    "email": "Email address",
    "phone": "Phone number",
    "location": "City, State/Country"
  },
  "education": {
    "university": "University/Institution name",
    "year_of_study": "Current year or graduation year",
    "course": "Degree program name",
    "discipline": "Field of study",
    "cgpa_percentage": "CGPA or percentage if available"
  },
  "skills": {
    "technical_skills": ["List of technical skills"],
    "soft_skills": ["List of soft skills"],
    "programming_languages": ["List of programming languages"],
    "tools_technologies": ["List of tools and technologies"]
  },
  "experience_scores": {
    "ai_ml_experience": "Integer 1-10 based on AI/ML experience",
    "gen_ai_experience": "Integer 1-10 based on Gen AI experience",
    "overall_experience": "Integer 1-10 based on overall experience"
  },
  "supporting_information": {
    "certifications": ["List of relevant certifications"],
    "internships": ["List of internships"],
    "projects": ["List of relevant projects"],
    "achievements": ["List of achievements"]
  },
  "analysis_metadata": {
    "confidence_score": "Integer 1-10: confidence in this analysis"
  }
}

{no_invention}

Resume text:
{resume_text}"#;

/// Fills the analysis template with the resume body.
pub fn build_analysis_prompt(resume_text: &str) -> String {
    RESUME_ANALYSIS_PROMPT
        .replace("{no_invention}", crate::llm_client::prompts::NO_INVENTION_INSTRUCTION)
        .replace("{resume_text}", resume_text)
}
