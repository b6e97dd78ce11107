use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline-stage failure taxonomy. Every stage rejects synchronously at its
/// boundary; the IPC layer maps `code()` into the error envelope.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    StateInconsistency(String),
    #[error("db error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::StateInconsistency(_) => "state_inconsistency",
            DomainError::Db(_) => "db_query_failed",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DomainError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DomainError::Conflict(msg.into())
    }
}

/// The fixed twelve-subject catalog. Stored in the db by canonical name;
/// matched case-insensitively on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Subject {
    English,
    Maths,
    Kiswahili,
    Chemistry,
    Physics,
    Biology,
    History,
    Geography,
    Cre,
    BusinessStudies,
    Agriculture,
    ComputerStudies,
}

impl Subject {
    pub const ALL: [Subject; 12] = [
        Subject::English,
        Subject::Maths,
        Subject::Kiswahili,
        Subject::Chemistry,
        Subject::Physics,
        Subject::Biology,
        Subject::History,
        Subject::Geography,
        Subject::Cre,
        Subject::BusinessStudies,
        Subject::Agriculture,
        Subject::ComputerStudies,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subject::English => "English",
            Subject::Maths => "Maths",
            Subject::Kiswahili => "Kiswahili",
            Subject::Chemistry => "Chemistry",
            Subject::Physics => "Physics",
            Subject::Biology => "Biology",
            Subject::History => "History",
            Subject::Geography => "Geography",
            Subject::Cre => "CRE",
            Subject::BusinessStudies => "Business Studies",
            Subject::Agriculture => "Agriculture",
            Subject::ComputerStudies => "Computer Studies",
        }
    }

    pub fn parse(raw: &str) -> Result<Subject, DomainError> {
        let wanted = raw.trim();
        for s in Subject::ALL {
            if s.name().eq_ignore_ascii_case(wanted) {
                return Ok(s);
            }
        }
        Err(DomainError::validation(format!(
            "unknown subject '{}'; expected one of the twelve catalog subjects",
            raw
        )))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Subject> for String {
    fn from(s: Subject) -> String {
        s.name().to_string()
    }
}

pub const GRADE_LETTERS: [&str; 5] = ["A", "B", "C", "D", "E"];
pub const GRADE_FAIL: &str = "FAIL";

/// One threshold table for all three grading stages, parameterized by scale.
/// A raw mark is rescaled onto `scale` points and compared against five
/// strictly decreasing cutoffs (inclusive); below the last cutoff is FAIL.
#[derive(Debug, Clone, Copy)]
pub struct GradeCurve {
    raw_max: i64,
    scale: f64,
    cuts: [f64; 5],
}

impl GradeCurve {
    /// CAT: marked out of 40, rescaled to a 30-point scale.
    /// Cutoffs at 5/6..1/6 of the scale: 25, 20, 15, 10, 5.
    pub fn cat() -> GradeCurve {
        GradeCurve::sixths(40, 30.0)
    }

    /// Exam: marked out of 60, rescaled to a 70-point scale, same sixths.
    pub fn exam() -> GradeCurve {
        GradeCurve::sixths(60, 70.0)
    }

    /// Subject total / report average: flat 0-100 with cutoffs 70/60/50/40/30.
    pub fn overall() -> GradeCurve {
        GradeCurve {
            raw_max: 100,
            scale: 100.0,
            cuts: [70.0, 60.0, 50.0, 40.0, 30.0],
        }
    }

    fn sixths(raw_max: i64, scale: f64) -> GradeCurve {
        let mut cuts = [0.0; 5];
        for (i, c) in cuts.iter_mut().enumerate() {
            *c = scale * (5 - i) as f64 / 6.0;
        }
        GradeCurve {
            raw_max,
            scale,
            cuts,
        }
    }

    /// Letter for a raw mark. Marks outside 1..=raw_max are a validation
    /// failure, not a curve outcome.
    pub fn letter(&self, marks: i64) -> Result<&'static str, DomainError> {
        if marks <= 0 || marks > self.raw_max {
            return Err(DomainError::validation(format!(
                "marks must be between 1 and {}, got {}",
                self.raw_max, marks
            )));
        }
        let scaled = marks as f64 * self.scale / self.raw_max as f64;
        for (cut, letter) in self.cuts.iter().zip(GRADE_LETTERS) {
            if scaled >= *cut {
                return Ok(letter);
            }
        }
        Ok(GRADE_FAIL)
    }
}

/// Qualitative remark for a report-form average.
pub fn remark_for_average(average: f64) -> &'static str {
    if average >= 70.0 {
        "Excellent"
    } else if average >= 50.0 {
        "Good"
    } else if average >= 30.0 {
        "Fair"
    } else {
        "FAIL"
    }
}

pub const MAX_TERMS: i64 = 3;

pub fn validate_term(term: i64) -> Result<i64, DomainError> {
    if (1..=MAX_TERMS).contains(&term) {
        Ok(term)
    } else {
        Err(DomainError::validation(format!(
            "term must be between 1 and {}, got {}",
            MAX_TERMS, term
        )))
    }
}

pub fn term_name(term: i64) -> String {
    format!("term{}", term)
}
