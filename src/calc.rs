use serde::{Deserialize, Serialize};

/// Attendance is worth 5 of the 100 final-grade points.
pub const ATTENDANCE_MAX_POINTS: f64 = 5.0;

/// A late mark earns half the credit of a present mark.
pub const LATE_CREDIT: f64 = 0.5;

/// Minimum final percentage for a module's credits to count as earned.
pub const EARNED_CREDIT_MIN: f64 = 30.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// 2-decimal rounding used for displayed marks.
pub fn round_mark(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTally {
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub total: usize,
}

pub fn attendance_tally<I>(marks: I) -> AttendanceTally
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut tally = AttendanceTally::default();
    for m in marks {
        match m {
            AttendanceStatus::Present => tally.present += 1,
            AttendanceStatus::Late => tally.late += 1,
            AttendanceStatus::Absent => tally.absent += 1,
        }
        tally.total += 1;
    }
    tally
}

impl AttendanceTally {
    /// Attendance points on the 0..=5 scale. An empty record is 0, not a
    /// division by zero.
    pub fn score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let credited = self.present as f64 + LATE_CREDIT * self.late as f64;
        (credited / self.total as f64) * ATTENDANCE_MAX_POINTS
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeWeights {
    pub attendance: f64,
    pub assignments: f64,
    pub test: f64,
    pub final_exam: f64,
}

impl GradeWeights {
    pub fn sum(&self) -> f64 {
        self.attendance + self.assignments + self.test + self.final_exam
    }

    /// Assessment weights must cover exactly 100 points. A violation is a
    /// configuration error at the point the weights are written, not a
    /// silently skewed final grade somewhere downstream.
    pub fn validate(&self) -> Result<(), CalcError> {
        let sum = self.sum();
        if (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CalcError::new(
                "config_invalid",
                format!("assessment weights must sum to 100, got {}", sum),
            )
            .with_details(serde_json::json!({ "weightSum": sum })));
        }
        for (name, w) in [
            ("attendance", self.attendance),
            ("assignments", self.assignments),
            ("test", self.test),
            ("finalExam", self.final_exam),
        ] {
            if w < 0.0 {
                return Err(CalcError::new(
                    "config_invalid",
                    format!("assessment weight {} must not be negative", name),
                )
                .with_details(serde_json::json!({ "weight": name, "value": w })));
            }
        }
        Ok(())
    }

    pub fn component_max(&self, component: Component) -> f64 {
        match component {
            Component::Assignment => self.assignments,
            Component::Test => self.test,
            Component::Exam => self.final_exam,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Assignment,
    Test,
    Exam,
}

impl Component {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assignment" => Some(Component::Assignment),
            "test" => Some(Component::Test),
            "exam" => Some(Component::Exam),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Assignment => "assignment",
            Component::Test => "test",
            Component::Exam => "exam",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMarks {
    pub assignment: f64,
    pub test: f64,
    pub exam: f64,
}

/// Final percentage is the plain sum of pre-weighted component points.
/// Callers are responsible for having validated the module's weights first.
pub fn final_grade(attendance_score: f64, marks: &ComponentMarks) -> f64 {
    attendance_score + marks.assignment + marks.test + marks.exam
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub value: f64,
    pub adjusted: bool,
}

/// Pull a malformed percentage back into [0, 100]. The caller is told when
/// that happened so corrupted upstream data stays visible.
pub fn clamp_percent(raw: f64) -> Clamped {
    if !raw.is_finite() {
        return Clamped {
            value: 0.0,
            adjusted: true,
        };
    }
    let value = raw.clamp(0.0, 100.0);
    Clamped {
        value,
        adjusted: value != raw,
    }
}

pub struct GradeBand {
    pub min_percent: f64,
    pub letter: &'static str,
    pub points: f64,
}

/// Fixed institutional banding, lower bounds inclusive, scanned top-down.
#[rustfmt::skip]
pub const GRADE_BANDS: [GradeBand; 10] = [
    GradeBand { min_percent: 70.0, letter: "A",  points: 4.00 },
    GradeBand { min_percent: 65.0, letter: "B+", points: 3.75 },
    GradeBand { min_percent: 60.0, letter: "B",  points: 3.25 },
    GradeBand { min_percent: 55.0, letter: "B-", points: 3.00 },
    GradeBand { min_percent: 50.0, letter: "C+", points: 2.75 },
    GradeBand { min_percent: 45.0, letter: "C",  points: 2.50 },
    GradeBand { min_percent: 40.0, letter: "C-", points: 2.00 },
    GradeBand { min_percent: 35.0, letter: "D+", points: 1.50 },
    GradeBand { min_percent: 30.0, letter: "D",  points: 1.00 },
    GradeBand { min_percent: 0.0,  letter: "F",  points: 0.00 },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterGrade {
    pub letter: &'static str,
    pub points: f64,
    pub clamped: bool,
}

pub fn classify(raw_percent: f64) -> LetterGrade {
    let clamped = clamp_percent(raw_percent);
    for band in &GRADE_BANDS {
        if clamped.value >= band.min_percent {
            return LetterGrade {
                letter: band.letter,
                points: band.points,
                clamped: clamped.adjusted,
            };
        }
    }
    // Unreachable once clamped, but the 0.0 band makes that explicit.
    LetterGrade {
        letter: "F",
        points: 0.0,
        clamped: clamped.adjusted,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleStanding {
    pub credit_hours: f64,
    pub final_grade: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgpaSummary {
    pub total_credits: f64,
    pub earned_credits: f64,
    pub quality_points: f64,
    pub cgpa: f64,
}

/// Every enrolled module counts toward the credit denominator, graded or
/// not; only graded modules contribute quality points and earned credits.
pub fn cgpa_summary(rows: &[ModuleStanding]) -> CgpaSummary {
    let mut summary = CgpaSummary::default();
    for row in rows {
        summary.total_credits += row.credit_hours;
        let Some(final_grade) = row.final_grade else {
            continue;
        };
        let grade = classify(final_grade);
        summary.quality_points += grade.points * row.credit_hours;
        if clamp_percent(final_grade).value >= EARNED_CREDIT_MIN {
            summary.earned_credits += row.credit_hours;
        }
    }
    summary.cgpa = if summary.total_credits > 0.0 {
        summary.quality_points / summary.total_credits
    } else {
        0.0
    };
    summary
}
