use anyhow::Context;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::classifier::Lcg;
use crate::models::{
    AssessmentRow, AttendanceRecord, GradeRecord, RiskLevel, StudentHistory, StudentRow,
};
use crate::predict::Prediction;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const DEFAULT_COURSES: [(&str, &str, i32); 5] = [
    ("MATH101", "Mathematics", 4),
    ("CS101", "Computer Science", 3),
    ("PHYS101", "Physics", 4),
    ("ENG201", "English Literature", 3),
    ("CS201", "Data Structures", 3),
];

const ASSIGNMENT_TYPES: [(&str, f64); 5] = [
    ("Midterm Exam", 0.3),
    ("Final Exam", 0.4),
    ("Assignment 1", 0.1),
    ("Assignment 2", 0.1),
    ("Lab Work", 0.1),
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("S1001", "Avery Lee", "avery.lee@example.edu", 92.0, 96.0),
        ("S1002", "Jules Moreno", "jules.moreno@example.edu", 85.0, 90.0),
        ("S1003", "Kiara Patel", "kiara.patel@example.edu", 71.0, 84.0),
        ("S1004", "Tomas Okafor", "tomas.okafor@example.edu", 66.0, 78.0),
        ("S1005", "Mina Haddad", "mina.haddad@example.edu", 52.0, 62.0),
        ("S1006", "Ruth Almeida", "ruth.almeida@example.edu", 45.0, 55.0),
    ];

    for (code, name, email, grade_pct, attendance_pct) in students {
        let student_id = upsert_student(pool, code, name, email).await?;
        insert_academic_records(pool, student_id, code, grade_pct, attendance_pct).await?;
    }

    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    code: &str,
    name: &str,
    email: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO student_early_warning.students
        (id, student_code, full_name, email, enrolled_on)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(name)
    .bind(email)
    .bind(Utc::now().date_naive())
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn ensure_courses(pool: &PgPool) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::new();
    for (code, name, credits) in DEFAULT_COURSES {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO student_early_warning.courses
            (id, code, name, credits, expected_assignments)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(credits)
        .bind(ASSIGNMENT_TYPES.len() as i32)
        .fetch_one(pool)
        .await?
        .get("id");
        ids.push(id);
    }
    Ok(ids)
}

/// Synthesize per-course grade and attendance rows around the student's
/// overall percentages, with seeded variation so reruns are reproducible.
/// Students that already carry grades are left alone.
async fn insert_academic_records(
    pool: &PgPool,
    student_id: Uuid,
    student_code: &str,
    grade_pct: f64,
    attendance_pct: f64,
) -> anyhow::Result<()> {
    let existing: i64 =
        sqlx::query("SELECT COUNT(*) AS n FROM student_early_warning.grades WHERE student_id = $1")
            .bind(student_id)
            .fetch_one(pool)
            .await?
            .get("n");
    if existing > 0 {
        return Ok(());
    }

    let seed = student_code
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    let mut rng = Lcg::new(seed);
    let today = Utc::now().date_naive();
    let courses = ensure_courses(pool).await?;

    for course_id in &courses {
        sqlx::query(
            r#"
            INSERT INTO student_early_warning.enrollments (id, student_id, course_id, active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (student_id, course_id) DO UPDATE SET active = TRUE
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(course_id)
        .execute(pool)
        .await?;

        for (assignment_name, weight) in ASSIGNMENT_TYPES {
            let variation = rng.next_f64() * 10.0 - 5.0;
            let score = (grade_pct + variation).clamp(0.0, 100.0);
            let graded_on = today - chrono::Duration::days(1 + rng.next_usize(90) as i64);
            sqlx::query(
                r#"
                INSERT INTO student_early_warning.grades
                (id, student_id, course_id, assignment_name, score, max_score, weight, graded_on)
                VALUES ($1, $2, $3, $4, $5, 100, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(course_id)
            .bind(assignment_name)
            .bind((score * 10.0).round() / 10.0)
            .bind(weight)
            .bind(graded_on)
            .execute(pool)
            .await?;
        }

        let total_sessions = 30usize;
        let present_target =
            ((attendance_pct / 100.0) * total_sessions as f64).round() as usize;
        let mut present: Vec<bool> = (0..total_sessions).map(|d| d < present_target).collect();
        for i in (1..present.len()).rev() {
            let j = rng.next_usize(i + 1);
            present.swap(i, j);
        }

        for (day, was_present) in present.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO student_early_warning.attendance
                (id, student_id, course_id, session_date, present, session_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(course_id)
            .bind(today - chrono::Duration::days(day as i64))
            .bind(was_present)
            .bind(if day % 3 == 0 { "Lab" } else { "Lecture" })
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

pub async fn list_students(pool: &PgPool) -> anyhow::Result<Vec<StudentRow>> {
    let rows = sqlx::query(
        "SELECT id, student_code, full_name, email \
         FROM student_early_warning.students ORDER BY student_code",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| StudentRow {
            id: row.get("id"),
            student_code: row.get("student_code"),
            full_name: row.get("full_name"),
            email: row.get("email"),
        })
        .collect())
}

pub async fn find_student(
    pool: &PgPool,
    code: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<StudentRow> {
    let mut query = String::from(
        "SELECT id, student_code, full_name, email FROM student_early_warning.students",
    );
    if code.is_some() {
        query.push_str(" WHERE student_code = $1");
    } else if email.is_some() {
        query.push_str(" WHERE email = $1");
    }

    let mut statement = sqlx::query(&query);
    if let Some(value) = code {
        statement = statement.bind(value);
    } else if let Some(value) = email {
        statement = statement.bind(value);
    }

    let row = statement
        .fetch_optional(pool)
        .await?
        .context("no student matches that code or email")?;

    Ok(StudentRow {
        id: row.get("id"),
        student_code: row.get("student_code"),
        full_name: row.get("full_name"),
        email: row.get("email"),
    })
}

/// Pull everything feature extraction needs for one student. A missing
/// score reads as 0.0 rather than failing the fetch.
pub async fn fetch_history(pool: &PgPool, student: &StudentRow) -> anyhow::Result<StudentHistory> {
    let grade_rows = sqlx::query(
        "SELECT score, max_score, weight, assignment_name, graded_on \
         FROM student_early_warning.grades WHERE student_id = $1 \
         ORDER BY graded_on DESC",
    )
    .bind(student.id)
    .fetch_all(pool)
    .await?;

    let mut grades = Vec::with_capacity(grade_rows.len());
    for row in grade_rows {
        grades.push(GradeRecord {
            score: row.get::<Option<f64>, _>("score").unwrap_or(0.0),
            max_score: row.get("max_score"),
            weight: row.get("weight"),
            assignment_name: row.get("assignment_name"),
            graded_on: row.get("graded_on"),
        });
    }

    let attendance_rows = sqlx::query(
        "SELECT session_date, present, session_type \
         FROM student_early_warning.attendance WHERE student_id = $1 \
         ORDER BY session_date DESC",
    )
    .bind(student.id)
    .fetch_all(pool)
    .await?;

    let attendance = attendance_rows
        .into_iter()
        .map(|row| AttendanceRecord {
            session_date: row.get("session_date"),
            present: row.get("present"),
            session_type: row.get("session_type"),
        })
        .collect();

    let active_course_count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM student_early_warning.enrollments \
         WHERE student_id = $1 AND active",
    )
    .bind(student.id)
    .fetch_one(pool)
    .await?
    .get("n");

    // SUM is NULL with no enrollments; a zeroed catalog also means "no
    // expectation on file".
    let expected: Option<i64> = sqlx::query(
        "SELECT SUM(c.expected_assignments)::BIGINT AS expected \
         FROM student_early_warning.enrollments e \
         JOIN student_early_warning.courses c ON c.id = e.course_id \
         WHERE e.student_id = $1 AND e.active",
    )
    .bind(student.id)
    .fetch_one(pool)
    .await?
    .get("expected");
    let expected_assignments = expected.filter(|&total| total > 0);

    Ok(StudentHistory {
        student: student.clone(),
        grades,
        attendance,
        active_course_count: active_course_count as usize,
        expected_assignments,
    })
}

/// Append one assessment to the per-student log.
pub async fn save_assessment(
    pool: &PgPool,
    student_id: Uuid,
    prediction: &Prediction,
) -> anyhow::Result<()> {
    let features = serde_json::to_string(&prediction.features)?;
    sqlx::query(
        r#"
        INSERT INTO student_early_warning.risk_assessments
        (id, student_id, risk_level, probability, model_version, features, assessed_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(prediction.level.as_str())
    .bind(prediction.probability)
    .bind(&prediction.model_version)
    .bind(features)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_notification(
    pool: &PgPool,
    student_id: Uuid,
    message: &str,
    priority: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO student_early_warning.notifications
        (id, student_id, message, priority, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(message)
    .bind(priority)
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest assessment per student, for the report.
pub async fn latest_assessments(pool: &PgPool) -> anyhow::Result<Vec<AssessmentRow>> {
    let rows = sqlx::query(
        "SELECT DISTINCT ON (s.id) \
         s.student_code, s.full_name, s.email, \
         r.risk_level, r.probability, r.model_version, r.assessed_at \
         FROM student_early_warning.risk_assessments r \
         JOIN student_early_warning.students s ON s.id = r.student_id \
         ORDER BY s.id, r.assessed_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AssessmentRow {
            student_code: row.get("student_code"),
            full_name: row.get("full_name"),
            email: row.get("email"),
            risk_level: RiskLevel::from_label(row.get::<String, _>("risk_level").as_str()),
            probability: row.get("probability"),
            model_version: row.get("model_version"),
            assessed_at: row.get("assessed_at"),
        })
        .collect())
}
