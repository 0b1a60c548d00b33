//! Learned question/answer pairs and the fuzzy lookup the assistant runs
//! before generating anything new.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Deserialize;

use crate::db::{time_col, DbConnection};
use crate::error::{AppError, AppResult};
use crate::models::LearningData;

/// Matches must score strictly above this.
pub const MATCH_THRESHOLD: f64 = 0.7;

const COLUMNS: &str =
    "id, pattern, response, category, confidence, usage_count, last_used, created_at, is_verified";

/// Jaccard index over lowercase, whitespace-separated words.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<LearningData> {
    Ok(LearningData {
        id: row.get(0)?,
        pattern: row.get(1)?,
        response: row.get(2)?,
        category: row.get(3)?,
        confidence: row.get(4)?,
        usage_count: row.get(5)?,
        last_used: time_col(row, 6)?,
        created_at: time_col(row, 7)?,
        is_verified: row.get(8)?,
    })
}

#[derive(Debug, Deserialize)]
pub struct NewTrainingExample {
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrainingExampleUpdate {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    pub is_verified: Option<bool>,
}

fn non_empty(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn check_confidence(confidence: f64) -> AppResult<f64> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(AppError::bad_request("confidence must be between 0 and 1"))
    }
}

#[derive(Clone)]
pub struct LearningStore {
    db: DbConnection,
}

impl LearningStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn save(
        &self,
        pattern: &str,
        response: &str,
        category: &str,
        confidence: f64,
    ) -> AppResult<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO learning_data (pattern, response, category, confidence, usage_count, last_used, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![pattern, response, category, confidence, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Best learned pattern for `message`, bumping its usage on a hit.
    pub async fn find_match(&self, message: &str) -> AppResult<Option<LearningData>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM learning_data ORDER BY id"))?;
        let rows = stmt.query_map([], from_row)?;

        let mut best: Option<LearningData> = None;
        let mut best_score = 0.0;
        for row in rows {
            let candidate = row?;
            let score = similarity(message, &candidate.pattern);
            if score > best_score && score > MATCH_THRESHOLD {
                best_score = score;
                best = Some(candidate);
            }
        }
        drop(stmt);

        let Some(mut hit) = best else {
            return Ok(None);
        };
        let now = Utc::now();
        conn.execute(
            "UPDATE learning_data SET usage_count = usage_count + 1, last_used = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), hit.id],
        )?;
        hit.usage_count += 1;
        hit.last_used = now;
        tracing::debug!(id = hit.id, score = best_score, "learned pattern matched");
        Ok(Some(hit))
    }

    pub async fn list(&self) -> AppResult<Vec<LearningData>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM learning_data ORDER BY id"))?;
        let rows = stmt.query_map([], from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn get(&self, id: i64) -> AppResult<LearningData> {
        self.db
            .lock()
            .await
            .query_row(
                &format!("SELECT {COLUMNS} FROM learning_data WHERE id = ?1"),
                [id],
                from_row,
            )
            .optional()?
            .ok_or(AppError::NotFound("training example"))
    }

    pub async fn count(&self) -> AppResult<i64> {
        Ok(self
            .db
            .lock()
            .await
            .query_row("SELECT COUNT(*) FROM learning_data", [], |row| row.get(0))?)
    }

    pub async fn create(&self, input: NewTrainingExample) -> AppResult<LearningData> {
        let question = non_empty(&input.question, "question")?;
        let answer = non_empty(&input.answer, "answer")?;
        let category = input
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "general".to_string());
        let confidence = check_confidence(input.confidence.unwrap_or(0.7))?;

        let id = self.save(&question, &answer, &category, confidence).await?;
        self.get(id).await
    }

    pub async fn update(&self, id: i64, changes: TrainingExampleUpdate) -> AppResult<LearningData> {
        let mut current = self.get(id).await?;
        if let Some(question) = changes.question {
            current.pattern = non_empty(&question, "question")?;
        }
        if let Some(answer) = changes.answer {
            current.response = non_empty(&answer, "answer")?;
        }
        if let Some(category) = changes.category {
            current.category = non_empty(&category, "category")?;
        }
        if let Some(confidence) = changes.confidence {
            current.confidence = check_confidence(confidence)?;
        }
        if let Some(verified) = changes.is_verified {
            current.is_verified = verified;
        }

        self.db.lock().await.execute(
            "UPDATE learning_data SET pattern = ?1, response = ?2, category = ?3, confidence = ?4, is_verified = ?5
             WHERE id = ?6",
            params![
                current.pattern,
                current.response,
                current.category,
                current.confidence,
                current.is_verified,
                id
            ],
        )?;
        Ok(current)
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        let removed = self
            .db
            .lock()
            .await
            .execute("DELETE FROM learning_data WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(AppError::NotFound("training example"));
        }
        Ok(())
    }
}
