//! 持久化服务 - 业务能力层
//!
//! 编排器和审批监听共用一个 Store。每个方法都是一次原子操作：
//! 多语句的修改放在同一个事务里，失败时整体回滚，不留下半截数据。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{ffi, params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{
    initial_watermark, Assignment, NaturalKey, NewSubmission, Platform, PlatformKind, RubricGrade,
    Seed, Status, Submission, User,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn platforms(&self) -> Result<Vec<Platform>, StoreError>;
    async fn platform(&self, id: u64) -> Result<Option<Platform>, StoreError>;
    async fn assignments(&self) -> Result<Vec<Assignment>, StoreError>;
    async fn assignment(&self, id: u64) -> Result<Option<Assignment>, StoreError>;
    async fn user(&self, id: u64) -> Result<Option<User>, StoreError>;

    /// 按 grade_number 升序
    async fn rubric_grades(&self, assignment_id: u64) -> Result<Vec<RubricGrade>, StoreError>;

    async fn set_assignment_description(
        &self,
        assignment_id: u64,
        description: String,
    ) -> Result<(), StoreError>;

    /// 只在 `candidate` 更新时才移动水位线，返回是否移动
    async fn advance_watermark(
        &self,
        assignment_id: u64,
        candidate: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn latest_submission_time(
        &self,
        assignment_id: u64,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn find_submission(&self, key: &NaturalKey) -> Result<Option<Submission>, StoreError>;

    /// 以 [`Status::New`] 插入；自然键已存在时失败
    async fn insert_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn submissions_with_status(&self, status: Status) -> Result<Vec<Submission>, StoreError>;
    async fn submission(&self, id: u64) -> Result<Option<Submission>, StoreError>;

    /// 覆盖同 id 的记录
    async fn update_submission(&self, submission: &Submission) -> Result<(), StoreError>;
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS users (
      id INTEGER PRIMARY KEY,
      chat_id INTEGER NOT NULL,
      username TEXT
    );

    CREATE TABLE IF NOT EXISTS platforms (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL,
      kind TEXT NOT NULL,
      api_url TEXT NOT NULL,
      api_key TEXT
    );

    CREATE TABLE IF NOT EXISTS assignments (
      id INTEGER PRIMARY KEY,
      user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
      platform_id INTEGER REFERENCES platforms(id) ON DELETE SET NULL,
      course_id INTEGER NOT NULL,
      assignment_id INTEGER NOT NULL,
      last_retrieved_us INTEGER NOT NULL,
      description TEXT,
      rubric TEXT
    );

    CREATE TABLE IF NOT EXISTS rubric_grades (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      assignment_id INTEGER NOT NULL REFERENCES assignments(id) ON DELETE CASCADE,
      grade_number INTEGER NOT NULL,
      short_description TEXT NOT NULL,
      detailed_description TEXT
    );

    CREATE TABLE IF NOT EXISTS submissions (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      assignment_id INTEGER REFERENCES assignments(id) ON DELETE SET NULL,
      student_id TEXT NOT NULL,
      student_name TEXT NOT NULL,
      student_uid TEXT,
      student_nid INTEGER,
      submission_time_us INTEGER NOT NULL,
      preview_url TEXT,
      similarity_score REAL,
      grade TEXT,
      content TEXT NOT NULL,
      feedback TEXT NOT NULL DEFAULT '',
      status TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_rubric_grades_number
      ON rubric_grades(assignment_id, grade_number);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_natural_key
      ON submissions(assignment_id, student_id, submission_time_us);
    CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, id);
"#;

const SUBMISSION_COLUMNS: &str = "id, assignment_id, student_id, student_name, student_uid, \
     student_nid, submission_time_us, preview_url, similarity_score, grade, content, feedback, status";

const ASSIGNMENT_COLUMNS: &str =
    "id, user_id, platform_id, course_id, assignment_id, last_retrieved_us, description, rubric";

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Status::ALL
            .into_iter()
            .find(|s| s.as_str() == text)
            .ok_or_else(|| FromSqlError::Other(format!("未知状态 {}", text).into()))
    }
}

impl ToSql for PlatformKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let text = match self {
            PlatformKind::Canvas => "canvas",
            PlatformKind::Unsupported => "unsupported",
        };
        Ok(ToSqlOutput::from(text))
    }
}

impl FromSql for PlatformKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value.as_str()? {
            "canvas" => PlatformKind::Canvas,
            _ => PlatformKind::Unsupported,
        })
    }
}

fn sql_id(id: u64) -> i64 {
    id as i64
}

fn id_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn optional_id_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => id_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: id_at(row, 0)?,
        chat_id: row.get(1)?,
        username: row.get(2)?,
    })
}

fn platform_from_row(row: &Row<'_>) -> rusqlite::Result<Platform> {
    Ok(Platform {
        id: id_at(row, 0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        api_url: row.get(3)?,
        api_key: row.get(4)?,
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: id_at(row, 0)?,
        user_id: optional_id_at(row, 1)?,
        platform_id: optional_id_at(row, 2)?,
        course_id: row.get(3)?,
        assignment_id: row.get(4)?,
        last_retrieved: timestamp(row, 5)?,
        description: row.get(6)?,
        rubric: row.get(7)?,
    })
}

fn rubric_grade_from_row(row: &Row<'_>) -> rusqlite::Result<RubricGrade> {
    Ok(RubricGrade {
        id: id_at(row, 0)?,
        assignment_id: id_at(row, 1)?,
        grade_number: row.get(2)?,
        short_description: row.get(3)?,
        detailed_description: row.get(4)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: id_at(row, 0)?,
        assignment_id: optional_id_at(row, 1)?,
        student_id: row.get(2)?,
        student_name: row.get(3)?,
        student_uid: row.get(4)?,
        student_nid: row.get(5)?,
        submission_time: timestamp(row, 6)?,
        preview_url: row.get(7)?,
        similarity_score: row.get(8)?,
        grade: row.get(9)?,
        content: row.get(10)?,
        feedback: row.get(11)?,
        status: row.get(12)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// SQLite 存储
///
/// 职责：
/// - 持有唯一的数据库连接
/// - 自然键唯一性交给 UNIQUE 索引
/// - 种子数据整体在一个事务里写入
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("打开存储: {}", path.display());
        Self::with_connection(conn)
    }

    /// 内存数据库，测试用
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 从种子数据 upsert 用户、平台、作业和评分等级
    ///
    /// 水位线和提交不受影响；种子没有描述时保留已有描述；
    /// 同一 grade_number 的评分等级保留原 id。
    pub async fn apply_seed(&self, seed: &Seed) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for user in &seed.users {
            tx.execute(
                r#"
                INSERT INTO users(id, chat_id, username) VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET chat_id = excluded.chat_id, username = excluded.username
                "#,
                params![sql_id(user.id), user.chat_id, user.username],
            )?;
        }

        for platform in &seed.platforms {
            tx.execute(
                r#"
                INSERT INTO platforms(id, name, kind, api_url, api_key) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                  name = excluded.name, kind = excluded.kind,
                  api_url = excluded.api_url, api_key = excluded.api_key
                "#,
                params![
                    sql_id(platform.id),
                    platform.name,
                    platform.kind,
                    platform.api_url,
                    platform.api_key
                ],
            )?;
        }

        for declared in &seed.assignments {
            tx.execute(
                r#"
                INSERT INTO assignments(id, user_id, platform_id, course_id, assignment_id,
                                        last_retrieved_us, description, rubric)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                  user_id = excluded.user_id,
                  platform_id = excluded.platform_id,
                  course_id = excluded.course_id,
                  assignment_id = excluded.assignment_id,
                  description = COALESCE(excluded.description, assignments.description),
                  rubric = excluded.rubric
                "#,
                params![
                    sql_id(declared.id),
                    declared.user_id.map(sql_id),
                    declared.platform_id.map(sql_id),
                    declared.course_id,
                    declared.assignment_id,
                    initial_watermark().timestamp_micros(),
                    declared.description,
                    declared.rubric
                ],
            )?;

            // 删除种子里已不存在的评分等级
            let existing: Vec<i64> = {
                let mut stmt =
                    tx.prepare("SELECT grade_number FROM rubric_grades WHERE assignment_id = ?1")?;
                let rows = stmt.query_map(params![sql_id(declared.id)], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for number in existing {
                if !declared.rubric_grades.iter().any(|g| g.grade_number == number) {
                    tx.execute(
                        "DELETE FROM rubric_grades WHERE assignment_id = ?1 AND grade_number = ?2",
                        params![sql_id(declared.id), number],
                    )?;
                }
            }

            for grade in &declared.rubric_grades {
                tx.execute(
                    r#"
                    INSERT INTO rubric_grades(assignment_id, grade_number, short_description, detailed_description)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(assignment_id, grade_number) DO UPDATE SET
                      short_description = excluded.short_description,
                      detailed_description = excluded.detailed_description
                    "#,
                    params![
                        sql_id(declared.id),
                        grade.grade_number,
                        grade.short_description,
                        grade.detailed_description
                    ],
                )?;
            }
        }

        tx.commit()?;
        info!(
            "种子数据已写入: {} 个用户, {} 个平台, {} 个作业",
            seed.users.len(),
            seed.platforms.len(),
            seed.assignments.len()
        );
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn platforms(&self) -> Result<Vec<Platform>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, name, kind, api_url, api_key FROM platforms ORDER BY id")?;
        let rows = stmt.query_map([], platform_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    async fn platform(&self, id: u64) -> Result<Option<Platform>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, name, kind, api_url, api_key FROM platforms WHERE id = ?1",
                params![sql_id(id)],
                platform_from_row,
            )
            .optional()?)
    }

    async fn assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM assignments ORDER BY id", ASSIGNMENT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], assignment_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    async fn assignment(&self, id: u64) -> Result<Option<Assignment>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM assignments WHERE id = ?1", ASSIGNMENT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![sql_id(id)], assignment_from_row)
            .optional()?)
    }

    async fn user(&self, id: u64) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT id, chat_id, username FROM users WHERE id = ?1",
                params![sql_id(id)],
                user_from_row,
            )
            .optional()?)
    }

    async fn rubric_grades(&self, assignment_id: u64) -> Result<Vec<RubricGrade>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, assignment_id, grade_number, short_description, detailed_description
            FROM rubric_grades WHERE assignment_id = ?1 ORDER BY grade_number
            "#,
        )?;
        let rows = stmt.query_map(params![sql_id(assignment_id)], rubric_grade_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    async fn set_assignment_description(
        &self,
        assignment_id: u64,
        description: String,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE assignments SET description = ?2 WHERE id = ?1",
            params![sql_id(assignment_id), description],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "assignment",
                id: assignment_id,
            });
        }
        Ok(())
    }

    async fn advance_watermark(
        &self,
        assignment_id: u64,
        candidate: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT last_retrieved_us FROM assignments WHERE id = ?1",
                params![sql_id(assignment_id)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::NotFound {
                entity: "assignment",
                id: assignment_id,
            });
        };

        let candidate_us = candidate.timestamp_micros();
        if candidate_us <= current {
            return Ok(false);
        }
        tx.execute(
            "UPDATE assignments SET last_retrieved_us = ?2 WHERE id = ?1",
            params![sql_id(assignment_id), candidate_us],
        )?;
        tx.commit()?;
        debug!("作业 {} 水位线 -> {}", assignment_id, candidate);
        Ok(true)
    }

    async fn latest_submission_time(
        &self,
        assignment_id: u64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock().await;
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(submission_time_us) FROM submissions WHERE assignment_id = ?1",
            params![sql_id(assignment_id)],
            |row| row.get(0),
        )?;
        Ok(latest.and_then(DateTime::<Utc>::from_timestamp_micros))
    }

    async fn find_submission(&self, key: &NaturalKey) -> Result<Option<Submission>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM submissions \
             WHERE assignment_id IS ?1 AND student_id = ?2 AND submission_time_us = ?3",
            SUBMISSION_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![
                    key.assignment_id.map(sql_id),
                    key.student_id,
                    key.submission_time.timestamp_micros()
                ],
                submission_from_row,
            )
            .optional()?)
    }

    async fn insert_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT INTO submissions(assignment_id, student_id, student_name, student_uid, student_nid,
                                    submission_time_us, preview_url, similarity_score, content, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                sql_id(new.assignment_id),
                new.student_id,
                new.student_name,
                new.student_uid,
                new.student_nid,
                new.submission_time.timestamp_micros(),
                new.preview_url,
                new.similarity_score,
                new.content,
                Status::New
            ],
        );
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StoreError::DuplicateNaturalKey {
                    assignment_id: Some(new.assignment_id),
                    student_id: new.student_id,
                    submission_time: new.submission_time.to_rfc3339(),
                });
            }
            return Err(e.into());
        }

        let id = u64::try_from(tx.last_insert_rowid()).map_err(|_| {
            StoreError::Sql(rusqlite::Error::IntegralValueOutOfRange(0, tx.last_insert_rowid()))
        })?;
        tx.commit()?;
        Ok(new.into_submission(id))
    }

    async fn submissions_with_status(&self, status: Status) -> Result<Vec<Submission>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM submissions WHERE status = ?1 ORDER BY id",
            SUBMISSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status], submission_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    async fn submission(&self, id: u64) -> Result<Option<Submission>, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {} FROM submissions WHERE id = ?1", SUBMISSION_COLUMNS);
        Ok(conn
            .query_row(&sql, params![sql_id(id)], submission_from_row)
            .optional()?)
    }

    async fn update_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE submissions SET
              assignment_id = ?2, student_id = ?3, student_name = ?4, student_uid = ?5,
              student_nid = ?6, submission_time_us = ?7, preview_url = ?8, similarity_score = ?9,
              grade = ?10, content = ?11, feedback = ?12, status = ?13
            WHERE id = ?1
            "#,
            params![
                sql_id(submission.id),
                submission.assignment_id.map(sql_id),
                submission.student_id,
                submission.student_name,
                submission.student_uid,
                submission.student_nid,
                submission.submission_time.timestamp_micros(),
                submission.preview_url,
                submission.similarity_score,
                submission.grade,
                submission.content,
                submission.feedback,
                submission.status
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "submission",
                id: submission.id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SEED: &str = r#"
        [[users]]
        id = 1
        chat_id = 42

        [[platforms]]
        id = 1
        name = "Canvas"
        kind = "canvas"
        api_url = "https://canvas.example.edu"

        [[assignments]]
        id = 10
        user_id = 1
        platform_id = 1
        course_id = 100
        assignment_id = 2000

        [[assignments.rubric_grades]]
        grade_number = 2
        short_description = "Minor issues"

        [[assignments.rubric_grades]]
        grade_number = 1
        short_description = "Excellent"
    "#;

    fn seed() -> Seed {
        Seed::from_toml_str(SEED).unwrap()
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.apply_seed(&seed()).await.unwrap();
        store
    }

    fn new_submission(student: &str, second: u32) -> NewSubmission {
        NewSubmission {
            assignment_id: 10,
            student_id: student.to_string(),
            student_name: student.to_uppercase(),
            student_uid: None,
            student_nid: Some(7),
            submission_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap(),
            preview_url: None,
            similarity_score: Some(0.25),
            content: "answer".to_string(),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_natural_key() {
        let store = seeded().await;

        let first = store.insert_submission(new_submission("ann", 0)).await.unwrap();
        assert_eq!(first.status, Status::New);

        let err = store
            .insert_submission(new_submission("ann", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateNaturalKey { .. }));

        // 同一学生不同时间是新的提交
        let second = store.insert_submission(new_submission("ann", 5)).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.submissions_with_status(Status::New).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stored_submission_reads_back_unchanged() {
        let store = seeded().await;
        let inserted = store.insert_submission(new_submission("ann", 0)).await.unwrap();

        let key = new_submission("ann", 0).natural_key();
        let found = store.find_submission(&key).await.unwrap().unwrap();
        assert_eq!(found, inserted);

        let mut graded = found.clone();
        graded.grade = Some("2".to_string());
        graded.feedback = "Check the edge cases.".to_string();
        graded.status = Status::Graded;
        store.update_submission(&graded).await.unwrap();
        assert_eq!(store.submission(graded.id).await.unwrap(), Some(graded));
    }

    #[tokio::test]
    async fn failed_insert_leaves_nothing_behind() {
        let store = seeded().await;
        let mut orphan = new_submission("ann", 0);
        orphan.assignment_id = 99;
        let key = orphan.natural_key();

        let err = store.insert_submission(orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::Sql(_)));
        assert_eq!(store.find_submission(&key).await.unwrap(), None);
        assert!(store.submissions_with_status(Status::New).await.unwrap().is_empty());

        // 失败之后同一个自然键仍然可以正常写入
        let mut retry = new_submission("ann", 0);
        retry.assignment_id = 10;
        store.insert_submission(retry).await.unwrap();
    }

    #[tokio::test]
    async fn failed_seed_is_rolled_back() {
        let store = SqliteStore::in_memory().unwrap();
        // 作业引用了不存在的平台
        let broken = Seed::from_toml_str(&SEED.replace("platform_id = 1", "platform_id = 9")).unwrap();

        assert!(store.apply_seed(&broken).await.is_err());
        assert_eq!(store.user(1).await.unwrap(), None);
        assert!(store.platforms().await.unwrap().is_empty());
        assert!(store.assignments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rubric_grades_come_back_ordered() {
        let store = seeded().await;

        let numbers: Vec<i64> = store
            .rubric_grades(10)
            .await
            .unwrap()
            .iter()
            .map(|g| g.grade_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn watermark_only_moves_forward() {
        let store = seeded().await;

        let later = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        assert!(store.advance_watermark(10, later).await.unwrap());
        assert!(!store.advance_watermark(10, earlier).await.unwrap());
        assert!(!store.advance_watermark(10, later).await.unwrap());
        assert_eq!(store.assignment(10).await.unwrap().unwrap().last_retrieved, later);

        let err = store.advance_watermark(99, later).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "assignment", id: 99 }));
    }

    #[tokio::test]
    async fn reseeding_keeps_watermark_and_adopted_description() {
        let store = seeded().await;

        let moved = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        store.advance_watermark(10, moved).await.unwrap();
        store
            .set_assignment_description(10, "Sum two numbers".to_string())
            .await
            .unwrap();
        let ids_before: Vec<u64> = store.rubric_grades(10).await.unwrap().iter().map(|g| g.id).collect();

        store.apply_seed(&seed()).await.unwrap();

        let assignment = store.assignment(10).await.unwrap().unwrap();
        assert_eq!(assignment.last_retrieved, moved);
        assert_eq!(assignment.description.as_deref(), Some("Sum two numbers"));
        let ids_after: Vec<u64> = store.rubric_grades(10).await.unwrap().iter().map(|g| g.id).collect();
        assert_eq!(ids_before, ids_after);
    }

    #[tokio::test]
    async fn reseeding_drops_removed_rubric_grades() {
        let store = seeded().await;
        let trimmed = SEED.replace(
            "[[assignments.rubric_grades]]\n        grade_number = 2\n        short_description = \"Minor issues\"\n",
            "",
        );
        store.apply_seed(&Seed::from_toml_str(&trimmed).unwrap()).await.unwrap();

        let numbers: Vec<i64> = store
            .rubric_grades(10)
            .await
            .unwrap()
            .iter()
            .map(|g| g.grade_number)
            .collect();
        assert_eq!(numbers, vec![1]);
    }

    #[tokio::test]
    async fn latest_submission_time_per_assignment() {
        let store = seeded().await;
        assert_eq!(store.latest_submission_time(10).await.unwrap(), None);

        store.insert_submission(new_submission("ann", 30)).await.unwrap();
        store.insert_submission(new_submission("bob", 10)).await.unwrap();

        assert_eq!(
            store.latest_submission_time(10).await.unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap())
        );
    }

    #[tokio::test]
    async fn updating_unknown_submission_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let ghost = new_submission("ann", 0).into_submission(99);
        let err = store.update_submission(&ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "submission", id: 99 }));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("grader_store_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("grader.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.apply_seed(&seed()).await.unwrap();
            store.insert_submission(new_submission("ann", 0)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let stored = reopened.submissions_with_status(Status::New).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].student_id, "ann");
        // 重新打开后 id 继续递增
        let next = reopened.insert_submission(new_submission("bob", 0)).await.unwrap();
        assert_eq!(next.id, stored[0].id + 1);

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
