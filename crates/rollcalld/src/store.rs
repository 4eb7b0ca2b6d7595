//! Student directory: the `students` table in SQLite or Postgres.
//!
//! On SQLite one background connection thread (`tokio-rusqlite`) serialises
//! every statement. On Postgres a `sqlx` pool is used. Either way the unique
//! index on `mat_number` plus the registration transaction are the only
//! coordination concurrent registrations need.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row as _;
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::config::DatabaseUrl;
use crate::faces::StagedImage;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    mat_number TEXT NOT NULL UNIQUE,
    image_path TEXT NOT NULL,
    registered_at TEXT NOT NULL
);";

const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    mat_number TEXT NOT NULL UNIQUE,
    image_path TEXT NOT NULL,
    registered_at TEXT NOT NULL
)";

const STUDENT_COLUMNS: &str = "id, name, mat_number, image_path, registered_at";

/// SQLSTATE for `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student with matriculation number {0} already exists")]
    Duplicate(String),
    #[error("database: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("database connection: {0}")]
    Connection(#[from] tokio_rusqlite::Error),
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("reference image: {0}")]
    Image(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub mat_number: String,
    pub image_path: String,
    pub registered_at: String,
}

impl Student {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            mat_number: row.get(2)?,
            image_path: row.get(3)?,
            registered_at: row.get(4)?,
        })
    }

    fn from_pg_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            mat_number: row.try_get("mat_number")?,
            image_path: row.try_get("image_path")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub mat_number: String,
}

#[derive(Clone)]
enum Backend {
    Sqlite(Connection),
    Postgres(PgPool),
}

/// Clone-safe handle to the directory.
#[derive(Clone)]
pub struct StudentStore {
    backend: Backend,
}

impl StudentStore {
    /// Open the backend `url` names and ensure the schema.
    pub async fn connect(url: &DatabaseUrl) -> Result<Self, StoreError> {
        match url {
            DatabaseUrl::Sqlite(path) => Self::open(path).await,
            DatabaseUrl::Postgres(url) => Self::open_postgres(url).await,
        }
    }

    /// Open (creating if needed) a SQLite database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            backend: Backend::Sqlite(Connection::open(path).await?),
        };
        store.init_schema().await?;
        tracing::info!(path = %path.display(), "student directory opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            backend: Backend::Sqlite(Connection::open_in_memory().await?),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Connect a pool to a Postgres server and ensure the schema.
    ///
    /// Connections are checked before use and recycled after five minutes.
    pub async fn open_postgres(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .test_before_acquire(true)
            .max_lifetime(Duration::from_secs(300))
            .connect(url)
            .await?;
        let store = Self {
            backend: Backend::Postgres(pool),
        };
        store.init_schema().await?;
        tracing::info!("student directory opened on postgres");
        Ok(store)
    }

    /// Create the table if missing. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                conn.call(|conn| {
                    conn.execute_batch(SCHEMA)?;
                    Ok(())
                })
                .await?;
            }
            Backend::Postgres(pool) => {
                sqlx::query(POSTGRES_SCHEMA).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Insert a student and move its staged image into place, atomically.
    ///
    /// The row is inserted inside a transaction; the staged file is renamed
    /// onto its final path only after the insert succeeds, and the
    /// transaction commits only after the rename. A duplicate matriculation
    /// number leaves both the table and the image directory untouched.
    /// The staged file is not removed on failure; that is the caller's job.
    pub async fn register(&self, student: NewStudent, image: StagedImage) -> Result<Student, StoreError> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                conn.call(move |conn| Ok(insert_with_image(conn, student, image)))
                    .await?
            }
            Backend::Postgres(pool) => pg_insert_with_image(pool, student, image).await,
        }
    }

    pub async fn find_by_mat_number(&self, mat_number: &str) -> Result<Option<Student>, StoreError> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE mat_number = ?1");
                let mat_number = mat_number.to_string();
                let student = conn
                    .call(move |conn| {
                        let student = conn
                            .query_row(&sql, params![mat_number], Student::from_row)
                            .optional()?;
                        Ok(student)
                    })
                    .await?;
                Ok(student)
            }
            Backend::Postgres(pool) => {
                let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE mat_number = $1");
                let row = sqlx::query(&sql).bind(mat_number).fetch_optional(pool).await?;
                Ok(row.as_ref().map(Student::from_pg_row).transpose()?)
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Student>, StoreError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY id");
        match &self.backend {
            Backend::Sqlite(conn) => {
                let students = conn
                    .call(move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let students = stmt
                            .query_map([], Student::from_row)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        Ok(students)
                    })
                    .await?;
                Ok(students)
            }
            Backend::Postgres(pool) => {
                let rows = sqlx::query(&sql).fetch_all(pool).await?;
                Ok(rows.iter().map(Student::from_pg_row).collect::<Result<_, _>>()?)
            }
        }
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        const SQL: &str = "SELECT COUNT(*) FROM students";
        match &self.backend {
            Backend::Sqlite(conn) => Ok(conn
                .call(|conn| Ok(conn.query_row(SQL, [], |row| row.get(0))?))
                .await?),
            Backend::Postgres(pool) => Ok(sqlx::query_scalar::<_, i64>(SQL).fetch_one(pool).await?),
        }
    }
}

fn insert_with_image(
    conn: &mut rusqlite::Connection,
    student: NewStudent,
    image: StagedImage,
) -> Result<Student, StoreError> {
    let tx = conn.transaction()?;
    let image_path = image.target.to_string_lossy().into_owned();
    let registered_at = Utc::now().to_rfc3339();

    let inserted = tx.execute(
        "INSERT INTO students (name, mat_number, image_path, registered_at) VALUES (?1, ?2, ?3, ?4)",
        params![student.name, student.mat_number, image_path, registered_at],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(StoreError::Duplicate(student.mat_number));
        }
        Err(err) => return Err(err.into()),
    }
    let id = tx.last_insert_rowid();

    // Dropping `tx` on the error path rolls the insert back.
    std::fs::rename(&image.staged, &image.target)?;

    if let Err(err) = tx.commit() {
        if let Err(e) = std::fs::remove_file(&image.target) {
            tracing::warn!(path = %image.target.display(), error = %e, "failed to remove uncommitted reference image");
        }
        return Err(err.into());
    }

    Ok(Student {
        id,
        name: student.name,
        mat_number: student.mat_number,
        image_path,
        registered_at,
    })
}

async fn pg_insert_with_image(
    pool: &PgPool,
    student: NewStudent,
    image: StagedImage,
) -> Result<Student, StoreError> {
    let mut tx = pool.begin().await?;
    let image_path = image.target.to_string_lossy().into_owned();
    let registered_at = Utc::now().to_rfc3339();

    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO students (name, mat_number, image_path, registered_at) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(&student.name)
    .bind(&student.mat_number)
    .bind(&image_path)
    .bind(&registered_at)
    .fetch_one(&mut *tx)
    .await;
    let id = match inserted {
        Ok(id) => id,
        Err(err) if is_pg_unique_violation(&err) => {
            return Err(StoreError::Duplicate(student.mat_number));
        }
        Err(err) => return Err(err.into()),
    };

    // Dropping `tx` on the error path rolls the insert back.
    tokio::fs::rename(&image.staged, &image.target).await?;

    if let Err(err) = tx.commit().await {
        if let Err(e) = tokio::fs::remove_file(&image.target).await {
            tracing::warn!(path = %image.target.display(), error = %e, "failed to remove uncommitted reference image");
        }
        return Err(err.into());
    }

    Ok(Student {
        id,
        name: student.name,
        mat_number: student.mat_number,
        image_path,
        registered_at,
    })
}

/// Only the unique index counts; NOT NULL and CHECK failures are real errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn is_pg_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == PG_UNIQUE_VIOLATION)
}
