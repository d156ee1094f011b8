use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, QueryBuilder, Sqlite};
use uuid::Uuid;

use super::{BatchPolicy, BatchSettings, ProjectStore};
use crate::auth::{
    hash_password, normalize_email, reject_unknown_account, verify_password, Authenticator,
    Principal,
};
use crate::file::{FileDraft, FileRecord};
use crate::project::{NewProject, Owner, Project};
use crate::{Error, Result};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    platform TEXT NOT NULL,
    owner TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner);
CREATE INDEX IF NOT EXISTS idx_projects_created ON projects(created_at);

CREATE TABLE IF NOT EXISTS project_files (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT '',
    is_folder INTEGER NOT NULL DEFAULT 0,
    content TEXT,
    last_modified TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_project ON project_files(project_id, position);
";

type ProjectRow = (String, String, String, String, String, Option<String>, String);
type FileRow = (String, String, String, i64, String, bool, Option<String>, String);

/// Projects and files in separate tables.
///
/// File rows are written in fixed-size batches, one multi-row INSERT per
/// batch, in input order. Batches are not wrapped in a transaction.
pub struct RelationalStore {
    pool: Pool<Sqlite>,
    batching: BatchSettings,
}

impl RelationalStore {
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            batching: BatchSettings::default(),
        })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            batching: BatchSettings::default(),
        })
    }

    #[must_use]
    pub const fn with_batching(mut self, batching: BatchSettings) -> Self {
        self.batching = batching;
        self
    }

    #[must_use]
    pub const fn batching(&self) -> &BatchSettings {
        &self.batching
    }

    async fn insert_project_row(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO projects (id, name, description, tags, platform, owner, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(serde_json::to_string(&project.tags)?)
        .bind(&project.platform)
        .bind(project.owner.map(|id| id.to_string()))
        .bind(format_timestamp(project.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_batch(
        &self,
        project_id: Uuid,
        batch: &[FileRecord],
        first_position: i64,
    ) -> Result<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO project_files \
             (id, project_id, position, name, size, type, is_folder, content, last_modified) ",
        );

        builder.push_values(batch.iter().zip(first_position..), |mut row, (record, position)| {
            row.push_bind(record.id.to_string())
                .push_bind(project_id.to_string())
                .push_bind(position)
                .push_bind(record.file.name.clone())
                .push_bind(i64::try_from(record.file.size).unwrap_or(i64::MAX))
                .push_bind(record.file.mime_type.clone())
                .push_bind(record.is_folder())
                .push_bind(record.content().map(str::to_string))
                .push_bind(format_timestamp(record.file.last_modified));
        });

        builder.build().execute(&self.pool).await?;

        Ok(())
    }

    /// Write `records` in chunks of `batch_size`, awaiting each chunk before
    /// starting the next.
    async fn insert_in_batches(
        &self,
        project_id: Uuid,
        records: &[FileRecord],
        first_position: i64,
        batch_size: usize,
    ) -> Result<()> {
        let batch_size = batch_size.max(1);
        let mut inserted = 0;
        let mut first_error = None;
        let mut position = first_position;

        for (index, batch) in records.chunks(batch_size).enumerate() {
            match self.insert_batch(project_id, batch, position).await {
                Ok(()) => {
                    inserted += batch.len();
                    tracing::debug!(
                        %project_id,
                        batch = index,
                        files = batch.len(),
                        "inserted file batch"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        %project_id,
                        batch = index,
                        error = %e,
                        "file batch insert failed"
                    );
                    first_error.get_or_insert(e);
                    if self.batching.policy == BatchPolicy::Abort {
                        break;
                    }
                }
            }
            position += i64::try_from(batch.len()).unwrap_or(i64::MAX);
        }

        match first_error {
            None => Ok(()),
            Some(source) => Err(Error::PartialInsert {
                project_id,
                inserted,
                submitted: records.len(),
                source: Box::new(source),
            }),
        }
    }

    async fn fetch_files(
        &self,
        project_ids: &[String],
    ) -> Result<HashMap<String, Vec<FileRecord>>> {
        let mut grouped: HashMap<String, Vec<FileRecord>> = HashMap::new();
        if project_ids.is_empty() {
            return Ok(grouped);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, project_id, name, size, type, is_folder, content, last_modified \
             FROM project_files WHERE project_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in project_ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(") ORDER BY project_id, position");

        let rows = builder
            .build_query_as::<FileRow>()
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let project_id = row.1.clone();
            grouped.entry(project_id).or_default().push(parse_file_row(row)?);
        }

        Ok(grouped)
    }

    async fn next_position(&self, project_id: Uuid) -> Result<i64> {
        let (next,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM project_files WHERE project_id = ?",
        )
        .bind(project_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(next)
    }

    async fn ensure_owned(&self, id: Uuid, owner: &Owner) -> Result<()> {
        let owner_id = owner.id().map(|o| o.to_string());
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM projects WHERE id = ? AND (? IS NULL OR owner = ?)")
                .bind(id.to_string())
                .bind(owner_id.clone())
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|_| ()).ok_or(Error::ProjectNotFound(id))
    }
}

#[async_trait::async_trait]
impl ProjectStore for RelationalStore {
    async fn create(&self, new_project: NewProject, owner: &Owner) -> Result<Project> {
        let (mut project, files) = new_project.into_project(owner)?;

        self.insert_project_row(&project).await?;

        let records: Vec<FileRecord> = files.into_iter().map(FileDraft::into_record).collect();
        self.insert_in_batches(project.id, &records, 0, self.batching.creation_batch)
            .await?;

        project.files = records;

        tracing::info!(
            project_id = %project.id,
            files = project.files.len(),
            "created project"
        );

        Ok(project)
    }

    async fn list_all(&self, owner: &Owner) -> Result<Vec<Project>> {
        let owner_id = owner.id().map(|o| o.to_string());
        let rows: Vec<ProjectRow> = sqlx::query_as(
            r"
            SELECT id, name, description, tags, platform, owner, created_at
            FROM projects
            WHERE (? IS NULL OR owner = ?)
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(owner_id.clone())
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.0.clone()).collect();
        let mut files = self.fetch_files(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let project_files = files.remove(&row.0).unwrap_or_default();
                parse_project_row(row, project_files)
            })
            .collect()
    }

    async fn get(&self, id: Uuid, owner: &Owner) -> Result<Project> {
        let owner_id = owner.id().map(|o| o.to_string());
        let row: ProjectRow = sqlx::query_as(
            r"
            SELECT id, name, description, tags, platform, owner, created_at
            FROM projects
            WHERE id = ? AND (? IS NULL OR owner = ?)
            ",
        )
        .bind(id.to_string())
        .bind(owner_id.clone())
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::ProjectNotFound(id))?;

        let mut files = self.fetch_files(std::slice::from_ref(&row.0)).await?;
        let project_files = files.remove(&row.0).unwrap_or_default();

        parse_project_row(row, project_files)
    }

    async fn add_files(
        &self,
        id: Uuid,
        files: Vec<FileDraft>,
        owner: &Owner,
    ) -> Result<Vec<FileRecord>> {
        self.ensure_owned(id, owner).await?;

        let records: Vec<FileRecord> = files.into_iter().map(FileDraft::into_record).collect();
        let first_position = self.next_position(id).await?;
        self.insert_in_batches(id, &records, first_position, self.batching.addition_batch)
            .await?;

        tracing::info!(project_id = %id, files = records.len(), "added files to project");

        Ok(records)
    }

    async fn delete_by_id(&self, id: Uuid, owner: &Owner) -> Result<()> {
        let owner_id = owner.id().map(|o| o.to_string());
        let result = sqlx::query("DELETE FROM projects WHERE id = ? AND (? IS NULL OR owner = ?)")
            .bind(id.to_string())
            .bind(owner_id.clone())
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id));
        }

        tracing::info!(project_id = %id, "deleted project");

        Ok(())
    }
}

#[async_trait::async_trait]
impl Authenticator for RelationalStore {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal> {
        let email = normalize_email(email);
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, email, password_hash FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, email, password_hash)) = row else {
            return Err(reject_unknown_account(password));
        };

        if !verify_password(password, &password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        Ok(Principal {
            id: parse_uuid(&id)?,
            email,
        })
    }

    async fn register(&self, email: &str, password: &str) -> Result<Principal> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation("Email and password are required".to_string()));
        }

        let principal = Principal {
            id: Uuid::new_v4(),
            email,
        };

        sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(principal.id.to_string())
            .bind(&principal.email)
            .bind(hash_password(password)?)
            .bind(format_timestamp(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    if db_err.is_unique_violation() {
                        return Error::DuplicateAccount(principal.email.clone());
                    }
                }
                Error::Database(e)
            })?;

        tracing::info!(user_id = %principal.id, "registered account");

        Ok(principal)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_error<E>(e: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Database(sqlx::Error::Decode(Box::new(e)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().map_err(decode_error)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(decode_error)
}

fn parse_project_row(row: ProjectRow, files: Vec<FileRecord>) -> Result<Project> {
    let (id, name, description, tags, platform, owner, created_at) = row;

    Ok(Project {
        id: parse_uuid(&id)?,
        name,
        description,
        tags: serde_json::from_str(&tags)?,
        created_at: parse_timestamp(&created_at)?,
        platform,
        owner: owner.as_deref().map(parse_uuid).transpose()?,
        files,
    })
}

fn parse_file_row(row: FileRow) -> Result<FileRecord> {
    let (id, _project_id, name, size, mime_type, is_folder, content, last_modified) = row;

    let size = u64::try_from(size).unwrap_or_default();
    let last_modified = parse_timestamp(&last_modified)?;
    let file = if is_folder {
        FileDraft::folder_entry(name, size, mime_type, last_modified)
    } else {
        FileDraft::file(name, size, mime_type, last_modified, content)
    };

    Ok(FileRecord {
        id: parse_uuid(&id)?,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file(name: &str) -> FileDraft {
        FileDraft::file(
            name,
            3,
            "text/plain",
            Utc::now(),
            Some("data:text/plain;base64,YWJj".to_string()),
        )
    }

    fn text_files(count: usize) -> Vec<FileDraft> {
        (0..count).map(|i| text_file(&format!("f{i}.txt"))).collect()
    }

    async fn poison(store: &RelationalStore) {
        sqlx::query(
            r"
            CREATE TRIGGER reject_poison BEFORE INSERT ON project_files
            WHEN NEW.name = 'poison.txt'
            BEGIN SELECT RAISE(ABORT, 'poisoned batch'); END;
            ",
        )
        .execute(&store.pool)
        .await
        .unwrap();
    }

    async fn file_row_count(store: &RelationalStore, project_id: Uuid) -> i64 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM project_files WHERE project_id = ?")
                .bind(project_id.to_string())
                .fetch_one(&store.pool)
                .await
                .unwrap();
        count
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = RelationalStore::open_memory().await.unwrap();
        let project = store
            .create(
                NewProject::new("Demo")
                    .with_description("desc")
                    .with_tag("a")
                    .with_tag("b")
                    .with_files(text_files(12)),
                &Owner::Local,
            )
            .await
            .unwrap();

        let loaded = store.get(project.id, &Owner::Local).await.unwrap();
        assert_eq!(loaded.name, "Demo");
        assert_eq!(loaded.tags, vec!["a", "b"]);
        assert_eq!(loaded.files.len(), 12);

        let names: Vec<_> = loaded.files.iter().map(FileRecord::name).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("f{i}.txt")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_folder_entries_round_trip_without_content() {
        let store = RelationalStore::open_memory().await.unwrap();
        let project = store
            .create(
                NewProject::new("p").with_files(vec![FileDraft::folder_entry(
                    "docs/readme.txt",
                    10,
                    "text/plain",
                    Utc::now(),
                )]),
                &Owner::Local,
            )
            .await
            .unwrap();

        let loaded = store.get(project.id, &Owner::Local).await.unwrap();
        assert!(loaded.files[0].is_folder());
        assert!(loaded.files[0].content().is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first_with_files() {
        let store = RelationalStore::open_memory().await.unwrap();
        let older = store
            .create(NewProject::new("older").with_files(text_files(2)), &Owner::Local)
            .await
            .unwrap();
        let newer = store
            .create(NewProject::new("newer"), &Owner::Local)
            .await
            .unwrap();

        let projects = store.list_all(&Owner::Local).await.unwrap();
        assert_eq!(projects[0].id, newer.id);
        assert_eq!(projects[1].id, older.id);
        assert_eq!(projects[1].files.len(), 2);
        assert!(projects[0].files.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_files() {
        let store = RelationalStore::open_memory().await.unwrap();
        let project = store
            .create(NewProject::new("p").with_files(text_files(7)), &Owner::Local)
            .await
            .unwrap();
        assert_eq!(file_row_count(&store, project.id).await, 7);

        store.delete_by_id(project.id, &Owner::Local).await.unwrap();

        assert_eq!(file_row_count(&store, project.id).await, 0);
        let ids: Vec<_> = store
            .list_all(&Owner::Local)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert!(!ids.contains(&project.id));
        assert!(matches!(
            store.delete_by_id(project.id, &Owner::Local).await,
            Err(Error::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_name_creates_nothing() {
        let store = RelationalStore::open_memory().await.unwrap();
        let result = store
            .create(NewProject::new(" ").with_files(text_files(2)), &Owner::Local)
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(store.list_all(&Owner::Local).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failed_batch() {
        let store = RelationalStore::open_memory().await.unwrap();
        poison(&store).await;

        let mut files = text_files(12);
        files[6] = text_file("poison.txt");

        let err = store
            .create(NewProject::new("partial").with_files(files), &Owner::Local)
            .await
            .unwrap_err();

        let Error::PartialInsert {
            project_id,
            inserted,
            submitted,
            ..
        } = err
        else {
            panic!("expected partial insert, got {err:?}");
        };
        assert_eq!(inserted, 5);
        assert_eq!(submitted, 12);

        // The project row stays, with only the first batch of files.
        let project = store.get(project_id, &Owner::Local).await.unwrap();
        assert_eq!(project.files.len(), 5);
    }

    #[tokio::test]
    async fn test_continue_policy_attempts_every_batch() {
        let store = RelationalStore::open_memory()
            .await
            .unwrap()
            .with_batching(BatchSettings {
                policy: BatchPolicy::Continue,
                ..BatchSettings::default()
            });
        poison(&store).await;

        let mut files = text_files(12);
        files[2] = text_file("poison.txt");

        let err = store
            .create(NewProject::new("partial").with_files(files), &Owner::Local)
            .await
            .unwrap_err();

        let Error::PartialInsert {
            project_id,
            inserted,
            submitted,
            ..
        } = err
        else {
            panic!("expected partial insert, got {err:?}");
        };
        assert_eq!(inserted, 7);
        assert_eq!(submitted, 12);
        assert_eq!(file_row_count(&store, project_id).await, 7);
    }

    #[tokio::test]
    async fn test_add_files_continues_positions() {
        let store = RelationalStore::open_memory().await.unwrap();
        let project = store
            .create(NewProject::new("p").with_files(text_files(2)), &Owner::Local)
            .await
            .unwrap();

        let added = store
            .add_files(
                project.id,
                vec![
                    text_file("x.txt"),
                    text_file("y.txt"),
                    text_file("z.txt"),
                    text_file("w.txt"),
                ],
                &Owner::Local,
            )
            .await
            .unwrap();
        assert_eq!(added.len(), 4);

        let loaded = store.get(project.id, &Owner::Local).await.unwrap();
        let names: Vec<_> = loaded.files.iter().map(FileRecord::name).collect();
        assert_eq!(names, vec!["f0.txt", "f1.txt", "x.txt", "y.txt", "z.txt", "w.txt"]);
    }

    #[tokio::test]
    async fn test_add_files_reports_partial_batches() {
        let store = RelationalStore::open_memory().await.unwrap();
        let project = store
            .create(NewProject::new("p"), &Owner::Local)
            .await
            .unwrap();
        poison(&store).await;

        let mut files = text_files(7);
        files[4] = text_file("poison.txt");

        let err = store
            .add_files(project.id, files, &Owner::Local)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PartialInsert { inserted: 3, submitted: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let store = RelationalStore::open_memory().await.unwrap();
        let alice = store.register("alice@example.com", "pw").await.unwrap();
        let bob = store.register("bob@example.com", "pw").await.unwrap();

        let project = store
            .create(NewProject::new("mine"), &alice.owner())
            .await
            .unwrap();

        assert_eq!(store.list_all(&alice.owner()).await.unwrap().len(), 1);
        assert!(store.list_all(&bob.owner()).await.unwrap().is_empty());
        assert!(matches!(
            store.get(project.id, &bob.owner()).await,
            Err(Error::ProjectNotFound(_))
        ));
        assert!(matches!(
            store.add_files(project.id, text_files(1), &bob.owner()).await,
            Err(Error::ProjectNotFound(_))
        ));
        assert!(store.delete_by_id(project.id, &bob.owner()).await.is_err());
        store
            .delete_by_id(project.id, &alice.owner())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sign_in() {
        let store = RelationalStore::open_memory().await.unwrap();
        let registered = store
            .register("Ada@Example.com", "correct horse")
            .await
            .unwrap();

        let principal = store
            .sign_in("ada@example.com", "correct horse")
            .await
            .unwrap();
        assert_eq!(principal, registered);

        assert!(matches!(
            store.sign_in("ada@example.com", "wrong").await,
            Err(Error::InvalidCredentials)
        ));
        assert!(matches!(
            store.sign_in("nobody@example.com", "x").await,
            Err(Error::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let store = RelationalStore::open_memory().await.unwrap();
        store.register("a@example.com", "pw").await.unwrap();
        assert!(matches!(
            store.register("A@example.com", "other").await,
            Err(Error::DuplicateAccount(_))
        ));
    }
}
