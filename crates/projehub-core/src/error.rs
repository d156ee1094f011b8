use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(uuid::Uuid),

    #[error("File not found: {0}")]
    FileNotFound(uuid::Uuid),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Sign-in required")]
    Unauthenticated,

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Invalid file content: {0}")]
    InvalidContent(String),

    #[error("Stored {inserted} of {submitted} files for project {project_id}: {source}")]
    PartialInsert {
        project_id: uuid::Uuid,
        inserted: usize,
        submitted: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
