use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: Option<String> },
    ConnectionFailed { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{}", describe(.kind))]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

fn describe(kind: &DatabaseErrorKind) -> String {
    match kind {
        DatabaseErrorKind::NotFound { entity, id } => format!("{} {} not found", entity, id),
        DatabaseErrorKind::UniqueViolation { constraint } => format!(
            "unique constraint violated: {}",
            constraint.as_deref().unwrap_or("unknown")
        ),
        DatabaseErrorKind::ConnectionFailed { message } => {
            format!("database connection failed: {}", message)
        }
        DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
    }
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                Self::new(DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(str::to_string),
                })
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::ConnectionFailed {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    /// Name of the violated constraint, when the backend reports it.
    pub fn constraint(&self) -> Option<&str> {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => constraint.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let err = DatabaseError::not_found("Payment", 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Payment 42 not found");
    }

    #[test]
    fn row_not_found_is_unknown_kind() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(!err.is_unique_violation());
        assert!(matches!(err.kind, DatabaseErrorKind::Unknown { .. }));
    }
}
