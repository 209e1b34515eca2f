use serde::Serialize;
use sqlx::FromRow;

/// Read-only view of a user. Accounts and credentials are managed elsewhere;
/// this service only resolves notification addresses and compares ownership.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}
