use serde::Serialize;
use sqlx::FromRow;

/// One entry of a blob store enumeration
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct BlobInfo {
    pub id: String,
    pub length: i64,
}
