use crate::db::connection::Database;
use crate::error::Result;
use crate::extract::MetadataCatalog;

impl Database {
    /// The metadata catalog the merger stored alongside the data.
    pub async fn catalog(&self) -> Result<MetadataCatalog> {
        self.execute(|conn| MetadataCatalog::load_from(conn)).await
    }
}
