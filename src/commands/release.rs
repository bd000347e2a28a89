use crate::commands::db::{get_db_connection, get_release_rows};
use crate::analysis::readiness::compute_counts;
use crate::error::ReadinessError;
use crate::models::work_item::ReleaseView;
use std::path::Path;

/// Rows and headline counts for one release. Unknown releases yield an empty
/// view with zero counts.
pub async fn get_release(db_path: &Path, release_id: &str) -> Result<ReleaseView, ReadinessError> {
    let conn = get_db_connection(db_path)?;
    let rows = get_release_rows(&conn, release_id)?;
    let counts = compute_counts(&rows);

    log::debug!("release {release_id}: {} rows loaded", rows.len());

    Ok(ReleaseView {
        release_id: release_id.to_string(),
        counts,
        rows,
    })
}
