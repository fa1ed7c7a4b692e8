//! On-disk and remote naming scheme.
//!
//! ```text
//! <root>/<logical-path>.parts/<YYYYMMDDTHHMMSS>_<seq>_<uuid>.jsonl.part
//! <prefix>/<system>/<dataset>/dt=<YYYY-MM-DD>/<entity>[_<unique>]_<YYYY-MM-DD>.jsonl
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};

/// Suffix appended to a logical path to form its spool directory.
pub const PARTS_DIR_SUFFIX: &str = ".parts";

/// Suffix of a finished part file.
pub const PART_FILE_SUFFIX: &str = ".jsonl.part";

/// Suffix of a part file still being written.
pub(crate) const PART_TMP_SUFFIX: &str = ".tmp";

/// Part file name: second-precision UTC prefix, an in-process sequence and
/// a random UUID.
///
/// Names sort chronologically, and in write order for writes from one
/// process within the same second. The UUID alone keeps writers apart, so
/// concurrent processes never collide.
pub fn part_file_name(now: DateTime<Utc>) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}_{:010}_{}{}",
        now.format("%Y%m%dT%H%M%S"),
        SEQUENCE.fetch_add(1, Ordering::Relaxed),
        uuid::Uuid::new_v4().simple(),
        PART_FILE_SUFFIX
    )
}

/// Inputs of the default bronze path.
#[derive(Debug, Clone, Copy)]
pub struct BronzePath<'a> {
    /// Top-level prefix (default `bronze`).
    pub prefix: &'a str,
    /// Source system segment.
    pub system: &'a str,
    /// Dataset segment.
    pub dataset: &'a str,
    /// Entity used in the file name.
    pub entity: &'a str,
    /// Optional discriminator (e.g. a node name) keeping concurrent jobs apart.
    pub unique_id: Option<&'a str>,
}

impl BronzePath<'_> {
    /// Render the logical path for `date`.
    pub fn render(&self, date: NaiveDate) -> String {
        let dt = date.format("%Y-%m-%d");
        let file = match self.unique_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("{}_{}_{}.jsonl", self.entity, id, dt),
            None => format!("{}_{}.jsonl", self.entity, dt),
        };
        format!(
            "{}/{}/{}/dt={}/{}",
            self.prefix, self.system, self.dataset, dt, file
        )
    }
}

/// Expand `{dt}`, `{yyyy}`, `{mm}` and `{dd}` in a custom path template.
pub fn expand_path_template(template: &str, date: NaiveDate) -> String {
    template
        .replace("{dt}", &date.format("%Y-%m-%d").to_string())
        .replace("{yyyy}", &date.format("%Y").to_string())
        .replace("{mm}", &date.format("%m").to_string())
        .replace("{dd}", &date.format("%d").to_string())
}
