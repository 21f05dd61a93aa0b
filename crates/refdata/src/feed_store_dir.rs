//! Naming of per-feed store directories
//!
//! Each feed store lives in `<local_dir>/<SANITISED_FEED>___<feed uuid>`.
//! The uuid keeps two feeds apart when their names sanitise to the same
//! string and lets a restart find the store again after a feed rename.

/// Separates the sanitised feed name from the feed uuid
pub const FEED_STORE_DIR_DELIMITER: &str = "___";

/// Upper-case `feed_name`, replacing anything outside `[A-Z0-9_-]` with `_`
pub fn sanitise_feed_name(feed_name: &str) -> String {
    feed_name
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .map(|c| match c {
            'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

pub fn feed_store_dir_name(feed_name: &str, feed_uuid: &str) -> String {
    format!(
        "{}{}{}",
        sanitise_feed_name(feed_name),
        FEED_STORE_DIR_DELIMITER,
        feed_uuid
    )
}

/// Split a directory name into `(sanitised feed name, feed uuid)`
pub fn parse_feed_store_dir_name(dir_name: &str) -> Option<(&str, &str)> {
    let (feed, uuid) = dir_name.rsplit_once(FEED_STORE_DIR_DELIMITER)?;
    if feed.is_empty() || uuid.is_empty() {
        return None;
    }
    Some((feed, uuid))
}
