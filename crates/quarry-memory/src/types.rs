/// Strongly typed wrapper for index-snapshot row IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct SnapshotId(pub i64);

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_id_display() {
        assert_eq!(format!("{}", SnapshotId(42)), "42");
    }

    #[test]
    fn snapshot_id_ordering() {
        assert!(SnapshotId(1) < SnapshotId(2));
        assert_eq!(SnapshotId(3), SnapshotId(3));
    }
}
