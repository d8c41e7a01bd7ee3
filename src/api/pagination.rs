use serde::Serialize;

const MAX_LIMIT: i64 = 1000;

pub(crate) const fn default_limit() -> i64 {
    100
}

/// Clamps client paging input to `skip >= 0` and `1 <= limit <= 1000`.
pub(crate) fn normalize(skip: i64, limit: i64) -> (i64, i64) {
    (skip.max(0), limit.clamp(1, MAX_LIMIT))
}

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedResponse<T> {
    pub(crate) items: Vec<T>,
    pub(crate) total_count: i64,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_bounds() {
        assert_eq!(normalize(-5, 0), (0, 1));
        assert_eq!(normalize(20, 50), (20, 50));
        assert_eq!(normalize(0, 10_000), (0, MAX_LIMIT));
    }
}
