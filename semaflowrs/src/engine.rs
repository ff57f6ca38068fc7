//! The closed engine enumeration. Its only observable effect inside the
//! compiler core is the `use_column_alias_in_group_by` flag:
//! everything else engine-specific belongs to the peripheral renderer/dialect.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineKind {
    DuckDb,
    Postgres,
    BigQuery,
    Snowflake,
    Redshift,
}

impl EngineKind {
    /// True for engines that permit referencing a SELECT's column alias in
    /// its own GROUP BY clause (as opposed to repeating the full expression).
    pub fn use_column_alias_in_group_by(self) -> bool {
        match self {
            EngineKind::DuckDb | EngineKind::Postgres | EngineKind::BigQuery | EngineKind::Snowflake => true,
            EngineKind::Redshift => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redshift_does_not_allow_alias_in_group_by() {
        assert!(!EngineKind::Redshift.use_column_alias_in_group_by());
        assert!(EngineKind::DuckDb.use_column_alias_in_group_by());
    }
}
