//! PostgreSQL/TimescaleDB column type tokens.

use std::fmt;

/// Common column type tokens used in schema descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    BigInt,
    Integer,
    SmallInt,
    Serial,
    BigSerial,
    Real,
    DoublePrecision,
    Float,
    Decimal,
    Boolean,
    Text,
    VarChar,
    Timestamp,
    TimestampTz,
    Date,
    Jsonb,
    Uuid,
    Bytea,
}

impl PgType {
    pub const ALL: &'static [PgType] = &[
        Self::BigInt,
        Self::Integer,
        Self::SmallInt,
        Self::Serial,
        Self::BigSerial,
        Self::Real,
        Self::DoublePrecision,
        Self::Float,
        Self::Decimal,
        Self::Boolean,
        Self::Text,
        Self::VarChar,
        Self::Timestamp,
        Self::TimestampTz,
        Self::Date,
        Self::Jsonb,
        Self::Uuid,
        Self::Bytea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Integer => "INTEGER",
            Self::SmallInt => "SMALLINT",
            Self::Serial => "SERIAL",
            Self::BigSerial => "BIGSERIAL",
            Self::Real => "REAL",
            Self::DoublePrecision => "DOUBLE PRECISION",
            Self::Float => "FLOAT",
            Self::Decimal => "DECIMAL",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
            Self::VarChar => "VARCHAR",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Date => "DATE",
            Self::Jsonb => "JSONB",
            Self::Uuid => "UUID",
            Self::Bytea => "BYTEA",
        }
    }

    /// `VARCHAR(n)`
    pub fn varchar(length: u32) -> String {
        format!("{}({})", Self::VarChar.as_str(), length)
    }

    /// `DECIMAL(precision, scale)`
    pub fn decimal(precision: u32, scale: u32) -> String {
        format!("{}({}, {})", Self::Decimal.as_str(), precision, scale)
    }

    /// Look up a token case-insensitively, ignoring any `(...)` modifier.
    pub fn parse(token: &str) -> Option<Self> {
        let base = token.split('(').next().unwrap_or(token).trim();
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(base))
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PgType> for String {
    fn from(ty: PgType) -> Self {
        ty.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        assert_eq!(PgType::VarChar.as_str(), "VARCHAR");
        assert_eq!(PgType::BigInt.as_str(), "BIGINT");
        assert_eq!(PgType::DoublePrecision.as_str(), "DOUBLE PRECISION");
        assert_eq!(PgType::TimestampTz.as_str(), "TIMESTAMPTZ");
        assert_eq!(PgType::Jsonb.to_string(), "JSONB");
    }

    #[test]
    fn test_parameterized_tokens() {
        assert_eq!(PgType::varchar(50), "VARCHAR(50)");
        assert_eq!(PgType::varchar(255), "VARCHAR(255)");
        assert_eq!(PgType::decimal(5, 2), "DECIMAL(5, 2)");
    }

    #[test]
    fn test_parse() {
        assert_eq!(PgType::parse("varchar(100)"), Some(PgType::VarChar));
        assert_eq!(PgType::parse("double precision"), Some(PgType::DoublePrecision));
        assert_eq!(PgType::parse("geometry"), None);
        for ty in PgType::ALL {
            assert_eq!(PgType::parse(ty.as_str()), Some(*ty));
        }
    }
}
