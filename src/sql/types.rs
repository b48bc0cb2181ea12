//! Column type families.
//!
//! Vendors spell the same logical type many ways (`int4`, `BIGINT`,
//! `NUMBER(10,0)`, `INTEGER`). Join compatibility and inference scoring only
//! care about the family a declared type belongs to.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFamily {
    Integer,
    Decimal,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    Time,
    Uuid,
    Binary,
    Json,
    /// No declared type, or one we do not recognise.
    Unknown,
}

impl TypeFamily {
    /// Classify a declared column type.
    pub fn of(declared: &str) -> Self {
        let lower = declared.trim().to_lowercase();
        // Strip length/precision: VARCHAR(255), NUMERIC(10, 2)
        let base = lower.split('(').next().unwrap_or("").trim();

        if base.is_empty() {
            return TypeFamily::Unknown;
        }

        match base {
            "uuid" | "uniqueidentifier" => return TypeFamily::Uuid,
            "bool" | "boolean" | "bit" => return TypeFamily::Boolean,
            "date" => return TypeFamily::Date,
            "time" | "time without time zone" | "time with time zone" => return TypeFamily::Time,
            "json" | "jsonb" => return TypeFamily::Json,
            "money" | "smallmoney" => return TypeFamily::Decimal,
            "interval" | "point" => return TypeFamily::Unknown,
            _ => {}
        }

        if base.contains("int") || base == "serial" || base == "bigserial" {
            TypeFamily::Integer
        } else if base.contains("dec") || base.contains("numeric") || base == "number" {
            // NUMERIC(10,0) and NUMBER(10) hold integers
            let zero_scale = lower.replace(' ', "").ends_with(",0)");
            let number_without_scale = base == "number" && lower.contains('(') && !lower.contains(',');
            if zero_scale || number_without_scale {
                TypeFamily::Integer
            } else {
                TypeFamily::Decimal
            }
        } else if base.contains("float")
            || base.contains("double")
            || base.contains("real")
        {
            TypeFamily::Float
        } else if base.contains("timestamp") || base.contains("datetime") {
            TypeFamily::Timestamp
        } else if base.contains("char")
            || base.contains("text")
            || base.contains("string")
            || base.contains("clob")
            || base == "name"
        {
            TypeFamily::Text
        } else if base.contains("blob") || base.contains("binary") || base == "bytea" {
            TypeFamily::Binary
        } else {
            TypeFamily::Unknown
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeFamily::Integer | TypeFamily::Decimal | TypeFamily::Float
        )
    }

    fn is_temporal(self) -> bool {
        matches!(self, TypeFamily::Date | TypeFamily::Timestamp)
    }

    /// Whether values of the two families can be compared in an equi-join.
    ///
    /// Unknown types are never reported as a mismatch.
    pub fn joinable_with(self, other: TypeFamily) -> bool {
        self == other
            || self == TypeFamily::Unknown
            || other == TypeFamily::Unknown
            || (self.is_numeric() && other.is_numeric())
            || (self.is_temporal() && other.is_temporal())
            || matches!(
                (self, other),
                (TypeFamily::Uuid, TypeFamily::Text) | (TypeFamily::Text, TypeFamily::Uuid)
            )
    }
}

/// Whether two declared types can be equi-joined.
pub fn types_joinable(left: &str, right: &str) -> bool {
    TypeFamily::of(left).joinable_with(TypeFamily::of(right))
}
