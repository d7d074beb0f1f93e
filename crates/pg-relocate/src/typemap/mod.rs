//! Column type rendering and type classification.

use crate::catalog::ColumnDescriptor;

/// Render a column's type as it appears in `CREATE TABLE`.
pub fn render_column_type(column: &ColumnDescriptor) -> String {
    let data_type = column.data_type.as_str();
    match data_type {
        "ARRAY" => array_cast(&column.udt_name),
        "USER-DEFINED" => column.udt_name.clone(),
        "character varying" | "character" | "bit" | "bit varying" => match column.max_length {
            Some(len) if len > 0 => format!("{}({})", data_type, len),
            _ => data_type.to_string(),
        },
        "numeric" => match (column.precision, column.scale) {
            (Some(p), Some(s)) if p > 0 => format!("numeric({},{})", p, s),
            (Some(p), None) if p > 0 => format!("numeric({})", p),
            _ => "numeric".to_string(),
        },
        "interval" => {
            let mut rendered = "interval".to_string();
            let fields = column.interval_fields.as_deref().filter(|f| !f.is_empty());
            if let Some(fields) = fields {
                rendered.push(' ');
                rendered.push_str(&fields.to_lowercase());
            }
            // Precision is only legal on a trailing SECOND field.
            let takes_precision = fields.map_or(true, |f| f.to_uppercase().ends_with("SECOND"));
            if let (Some(p), true) = (column.datetime_precision, takes_precision) {
                rendered.push_str(&format!("({})", p));
            }
            rendered
        }
        _ => match (column.datetime_precision, data_type.split_once(' ')) {
            (Some(p), Some((base @ ("timestamp" | "time"), zone))) => {
                format!("{}({}) {}", base, p, zone)
            }
            _ => data_type.to_string(),
        },
    }
}

/// Integer bounds for a sequence or column type, `None` for non-integers.
pub fn integer_bounds(data_type: &str) -> Option<(i64, i64)> {
    match data_type {
        "smallint" | "int2" => Some((i16::MIN as i64, i16::MAX as i64)),
        "integer" | "int" | "int4" => Some((i32::MIN as i64, i32::MAX as i64)),
        "bigint" | "int8" => Some((i64::MIN, i64::MAX)),
        _ => None,
    }
}

pub fn is_integer_type(data_type: &str) -> bool {
    integer_bounds(data_type).is_some()
}

pub fn is_array_type(data_type: &str, udt_name: &str) -> bool {
    data_type == "ARRAY" || udt_name.starts_with('_')
}

pub fn is_timestamptz_type(data_type: &str, udt_name: &str) -> bool {
    data_type == "timestamp with time zone" || udt_name == "timestamptz"
}

pub fn is_json_type(udt_name: &str) -> bool {
    matches!(udt_name, "json" | "jsonb")
}

/// Array element cast for a `_elem` udt name, e.g. `_int4` -> `int4[]`.
pub fn array_cast(udt_name: &str) -> String {
    match udt_name.strip_prefix('_') {
        Some(element) if !element.is_empty() => format!("{}[]", element),
        _ => "text[]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(data_type: &str, udt_name: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("c", data_type, udt_name)
    }

    #[test]
    fn test_array_types() {
        assert_eq!(render_column_type(&column("ARRAY", "_int4")), "int4[]");
        assert_eq!(render_column_type(&column("ARRAY", "_mood")), "mood[]");
        assert_eq!(render_column_type(&column("ARRAY", "tags")), "text[]");
    }

    #[test]
    fn test_sized_character_types() {
        let mut c = column("character varying", "varchar");
        c.max_length = Some(255);
        assert_eq!(render_column_type(&c), "character varying(255)");
        c.max_length = None;
        assert_eq!(render_column_type(&c), "character varying");

        let mut c = column("character", "bpchar");
        c.max_length = Some(2);
        assert_eq!(render_column_type(&c), "character(2)");
    }

    #[test]
    fn test_numeric_precision_and_scale() {
        let mut c = column("numeric", "numeric");
        c.precision = Some(12);
        c.scale = Some(2);
        assert_eq!(render_column_type(&c), "numeric(12,2)");
        c.scale = None;
        assert_eq!(render_column_type(&c), "numeric(12)");
        c.precision = None;
        assert_eq!(render_column_type(&c), "numeric");
    }

    #[test]
    fn test_integer_precision_not_rendered() {
        let mut c = column("integer", "int4");
        c.precision = Some(32);
        c.scale = Some(0);
        assert_eq!(render_column_type(&c), "integer");
    }

    #[test]
    fn test_user_defined_uses_udt_name() {
        assert_eq!(render_column_type(&column("USER-DEFINED", "subscription_tier")), "subscription_tier");
        assert_eq!(render_column_type(&column("USER-DEFINED", "geometry")), "geometry");
    }

    #[test]
    fn test_plain_types_pass_through() {
        assert_eq!(render_column_type(&column("timestamp with time zone", "timestamptz")), "timestamp with time zone");
        assert_eq!(render_column_type(&column("jsonb", "jsonb")), "jsonb");
        assert_eq!(render_column_type(&column("uuid", "uuid")), "uuid");
    }

    #[test]
    fn test_declared_datetime_precision_kept() {
        let mut c = column("timestamp without time zone", "timestamp");
        c.datetime_precision = Some(3);
        assert_eq!(render_column_type(&c), "timestamp(3) without time zone");

        let mut c = column("time with time zone", "timetz");
        c.datetime_precision = Some(0);
        assert_eq!(render_column_type(&c), "time(0) with time zone");

        let mut c = column("interval", "interval");
        assert_eq!(render_column_type(&c), "interval");
        c.interval_fields = Some("DAY TO SECOND".into());
        c.datetime_precision = Some(2);
        assert_eq!(render_column_type(&c), "interval day to second(2)");
        c.interval_fields = Some("YEAR".into());
        assert_eq!(render_column_type(&c), "interval year");
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(integer_bounds("integer"), Some((-2147483648, 2147483647)));
        assert_eq!(integer_bounds("bigint"), Some((i64::MIN, 9223372036854775807)));
        assert_eq!(integer_bounds("text"), None);
    }

    #[test]
    fn test_classification() {
        assert!(is_array_type("ARRAY", "_text"));
        assert!(is_timestamptz_type("timestamp with time zone", "timestamptz"));
        assert!(!is_timestamptz_type("timestamp without time zone", "timestamp"));
        assert!(is_json_type("jsonb"));
        assert_eq!(array_cast("_int4"), "int4[]");
    }
}
