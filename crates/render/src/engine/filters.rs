//! Power BI filter JSON schemas, marshaled into the shapes the embedded
//! report renderer feeds to `report.setFilters`/the load configuration.
//! See `IFilter`/`IBasicFilter`/`IAdvancedFilter` at
//! https://github.com/microsoft/powerbi-models/blob/master/src/models.ts.

use reportbot_shared::queue::messages::FilterMessage;
use serde::Serialize;
use serde_json::Value;

const FILTER_SCHEMA_BASIC: &str = "http://powerbi.com/product/schema#basic";
const FILTER_SCHEMA_ADVANCED: &str = "http://powerbi.com/product/schema#advanced";

#[derive(Debug, Clone, Copy)]
enum FilterType {
    Advanced,
    Basic,
}

impl Serialize for FilterType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(match self {
            FilterType::Advanced => 0,
            FilterType::Basic => 1,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ColumnTarget<'a> {
    table: &'a str,
    column: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct Condition<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    operator: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct BasicFilter<'a> {
    #[serde(rename = "$schema")]
    schema: &'a str,
    target: ColumnTarget<'a>,
    #[serde(rename = "filterType")]
    filter_type: FilterType,
    operator: &'a str,
    values: [&'a str; 1],
}

#[derive(Debug, Clone, Serialize)]
struct AdvancedFilter<'a> {
    #[serde(rename = "$schema")]
    schema: &'a str,
    target: ColumnTarget<'a>,
    #[serde(rename = "filterType")]
    filter_type: FilterType,
    #[serde(rename = "logicalOperator", skip_serializing_if = "Option::is_none")]
    logical_operator: Option<&'a str>,
    conditions: Vec<Condition<'a>>,
}

/// Every filter a task carries is sent through the advanced filter schema
/// regardless of its stored kind — the same simplification
/// `newReportLoadConfiguration` makes, which always calls `newAdvancedFilter`
/// rather than branching on `FilterOptions.LogicalOperator` being empty.
pub fn to_report_filter(f: &FilterMessage) -> Value {
    let mut conditions = vec![Condition {
        value: Some(f.value.as_str()),
        operator: f.condition_operator.as_str(),
    }];

    let logical_operator = f.logical_operator.as_deref().filter(|s| !s.is_empty());
    if let Some(logical_operator) = logical_operator {
        conditions.push(Condition {
            value: f.second_value.as_deref(),
            operator: f.second_condition_operator.as_deref().unwrap_or(""),
        });
    }

    let filter = AdvancedFilter {
        schema: FILTER_SCHEMA_ADVANCED,
        target: ColumnTarget {
            table: &f.table,
            column: &f.column,
        },
        filter_type: FilterType::Advanced,
        logical_operator,
        conditions,
    };
    serde_json::to_value(filter).unwrap_or(Value::Null)
}

/// Basic "in" filter, kept for completeness with `newBasicFilter`
/// even though the worker-side conversion always takes the
/// advanced path; retained for a future caller that wants to build an
/// `IBasicFilter` directly instead of going through `FilterMessage`.
pub fn basic_in_filter(table: &str, column: &str, value: &str) -> Value {
    let filter = BasicFilter {
        schema: FILTER_SCHEMA_BASIC,
        target: ColumnTarget { table, column },
        filter_type: FilterType::Basic,
        operator: "In",
        values: [value],
    };
    serde_json::to_value(filter).unwrap_or(Value::Null)
}

/// Human-readable filter description, mirroring `FilterOptions.String()`,
/// used to disambiguate rendered screenshot filenames when a filter is
/// applied to a report.
pub fn describe(f: &FilterMessage) -> String {
    match f.logical_operator.as_deref().filter(|s| !s.is_empty()) {
        Some(logical_operator) => format!(
            "{}.{} {} {} {} {} {}",
            f.table,
            f.column,
            f.condition_operator,
            f.value,
            logical_operator,
            f.second_condition_operator.as_deref().unwrap_or(""),
            f.second_value.as_deref().unwrap_or(""),
        ),
        None => format!("{}.{} is {}", f.table, f.column, f.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_filter() -> FilterMessage {
        FilterMessage {
            table: "Sales".to_string(),
            column: "Region".to_string(),
            value: "West".to_string(),
            logical_operator: None,
            condition_operator: "Is".to_string(),
            second_value: None,
            second_condition_operator: None,
        }
    }

    #[test]
    fn describes_a_simple_filter() {
        assert_eq!(describe(&simple_filter()), "Sales.Region is West");
    }

    #[test]
    fn describes_a_compound_filter() {
        let mut f = simple_filter();
        f.logical_operator = Some("And".to_string());
        f.second_value = Some("East".to_string());
        f.second_condition_operator = Some("IsNot".to_string());
        assert_eq!(describe(&f), "Sales.Region Is West And IsNot East");
    }

    #[test]
    fn marshals_single_condition_without_logical_operator() {
        let v = to_report_filter(&simple_filter());
        assert_eq!(v["$schema"], FILTER_SCHEMA_ADVANCED);
        assert_eq!(v["conditions"].as_array().unwrap().len(), 1);
    }
}
