use serde::{Deserialize, Serialize};

/// Нарушенное правило согласованности конфигурации
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationRule {
    // Source / Field
    DuplicateFieldPath,
    AggregationsOnNonNumericField,

    // Metric
    SourceOwnerMismatch,
    FieldNotInSource,
    CountForbidsValueField,
    ValueFieldRequired,
    ValueFieldNotNumeric,
    AggregationNotAllowed,
    CustomRangeRequired,
    CustomRangeInverted,
    CustomRangeForbidden,
    DateFieldRequired,
    DateFieldNotDate,
    ComparisonUndefined,

    // Filters
    FilterValueRequired,
    FilterValueForbidden,
    BetweenNeedsTwoBounds,
    ListValueRequired,
    ValueTypeMismatch,

    // Dimensions
    DimensionFieldType,
    DuplicateDimension,

    // Definition
    MetricRequired,
    MetricForbidden,
    ExpressionRequired,
    ExpressionForbidden,
    MetricOwnerMismatch,
    ComponentsOnMetricDefinition,
    DuplicateAlias,
    InvalidAlias,
    UnknownAlias,
    MalformedExpression,
    MissingReference,

    // Widget
    WidgetOwnerMismatch,
    TargetAliasRequired,
    TargetAliasForbidden,

    // Storage
    UnreadableRecord,
}

impl ViolationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationRule::DuplicateFieldPath => "duplicate_field_path",
            ViolationRule::AggregationsOnNonNumericField => "aggregations_on_non_numeric_field",
            ViolationRule::SourceOwnerMismatch => "source_owner_mismatch",
            ViolationRule::FieldNotInSource => "field_not_in_source",
            ViolationRule::CountForbidsValueField => "count_forbids_value_field",
            ViolationRule::ValueFieldRequired => "value_field_required",
            ViolationRule::ValueFieldNotNumeric => "value_field_not_numeric",
            ViolationRule::AggregationNotAllowed => "aggregation_not_allowed",
            ViolationRule::CustomRangeRequired => "custom_range_required",
            ViolationRule::CustomRangeInverted => "custom_range_inverted",
            ViolationRule::CustomRangeForbidden => "custom_range_forbidden",
            ViolationRule::DateFieldRequired => "date_field_required",
            ViolationRule::DateFieldNotDate => "date_field_not_date",
            ViolationRule::ComparisonUndefined => "comparison_undefined",
            ViolationRule::FilterValueRequired => "filter_value_required",
            ViolationRule::FilterValueForbidden => "filter_value_forbidden",
            ViolationRule::BetweenNeedsTwoBounds => "between_needs_two_bounds",
            ViolationRule::ListValueRequired => "list_value_required",
            ViolationRule::ValueTypeMismatch => "value_type_mismatch",
            ViolationRule::DimensionFieldType => "dimension_field_type",
            ViolationRule::DuplicateDimension => "duplicate_dimension",
            ViolationRule::MetricRequired => "metric_required",
            ViolationRule::MetricForbidden => "metric_forbidden",
            ViolationRule::ExpressionRequired => "expression_required",
            ViolationRule::ExpressionForbidden => "expression_forbidden",
            ViolationRule::MetricOwnerMismatch => "metric_owner_mismatch",
            ViolationRule::ComponentsOnMetricDefinition => "components_on_metric_definition",
            ViolationRule::DuplicateAlias => "duplicate_alias",
            ViolationRule::InvalidAlias => "invalid_alias",
            ViolationRule::UnknownAlias => "unknown_alias",
            ViolationRule::MalformedExpression => "malformed_expression",
            ViolationRule::MissingReference => "missing_reference",
            ViolationRule::WidgetOwnerMismatch => "widget_owner_mismatch",
            ViolationRule::TargetAliasRequired => "target_alias_required",
            ViolationRule::TargetAliasForbidden => "target_alias_forbidden",
            ViolationRule::UnreadableRecord => "unreadable_record",
        }
    }
}

/// Одно нарушение: путь к полю конфигурации и правило
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Например, `metric.filters[2].value` или `widget.custom_end_override`
    pub path: String,
    pub rule: ViolationRule,
    pub message: String,
}

/// Результат проверки: пустой список означает валидную конфигурацию
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn push(&mut self, path: impl Into<String>, rule: ViolationRule, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            rule,
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    pub fn has_rule(&self, rule: ViolationRule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_keeps_insertion_order() {
        let mut report = ValidationReport::new();
        assert!(report.is_valid());
        report.push("metric.value_field", ViolationRule::ValueFieldRequired, "required");
        report.push("metric.custom_end", ViolationRule::CustomRangeInverted, "inverted");

        assert!(!report.is_valid());
        assert_eq!(report.violations[1].path, "metric.custom_end");
        assert!(report.has_rule(ViolationRule::CustomRangeInverted));
        assert_eq!(
            serde_json::to_string(&ViolationRule::CustomRangeInverted).unwrap(),
            format!("\"{}\"", ViolationRule::CustomRangeInverted.as_str())
        );
    }
}
