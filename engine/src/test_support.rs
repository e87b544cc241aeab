//! Test-only helpers for constructing elements and sources.

use crate::core::value::{Element, Value};
use crate::source::ParsedSource;

/// A controller tag element with a data type and a current value.
pub fn tag(name: &str, data_type: &str, value: Value) -> Element {
    Element::new("tag", name)
        .in_container("controller")
        .with_field("data_type", Value::Text(data_type.to_string()))
        .with_field("value", value)
}

pub fn bool_tag(name: &str, value: bool) -> Element {
    tag(name, "BOOL", Value::Bool(value))
}

pub fn dint_tag(name: &str, value: i64) -> Element {
    tag(name, "DINT", Value::Int(value))
}

/// Deterministic demo source: 3 BOOL tags (2 true, 1 false) and 2 DINT tags.
pub fn demo_source(id: &str) -> ParsedSource {
    let mut source = ParsedSource::new(id);
    source.push(bool_tag("Motor_Run", true));
    source.push(bool_tag("Pump_Run", true));
    source.push(bool_tag("Valve_Open", false));
    source.push(dint_tag("Counter", 12));
    source.push(dint_tag("Setpoint", 850));
    source
}
