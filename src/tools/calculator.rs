//! Arithmetic on literal inputs.

use async_trait::async_trait;
use serde_json::Value;

use super::Tool;

/// Binary arithmetic over a mapping, or a sum over a sequence.
///
/// Accepted inputs:
/// - `{'a': 2, 'b': 3}` (adds), `{'a': 2, 'b': 3, 'op': '*'}`
/// - `[1, 2, 3]` (sum)
#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Do arithmetic. Input is a mapping like {'a': 2, 'b': 3, 'op': '+'} where op is one of + - * / (default +), or a list of numbers to sum."
    }

    async fn execute(&self, input: Value) -> anyhow::Result<String> {
        let result = match &input {
            Value::Object(map) => {
                let a = number_field(map.get("a"), "a")?;
                let b = number_field(map.get("b"), "b")?;
                let op = match map.get("op") {
                    None | Some(Value::Null) => "+",
                    Some(Value::String(op)) => op.as_str(),
                    Some(other) => anyhow::bail!("'op' must be a string, got {}", other),
                };
                apply(op, a, b)?
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Item {} is not a number: {}", i, v))
                })
                .sum::<anyhow::Result<f64>>()?,
            other => anyhow::bail!(
                "Expected a mapping with 'a' and 'b' or a list of numbers, got {}",
                other
            ),
        };

        if !result.is_finite() {
            anyhow::bail!("Result is not a finite number");
        }
        Ok(format_number(result))
    }
}

fn number_field(value: Option<&Value>, field: &str) -> anyhow::Result<f64> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("Missing or non-numeric '{}' argument", field))
}

fn apply(op: &str, a: f64, b: f64) -> anyhow::Result<f64> {
    match op {
        "+" | "add" => Ok(a + b),
        "-" | "sub" => Ok(a - b),
        "*" | "mul" => Ok(a * b),
        "/" | "div" => {
            if b == 0.0 {
                anyhow::bail!("Division by zero");
            }
            Ok(a / b)
        }
        other => anyhow::bail!("Unsupported operator: {}", other),
    }
}

/// Integral results print without a fractional part (`4`, not `4.0`).
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
