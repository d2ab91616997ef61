//! Calculator tool.
//!
//! The reference implementation of the [`Tool`] contract: an
//! operation-based calculator covering the four arithmetic operations plus
//! a free-form `evaluate` operation backed by `evalexpr` (so expressions
//! like `"sqrt(16) + 2^3"` work too).
//!
//! Domain failures — division by zero, malformed expressions — come back as
//! `success: false` results with a diagnostic, never as transport errors:
//! the calling LLM is expected to read the diagnostic and recover.

use crate::agentflow::tool::{Tool, ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Stateless calculator tool. Cheap to construct, safe to share.
#[derive(Debug, Clone, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    fn operand(params: &Value, key: &str) -> Result<f64, ToolError> {
        params
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::InvalidParameters(format!("'{}' must be a number", key)))
    }

    fn evaluate_expression(expression: &str) -> Result<f64, String> {
        match evalexpr::eval(expression) {
            Ok(value) => value
                .as_number()
                .map_err(|_| "expression did not evaluate to a number".to_string()),
            Err(err) => Err(format!("evaluation error: {}", err)),
        }
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Performs arithmetic: add, subtract, multiply, divide, or evaluate a free-form expression."
    }

    fn category(&self) -> &str {
        "math"
    }

    fn tags(&self) -> Vec<String> {
        vec!["math".to_string(), "arithmetic".to_string()]
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide", "evaluate"]
                },
                "operand1": {"type": "number"},
                "operand2": {"type": "number"},
                "expression": {"type": "string"}
            },
            "required": ["operation"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {"type": "number"},
                "operation": {"type": "string"},
                "success": {"type": "boolean"},
                "error": {"type": "string"}
            }
        })
    }

    fn usage_instructions(&self) -> Option<String> {
        Some(
            "Pass 'operation' plus 'operand1'/'operand2' for arithmetic, or \
             operation='evaluate' with an 'expression' string for anything else."
                .to_string(),
        )
    }

    fn examples(&self) -> Vec<Value> {
        vec![
            json!({
                "params": {"operation": "add", "operand1": 10.5, "operand2": 5.2},
                "result": {"result": 15.7, "operation": "add", "success": true}
            }),
            json!({
                "params": {"operation": "evaluate", "expression": "2^10"},
                "result": {"result": 1024.0, "operation": "evaluate", "success": true}
            }),
        ]
    }

    fn error_guidance(&self) -> Option<String> {
        Some(
            "On success=false, read 'error', fix the operands or expression, and retry."
                .to_string(),
        )
    }

    fn estimated_latency(&self) -> Duration {
        Duration::from_millis(1)
    }

    async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult, ToolError> {
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParameters("'operation' is required".into()))?
            .to_string();

        let computed: Result<f64, String> = match operation.as_str() {
            "add" => Ok(Self::operand(&params, "operand1")? + Self::operand(&params, "operand2")?),
            "subtract" => {
                Ok(Self::operand(&params, "operand1")? - Self::operand(&params, "operand2")?)
            }
            "multiply" => {
                Ok(Self::operand(&params, "operand1")? * Self::operand(&params, "operand2")?)
            }
            "divide" => {
                let dividend = Self::operand(&params, "operand1")?;
                let divisor = Self::operand(&params, "operand2")?;
                if divisor == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(dividend / divisor)
                }
            }
            "evaluate" => {
                let expression = params.get("expression").and_then(Value::as_str).ok_or_else(
                    || ToolError::InvalidParameters("'expression' is required for evaluate".into()),
                )?;
                Self::evaluate_expression(expression)
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown operation: {}",
                    other
                )))
            }
        };

        Ok(match computed {
            Ok(result) => ToolResult::success(json!({
                "result": result,
                "operation": operation,
                "success": true,
            })),
            Err(message) => ToolResult::failure(message.clone()).with_output(json!({
                "operation": operation,
                "success": false,
                "error": message,
            })),
        })
    }
}
