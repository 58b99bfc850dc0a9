//! Dynamic (JSON) construction of the expression IR.
//!
//! The IR is language-agnostic by design; a query arriving over a
//! wire format (e.g. from a subscription request sent by a non-Rust
//! client) is shaped like this rather than built with
//! `Expr::prop`/`Expr::call` directly. This is also where
//! `UnknownExpressionTypeError` and `UnknownFunctionError` are
//! actually reachable at runtime.

use super::{AggName, Expr, FuncName};
use crate::error::CollectionError;
use crate::Value;
use serde_json::Value as Json;

/// Parse one IR node from its JSON wire representation.
///
/// ```json
/// {"type": "ref", "path": ["age"]}
/// {"type": "func", "name": "gte", "args": [{"type":"ref","path":["age"]}, {"type":"value","value":18}]}
/// ```
pub fn expr_from_json(json: &Json) -> Result<Expr, CollectionError> {
    let Json::Object(obj) = json else {
        return Err(CollectionError::UnknownExpressionType);
    };
    let ty = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or(CollectionError::UnknownExpressionType)?;

    match ty {
        "value" => {
            let raw = obj.get("value").unwrap_or(&Json::Null);
            Ok(Expr::Value(json_to_value(raw)))
        }
        "ref" => {
            let path = obj
                .get("path")
                .and_then(Json::as_array)
                .ok_or(CollectionError::UnknownExpressionType)?
                .iter()
                .map(|seg| seg.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(CollectionError::UnknownExpressionType)?;
            if path.is_empty() {
                return Err(CollectionError::EmptyReferencePath);
            }
            Ok(Expr::PropRef(path))
        }
        "func" => {
            let name = obj
                .get("name")
                .and_then(Json::as_str)
                .ok_or(CollectionError::UnknownExpressionType)?;
            let args = parse_args(obj.get("args"))?;
            Ok(Expr::Func(FuncName::parse(name)?, args))
        }
        "agg" => {
            let name = obj
                .get("name")
                .and_then(Json::as_str)
                .ok_or(CollectionError::UnknownExpressionType)?;
            let args = parse_args(obj.get("args"))?;
            Ok(Expr::Aggregate(agg_name(name), args))
        }
        "collectionRef" => Ok(Expr::CollectionRef),
        "queryRef" => Ok(Expr::QueryRef),
        _ => Err(CollectionError::UnknownExpressionType),
    }
}

fn parse_args(args: Option<&Json>) -> Result<Vec<Expr>, CollectionError> {
    match args {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => items.iter().map(expr_from_json).collect(),
        Some(_) => Err(CollectionError::UnknownExpressionType),
    }
}

fn agg_name(name: &str) -> AggName {
    match name {
        "count" => AggName::Count,
        "sum" => AggName::Sum,
        "avg" => AggName::Avg,
        "min" => AggName::Min,
        "max" => AggName::Max,
        other => AggName::Custom(other.to_string()),
    }
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        Json::Object(_) => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ref_and_func() {
        let json = serde_json::json!({
            "type": "func",
            "name": "gte",
            "args": [
                {"type": "ref", "path": ["age"]},
                {"type": "value", "value": 18},
            ]
        });
        let expr = expr_from_json(&json).unwrap();
        assert_eq!(
            expr,
            Expr::Func(
                FuncName::Gte,
                vec![
                    Expr::PropRef(vec!["age".to_string()]),
                    Expr::Value(Value::Int(18)),
                ]
            )
        );
    }

    #[test]
    fn empty_ref_path_is_rejected() {
        let json = serde_json::json!({"type": "ref", "path": []});
        assert!(matches!(
            expr_from_json(&json),
            Err(CollectionError::EmptyReferencePath)
        ));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let json = serde_json::json!({"type": "func", "name": "frobnicate", "args": []});
        assert!(matches!(
            expr_from_json(&json),
            Err(CollectionError::UnknownFunction(_))
        ));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let json = serde_json::json!({"type": "wat"});
        assert!(matches!(
            expr_from_json(&json),
            Err(CollectionError::UnknownExpressionType)
        ));
    }
}
