use serde::Deserialize;
use serde_json::Value;
use validator::{Validate, ValidationError};

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_query_text(query: &str) -> Result<(), ValidationError> {
    if query.trim().is_empty() {
        return Err(invalid("required", "query is required".to_string()));
    }
    Ok(())
}

fn validate_connection_name(name: &str) -> Result<(), ValidationError> {
    if name
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(invalid(
            "invalid_characters",
            format!(
                "connection name '{}' may only contain letters, digits, '-' and '_'",
                name
            ),
        ))
    }
}

fn validate_token(token: &str) -> Result<(), ValidationError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(invalid("required", "token is required".to_string()));
    }
    if uuid::Uuid::parse_str(token).is_err() {
        return Err(invalid(
            "invalid_token",
            format!("'{}' is not a valid confirmation token", token),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct QueryToolInput {
    #[serde(default)]
    #[validate(
        length(max = 128, message = "connection name must be at most 128 characters"),
        custom(function = validate_connection_name)
    )]
    pub connection: Option<String>,

    #[serde(default)]
    #[validate(
        length(max = 65536, message = "query must be at most 65536 characters"),
        custom(function = validate_query_text)
    )]
    pub query: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "at most 100 parameters are allowed"))]
    pub params: Vec<Value>,
}

impl QueryToolInput {
    /// Connection name with blanks treated as absent.
    #[must_use]
    pub fn connection(&self) -> Option<&str> {
        non_blank(self.connection.as_deref())
    }
}

/// Arguments shared by the `schemas`, `tables` and `columns` tools.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct InspectToolInput {
    #[serde(default)]
    #[validate(
        length(max = 128, message = "connection name must be at most 128 characters"),
        custom(function = validate_connection_name)
    )]
    pub connection: Option<String>,

    #[serde(default)]
    #[validate(length(max = 128, message = "schema name must be at most 128 characters"))]
    pub schema: Option<String>,

    #[serde(default)]
    #[validate(length(max = 128, message = "table name must be at most 128 characters"))]
    pub table: Option<String>,
}

impl InspectToolInput {
    #[must_use]
    pub fn connection(&self) -> Option<&str> {
        non_blank(self.connection.as_deref())
    }

    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        non_blank(self.schema.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmToolInput {
    #[serde(default)]
    #[validate(custom(function = validate_token))]
    pub token: String,
}

/// Validation helper: the messages of every failed rule, sorted and joined.
pub fn validate_request<T: Validate>(req: &T) -> Result<(), String> {
    req.validate().map_err(|errors| {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(_, errs)| errs.iter())
            .map(|err| {
                err.message
                    .as_ref()
                    .map_or_else(|| err.code.to_string(), ToString::to_string)
            })
            .collect();
        messages.sort();
        messages.join("; ")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_input(value: Value) -> QueryToolInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_query_input_success() {
        let req = query_input(json!({"connection": "prod", "query": "SELECT 1"}));
        assert!(validate_request(&req).is_ok());
        assert_eq!(req.connection(), Some("prod"));
    }

    #[test]
    fn test_query_required() {
        for value in [json!({}), json!({"query": ""}), json!({"query": "   "})] {
            let req = query_input(value);
            assert_eq!(validate_request(&req).unwrap_err(), "query is required");
        }
    }

    #[test]
    fn test_connection_name_characters() {
        let req = query_input(json!({"connection": "prod; rm -rf", "query": "SELECT 1"}));
        assert!(validate_request(&req).unwrap_err().contains("may only contain"));

        let blank = query_input(json!({"connection": "  ", "query": "SELECT 1"}));
        assert_eq!(blank.connection(), None);
    }

    #[test]
    fn test_too_many_params() {
        let params: Vec<Value> = (0..101).map(Value::from).collect();
        let req = query_input(json!({"query": "SELECT 1", "params": params}));
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn test_inspect_input() {
        let req: InspectToolInput =
            serde_json::from_value(json!({"connection": " prod ", "schema": "", "table": "users"}))
                .unwrap();
        assert!(validate_request(&req).is_ok());
        assert_eq!(req.connection(), Some("prod"));
        assert_eq!(req.schema(), None);

        let long: InspectToolInput =
            serde_json::from_value(json!({"table": "t".repeat(129)})).unwrap();
        assert!(validate_request(&long).unwrap_err().contains("table name"));
    }

    #[test]
    fn test_token_rules() {
        let missing: ConfirmToolInput = serde_json::from_value(json!({})).unwrap();
        assert_eq!(validate_request(&missing).unwrap_err(), "token is required");

        let bad: ConfirmToolInput = serde_json::from_value(json!({"token": "abc"})).unwrap();
        assert!(validate_request(&bad).unwrap_err().contains("not a valid"));

        let good: ConfirmToolInput = serde_json::from_value(
            json!({"token": "6f1c2a9e-8d4b-4c1e-9f3a-2b7d5e0c1a44"}),
        )
        .unwrap();
        assert!(validate_request(&good).is_ok());
    }
}
